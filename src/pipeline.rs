use ndarray::Axis;
use tracing::debug;

use crate::dataset::{Column, Dataset};
use crate::domain::QcThresholds;
use crate::doublet::DoubletDetector;
use crate::error::CellstackError;

pub const MITO_PREFIX: &str = "MT-";
pub const NORMALIZE_TARGET_SUM: f64 = 1e4;
pub const SCALE_MAX_VALUE: f64 = 10.0;
pub const COUNTS_LAYER: &str = "counts";

const MEAN_BINS: usize = 20;
const HVG_MIN_MEAN: f64 = 0.0125;
const HVG_MAX_MEAN: f64 = 3.0;
const HVG_MIN_DISP_NORM: f64 = 0.5;

/// Pipeline result. The doublet count is recorded right after detection,
/// before the quality filter removes every flagged cell.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub dataset: Dataset,
    pub predicted_doublets: usize,
}

/// Fixed-order QC/normalization pipeline. The stage order is a hard
/// contract: filtering consumes the doublet flags and QC metrics computed
/// before it, and normalization only sees surviving cells.
pub struct QcPipeline;

impl QcPipeline {
    pub fn run(
        mut dataset: Dataset,
        thresholds: &QcThresholds,
        detector: &dyn DoubletDetector,
    ) -> Result<PipelineOutcome, CellstackError> {
        thresholds.validate()?;
        if dataset.n_obs() == 0 {
            return Err(CellstackError::EmptyDataset("pipeline input".to_string()));
        }
        dataset.validate()?;

        dataset.make_var_names_unique();
        flag_mitochondrial(&mut dataset)?;
        calculate_qc_metrics(&mut dataset)?;
        detect_doublets(&mut dataset, detector)?;
        let predicted_doublets = dataset
            .obs
            .bool_column("predicted_doublet")
            .map(|flags| flags.iter().filter(|&&flag| flag).count())
            .unwrap_or(0);
        filter_cells(&mut dataset, thresholds)?;
        apply_quality_filters(&mut dataset, thresholds)?;
        normalize_total(&mut dataset, NORMALIZE_TARGET_SUM);
        log1p(&mut dataset);
        snapshot_raw(&mut dataset);
        select_variable_features(&mut dataset)?;
        scale(&mut dataset, SCALE_MAX_VALUE);

        dataset.validate()?;
        Ok(PipelineOutcome {
            dataset,
            predicted_doublets,
        })
    }
}

pub fn flag_mitochondrial(dataset: &mut Dataset) -> Result<(), CellstackError> {
    let flags = dataset
        .var
        .ids()
        .iter()
        .map(|id| id.starts_with(MITO_PREFIX))
        .collect::<Vec<_>>();
    dataset.var.set_column("mt", Column::Bool(flags))
}

pub fn calculate_qc_metrics(dataset: &mut Dataset) -> Result<(), CellstackError> {
    let mt = dataset
        .var
        .bool_column("mt")
        .ok_or_else(|| {
            CellstackError::Parse(
                "var column 'mt' missing; flag mitochondrial features first".to_string(),
            )
        })?
        .to_vec();

    let mut total_counts = Vec::with_capacity(dataset.n_obs());
    let mut n_genes = Vec::with_capacity(dataset.n_obs());
    let mut pct_mt = Vec::with_capacity(dataset.n_obs());
    for row in dataset.matrix.axis_iter(Axis(0)) {
        let total: f64 = row.sum();
        let expressed = row.iter().filter(|&&value| value > 0.0).count();
        let mt_total: f64 = row
            .iter()
            .zip(&mt)
            .filter_map(|(value, &is_mt)| is_mt.then_some(*value))
            .sum();
        total_counts.push(total);
        n_genes.push(expressed as f64);
        pct_mt.push(if total > 0.0 {
            100.0 * mt_total / total
        } else {
            0.0
        });
    }

    dataset
        .obs
        .set_column("total_counts", Column::Float(total_counts))?;
    dataset
        .obs
        .set_column("n_genes_by_counts", Column::Float(n_genes))?;
    dataset.obs.set_column("pct_counts_mt", Column::Float(pct_mt))
}

pub fn detect_doublets(
    dataset: &mut Dataset,
    detector: &dyn DoubletDetector,
) -> Result<(), CellstackError> {
    let (scores, flags) = detector.detect(&dataset.matrix)?;
    if scores.len() != dataset.n_obs() || flags.len() != dataset.n_obs() {
        return Err(CellstackError::Parse(format!(
            "doublet detector returned {} scores / {} flags for {} cells",
            scores.len(),
            flags.len(),
            dataset.n_obs()
        )));
    }
    dataset
        .obs
        .set_column("doublet_score", Column::Float(scores))?;
    dataset
        .obs
        .set_column("predicted_doublet", Column::Bool(flags))
}

// Three conjunctive count/gene filters, each with its metric recomputed
// from the current matrix.
pub fn filter_cells(
    dataset: &mut Dataset,
    thresholds: &QcThresholds,
) -> Result<(), CellstackError> {
    let total_mask = dataset
        .matrix
        .axis_iter(Axis(0))
        .map(|row| row.sum() >= thresholds.min_counts)
        .collect::<Vec<_>>();
    retain_checked(dataset, &total_mask, "minimum-count filtering")?;

    let min_genes_mask = expressed_counts(dataset)
        .into_iter()
        .map(|count| count >= thresholds.min_genes)
        .collect::<Vec<_>>();
    retain_checked(dataset, &min_genes_mask, "minimum-gene filtering")?;

    let max_genes_mask = expressed_counts(dataset)
        .into_iter()
        .map(|count| count <= thresholds.max_genes)
        .collect::<Vec<_>>();
    retain_checked(dataset, &max_genes_mask, "maximum-gene filtering")
}

pub fn apply_quality_filters(
    dataset: &mut Dataset,
    thresholds: &QcThresholds,
) -> Result<(), CellstackError> {
    let pct_mask = dataset
        .obs
        .float_column("pct_counts_mt")
        .ok_or_else(|| {
            CellstackError::Parse(
                "obs column 'pct_counts_mt' missing; compute QC metrics first".to_string(),
            )
        })?
        .iter()
        .map(|&pct| pct < thresholds.max_pct_mito)
        .collect::<Vec<_>>();
    retain_checked(dataset, &pct_mask, "mitochondrial filtering")?;

    let doublet_mask = dataset
        .obs
        .bool_column("predicted_doublet")
        .ok_or_else(|| {
            CellstackError::Parse(
                "obs column 'predicted_doublet' missing; run doublet detection first".to_string(),
            )
        })?
        .iter()
        .map(|&flagged| !flagged)
        .collect::<Vec<_>>();
    retain_checked(dataset, &doublet_mask, "doublet filtering")
}

fn expressed_counts(dataset: &Dataset) -> Vec<usize> {
    dataset
        .matrix
        .axis_iter(Axis(0))
        .map(|row| row.iter().filter(|&&value| value > 0.0).count())
        .collect()
}

fn retain_checked(
    dataset: &mut Dataset,
    mask: &[bool],
    stage: &str,
) -> Result<(), CellstackError> {
    let removed = mask.iter().filter(|&&keep| !keep).count();
    if removed > 0 {
        debug!(removed, stage, "removing cells");
    }
    dataset.retain_obs(mask)?;
    if dataset.n_obs() == 0 {
        return Err(CellstackError::EmptyDataset(stage.to_string()));
    }
    Ok(())
}

// Cells with zero total are left untouched; none survive the count filters
// in the full pipeline.
pub fn normalize_total(dataset: &mut Dataset, target_sum: f64) {
    dataset
        .layers
        .insert(COUNTS_LAYER.to_string(), dataset.matrix.clone());
    for mut row in dataset.matrix.axis_iter_mut(Axis(0)) {
        let total: f64 = row.sum();
        if total > 0.0 {
            row.mapv_inplace(|value| value * target_sum / total);
        }
    }
}

pub fn log1p(dataset: &mut Dataset) {
    dataset.matrix.mapv_inplace(f64::ln_1p);
}

pub fn snapshot_raw(dataset: &mut Dataset) {
    let mut snapshot = dataset.clone();
    snapshot.raw = None;
    dataset.raw = Some(Box::new(snapshot));
}

// Binned dispersion criterion: mean and dispersion (variance/mean) on the
// expm1 scale, dispersion z-scored within equal-width mean bins, then a
// mean window plus a normalized-dispersion cutoff.
pub fn select_variable_features(dataset: &mut Dataset) -> Result<(), CellstackError> {
    let n_obs = dataset.n_obs();
    if n_obs == 0 {
        return Err(CellstackError::EmptyDataset(
            "variable-feature selection".to_string(),
        ));
    }
    let n_vars = dataset.n_vars();
    let mut means = vec![0.0; n_vars];
    let mut dispersions = vec![0.0; n_vars];
    for (j, column) in dataset.matrix.axis_iter(Axis(1)).enumerate() {
        let mean = column.iter().map(|&value| value.exp_m1()).sum::<f64>() / n_obs as f64;
        let variance = column
            .iter()
            .map(|&value| {
                let centered = value.exp_m1() - mean;
                centered * centered
            })
            .sum::<f64>()
            / (n_obs as f64 - 1.0).max(1.0);
        means[j] = mean;
        dispersions[j] = if mean > 0.0 { variance / mean } else { 0.0 };
    }

    let normalized = normalize_dispersions(&means, &dispersions);
    let flags = (0..n_vars)
        .map(|j| {
            means[j] > HVG_MIN_MEAN && means[j] < HVG_MAX_MEAN && normalized[j] >= HVG_MIN_DISP_NORM
        })
        .collect::<Vec<_>>();

    dataset.var.set_column("means", Column::Float(means))?;
    dataset
        .var
        .set_column("dispersions", Column::Float(dispersions))?;
    dataset
        .var
        .set_column("highly_variable", Column::Bool(flags))
}

fn normalize_dispersions(means: &[f64], dispersions: &[f64]) -> Vec<f64> {
    let max_mean = means.iter().cloned().fold(f64::MIN, f64::max);
    let min_mean = means.iter().cloned().fold(f64::MAX, f64::min);
    let width = (max_mean - min_mean) / MEAN_BINS as f64;
    let bin_of = |mean: f64| -> usize {
        if width <= 0.0 {
            return 0;
        }
        (((mean - min_mean) / width) as usize).min(MEAN_BINS - 1)
    };

    let mut bin_sums = vec![(0.0f64, 0usize); MEAN_BINS];
    for (mean, disp) in means.iter().zip(dispersions) {
        let bin = bin_of(*mean);
        bin_sums[bin].0 += disp;
        bin_sums[bin].1 += 1;
    }
    let bin_means = bin_sums
        .iter()
        .map(|(sum, count)| if *count > 0 { sum / *count as f64 } else { 0.0 })
        .collect::<Vec<_>>();

    let mut bin_sq = vec![0.0f64; MEAN_BINS];
    for (mean, disp) in means.iter().zip(dispersions) {
        let bin = bin_of(*mean);
        let centered = disp - bin_means[bin];
        bin_sq[bin] += centered * centered;
    }
    let bin_stds = bin_sq
        .iter()
        .zip(&bin_sums)
        .map(|(sq, (_, count))| {
            if *count > 1 {
                (sq / (*count as f64 - 1.0)).sqrt()
            } else {
                0.0
            }
        })
        .collect::<Vec<_>>();

    means
        .iter()
        .zip(dispersions)
        .map(|(mean, disp)| {
            let bin = bin_of(*mean);
            // A single-member or zero-variance bin cannot be z-scored;
            // fall back to the raw dispersion offset.
            if bin_stds[bin] > 0.0 {
                (disp - bin_means[bin]) / bin_stds[bin]
            } else {
                disp - bin_means[bin]
            }
        })
        .collect()
}

pub fn scale(dataset: &mut Dataset, max_value: f64) {
    let n_obs = dataset.n_obs() as f64;
    if n_obs == 0.0 {
        return;
    }
    for mut column in dataset.matrix.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / n_obs;
        let variance = column
            .iter()
            .map(|&value| {
                let centered = value - mean;
                centered * centered
            })
            .sum::<f64>()
            / (n_obs - 1.0).max(1.0);
        let std = variance.sqrt();
        let std = if std > 0.0 { std } else { 1.0 };
        column.mapv_inplace(|value| ((value - mean) / std).clamp(-max_value, max_value));
    }
}
