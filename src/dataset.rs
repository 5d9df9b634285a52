use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::{Array2, Axis};

use crate::error::CellstackError;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(values) => values.len(),
            Column::Bool(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain(&mut self, mask: &[bool]) {
        match self {
            Column::Float(values) => retain_by_mask(values, mask),
            Column::Bool(values) => retain_by_mask(values, mask),
            Column::Text(values) => retain_by_mask(values, mask),
        }
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, mask: &[bool]) {
    let mut index = 0;
    values.retain(|_| {
        let keep = mask[index];
        index += 1;
        keep
    });
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    ids: Vec<String>,
    columns: Vec<(String, Column)>,
}

impl AnnotationTable {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut Vec<String> {
        &mut self.ids
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn set_column(&mut self, name: &str, column: Column) -> Result<(), CellstackError> {
        if column.len() != self.ids.len() {
            return Err(CellstackError::Parse(format!(
                "annotation column {name} has {} values for {} identifiers",
                column.len(),
                self.ids.len()
            )));
        }
        if let Some((_, existing)) = self.columns.iter_mut().find(|(n, _)| n == name) {
            *existing = column;
        } else {
            self.columns.push((name.to_string(), column));
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column)
    }

    pub fn float_column(&self, name: &str) -> Option<&[f64]> {
        match self.column(name) {
            Some(Column::Float(values)) => Some(values),
            _ => None,
        }
    }

    pub fn bool_column(&self, name: &str) -> Option<&[bool]> {
        match self.column(name) {
            Some(Column::Bool(values)) => Some(values),
            _ => None,
        }
    }

    fn retain(&mut self, mask: &[bool]) {
        retain_by_mask(&mut self.ids, mask);
        for (_, column) in &mut self.columns {
            column.retain(mask);
        }
    }
}

/// One parsed single-cell dataset: cells × features matrix plus per-cell
/// (`obs`) and per-feature (`var`) annotations. Invariant:
/// `matrix.nrows() == obs.len()` and `matrix.ncols() == var.len()` at all
/// times; layers share the primary matrix shape.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub matrix: Array2<f64>,
    pub obs: AnnotationTable,
    pub var: AnnotationTable,
    pub layers: BTreeMap<String, Array2<f64>>,
    pub raw: Option<Box<Dataset>>,
}

impl Dataset {
    pub fn new(
        matrix: Array2<f64>,
        obs_ids: Vec<String>,
        var_ids: Vec<String>,
    ) -> Result<Self, CellstackError> {
        let dataset = Self {
            matrix,
            obs: AnnotationTable::new(obs_ids),
            var: AnnotationTable::new(var_ids),
            layers: BTreeMap::new(),
            raw: None,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn n_obs(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn validate(&self) -> Result<(), CellstackError> {
        if self.matrix.nrows() != self.obs.len() {
            return Err(CellstackError::Parse(format!(
                "matrix has {} rows for {} cell identifiers",
                self.matrix.nrows(),
                self.obs.len()
            )));
        }
        if self.matrix.ncols() != self.var.len() {
            return Err(CellstackError::Parse(format!(
                "matrix has {} columns for {} feature identifiers",
                self.matrix.ncols(),
                self.var.len()
            )));
        }
        for (name, layer) in &self.layers {
            if layer.dim() != self.matrix.dim() {
                return Err(CellstackError::Parse(format!(
                    "layer {name} shape {:?} differs from matrix shape {:?}",
                    layer.dim(),
                    self.matrix.dim()
                )));
            }
        }
        Ok(())
    }

    // Matrix rows, obs annotations and every layer are subset in lockstep.
    pub fn retain_obs(&mut self, mask: &[bool]) -> Result<(), CellstackError> {
        if mask.len() != self.n_obs() {
            return Err(CellstackError::Parse(format!(
                "cell mask has {} entries for {} cells",
                mask.len(),
                self.n_obs()
            )));
        }
        let keep = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect::<Vec<_>>();
        self.matrix = self.matrix.select(Axis(0), &keep);
        for layer in self.layers.values_mut() {
            *layer = layer.select(Axis(0), &keep);
        }
        self.obs.retain(mask);
        Ok(())
    }

    /// Suffixes repeated feature identifiers, skipping candidates that
    /// collide with names already present. Idempotent. Returns the number
    /// renamed.
    pub fn make_var_names_unique(&mut self) -> usize {
        let taken: HashSet<String> = self.var.ids().iter().cloned().collect();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut renamed = 0;
        for id in self.var.ids_mut() {
            let count = seen.get(id.as_str()).copied().unwrap_or(0);
            if count == 0 {
                seen.insert(id.clone(), 1);
                continue;
            }
            let base = id.clone();
            let mut suffix = count;
            let mut candidate = format!("{base}-{suffix}");
            while taken.contains(&candidate) || seen.contains_key(&candidate) {
                suffix += 1;
                candidate = format!("{base}-{suffix}");
            }
            seen.insert(base, suffix);
            seen.insert(candidate.clone(), 1);
            *id = candidate;
            renamed += 1;
        }
        renamed
    }
}

// Plain string table for cluster/annotation files that carry no matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.headers.len()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;

    use super::*;

    fn toy() -> Dataset {
        Dataset::new(
            arr2(&[[1.0, 0.0, 2.0], [3.0, 4.0, 0.0]]),
            vec!["c1".into(), "c2".into()],
            vec!["A".into(), "B".into(), "C".into()],
        )
        .unwrap()
    }

    #[test]
    fn shape_mismatch_rejected() {
        let err = Dataset::new(
            arr2(&[[1.0, 2.0]]),
            vec!["c1".into()],
            vec!["A".into(), "B".into(), "C".into()],
        )
        .unwrap_err();
        assert!(matches!(err, CellstackError::Parse(_)));
    }

    #[test]
    fn retain_obs_subsets_matrix_and_layers() {
        let mut dataset = toy();
        dataset
            .layers
            .insert("counts".to_string(), dataset.matrix.clone());
        dataset
            .obs
            .set_column("total", Column::Float(vec![3.0, 7.0]))
            .unwrap();
        dataset.retain_obs(&[false, true]).unwrap();
        assert_eq!(dataset.n_obs(), 1);
        assert_eq!(dataset.obs.ids(), ["c2".to_string()]);
        assert_eq!(dataset.matrix, arr2(&[[3.0, 4.0, 0.0]]));
        assert_eq!(dataset.layers["counts"], arr2(&[[3.0, 4.0, 0.0]]));
        assert_eq!(dataset.obs.float_column("total").unwrap(), &[7.0]);
        dataset.validate().unwrap();
    }

    #[test]
    fn var_names_unique_suffixes_duplicates() {
        let mut dataset = Dataset::new(
            Array2::zeros((1, 4)),
            vec!["c1".into()],
            vec!["A".into(), "A".into(), "B".into(), "A".into()],
        )
        .unwrap();
        let renamed = dataset.make_var_names_unique();
        assert_eq!(renamed, 2);
        assert_eq!(
            dataset.var.ids(),
            ["A".to_string(), "A-1".into(), "B".into(), "A-2".into()]
        );
    }

    #[test]
    fn var_names_unique_is_idempotent() {
        let mut dataset = Dataset::new(
            Array2::zeros((1, 3)),
            vec!["c1".into()],
            vec!["A".into(), "A".into(), "A-1".into()],
        )
        .unwrap();
        dataset.make_var_names_unique();
        let first = dataset.var.ids().to_vec();
        let renamed = dataset.make_var_names_unique();
        assert_eq!(renamed, 0);
        assert_eq!(dataset.var.ids(), first.as_slice());
    }
}
