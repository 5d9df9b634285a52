pub mod bundle;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod doublet;
pub mod error;
pub mod legacy;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod sniff;
pub mod store;
