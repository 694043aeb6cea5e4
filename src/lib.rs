//! KEGG gene/pathway fetcher with a local entity cache and exhaustive
//! nonsynonymous SNV enumeration over cached coding sequences.

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod export;
pub mod kegg;
pub mod parse;
pub mod pool;
pub mod snv;
