use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SnvError {
    #[error("invalid gene id: {0}")]
    InvalidGeneId(String),

    #[error("invalid network id: {0}")]
    InvalidNetworkId(String),

    #[error("invalid network type: {0} (expected pathway or module)")]
    InvalidNetworkType(String),

    #[error("missing config file at {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {}", .0.display())]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("KEGG request failed: {0}")]
    KeggHttp(String),

    #[error("KEGG returned status {status} for query {query}")]
    KeggStatus { status: u16, query: String },

    #[error("KEGG returned an empty response for query {0}")]
    EmptyResponse(String),

    #[error("gene record has no ENTRY line")]
    MissingEntry,

    #[error("{kind} sequence of {id} is {actual} long, record declares {declared}")]
    SequenceLengthMismatch {
        id: String,
        kind: String,
        declared: usize,
        actual: usize,
    },

    #[error("corrupted cache entry at {path}: {reason} (delete the file and re-fetch)")]
    CacheCorrupt { path: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("csv export failed: {0}")]
    Csv(String),
}
