use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SnvError;

pub const CODON_LENGTH: usize = 3;

/// KEGG gene identifier, organism code plus locus token (`hsa:7157`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeneId(String);

impl GeneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Organism prefix of this id.
    pub fn organism(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }

    /// Filename-safe token, namespace separator replaced.
    pub fn sanitized(&self) -> String {
        self.0.replace(':', "_")
    }
}

impl fmt::Display for GeneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneId {
    type Err = SnvError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let valid = trimmed
            .split_once(':')
            .map(|(org, locus)| {
                !org.is_empty()
                    && !locus.is_empty()
                    && trimmed.chars().all(|ch| !ch.is_whitespace() && ch != '/')
            })
            .unwrap_or(false);
        if !valid {
            return Err(SnvError::InvalidGeneId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for GeneId {
    type Error = SnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeneId> for String {
    fn from(value: GeneId) -> Self {
        value.0
    }
}

/// Pathway or module identifier (`hsa01200`, `M00001`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sanitized(&self) -> String {
        self.0.replace(':', "_")
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = SnvError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let valid = !trimmed.is_empty()
            && trimmed.chars().all(|ch| !ch.is_whitespace() && ch != '/');
        if !valid {
            return Err(SnvError::InvalidNetworkId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for NetworkId {
    type Error = SnvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkId> for String {
    fn from(value: NetworkId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Pathway,
    Module,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkType::Pathway => write!(f, "pathway"),
            NetworkType::Module => write!(f, "module"),
        }
    }
}

impl FromStr for NetworkType {
    type Err = SnvError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pathway" => Ok(NetworkType::Pathway),
            "module" => Ok(NetworkType::Module),
            _ => Err(SnvError::InvalidNetworkType(value.to_string())),
        }
    }
}

/// Genomic location of a gene. KEGG position strings that do not match the
/// plain `start..end` form are kept verbatim rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locus {
    Range { start: u64, end: u64 },
    Raw(String),
}

/// Cross-references into the UniProt namespace. The first mapping returned
/// by a conv query is the primary accession, the rest are aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniprotRefs {
    pub primary: Option<String>,
    #[serde(default)]
    pub secondary: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Gene {
    pub id: GeneId,
    #[serde(default)]
    pub uniprot: UniprotRefs,
    pub aa_seq: Option<String>,
    pub na_seq: Option<String>,
    pub chromosome: Option<String>,
    pub locus: Option<Locus>,
    pub coding_type: Option<String>,
    #[serde(default)]
    pub symbols: BTreeSet<String>,
    pub fetched_at: String,
}

impl Gene {
    pub fn aa_len(&self) -> usize {
        self.aa_seq.as_ref().map(|seq| seq.len()).unwrap_or(0)
    }

    pub fn na_len(&self) -> usize {
        self.na_seq.as_ref().map(|seq| seq.len()).unwrap_or(0)
    }

    /// Coding invariant: the nucleotide sequence carries one codon per amino
    /// acid plus a trailing stop codon. Only checkable when both are present.
    pub fn is_consistent(&self) -> bool {
        match (&self.aa_seq, &self.na_seq) {
            (Some(aa), Some(na)) => na.len() == CODON_LENGTH * aa.len() + CODON_LENGTH,
            _ => true,
        }
    }

    /// Identifier the variant rows are attributed to: the primary UniProt
    /// accession when known, the KEGG id otherwise.
    pub fn protein_id(&self) -> &str {
        self.uniprot.primary.as_deref().unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Network {
    pub id: NetworkId,
    pub kind: NetworkType,
    pub genes: BTreeSet<GeneId>,
    /// Sequence-length totals over all members, summed once at construction.
    pub aa_total: u64,
    pub na_total: u64,
    pub fetched_at: String,
}

/// One qualifying single-nucleotide substitution. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantRecord {
    pub chromosome: String,
    pub start: usize,
    pub end: usize,
    pub ref_base: char,
    pub alt_base: char,
    pub protein_id: String,
    pub protein_change: String,
}
