use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::{GeneId, Locus};
use crate::error::SnvError;

/// Separator between gene records in a multi-id get response.
pub const RECORD_DELIMITER: &str = "///";

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.\.(\d+)$").unwrap());

fn table_lines(text: &str) -> impl Iterator<Item = &str> {
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    trimmed.split('\n')
}

/// Tab-delimited response as an id -> description map. Lines without a tab
/// yield an empty description.
pub fn parse_tab_map(text: &str) -> BTreeMap<String, String> {
    table_lines(text)
        .map(|line| match line.split_once('\t') {
            Some((id, description)) => (id.to_string(), description.to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// Second-column values only, in response order. This is the membership side
/// of a link response.
pub fn parse_tab_values(text: &str) -> Vec<String> {
    table_lines(text)
        .map(|line| match line.split_once('\t') {
            Some((_, value)) => value.to_string(),
            None => String::new(),
        })
        .collect()
}

/// Deduplicated first-column ids of a tab-delimited response.
pub fn parse_tab_ids(text: &str) -> BTreeSet<String> {
    table_lines(text)
        .map(|line| match line.split_once('\t') {
            Some((id, _)) => id.to_string(),
            None => line.to_string(),
        })
        .collect()
}

/// Fields of one flat-file gene record, before cache-level assembly.
#[derive(Debug, Clone, Default)]
pub struct GeneRecord {
    pub id: Option<GeneId>,
    pub coding_type: Option<String>,
    pub symbols: BTreeSet<String>,
    pub chromosome: Option<String>,
    pub locus: Option<Locus>,
    pub uniprot: Option<String>,
    pub aa_seq: Option<String>,
    pub na_seq: Option<String>,
}

/// Parses one flat-file gene record. Multi-line sequence bodies are gathered
/// by two capture flags; any line with more than one token ends a body.
pub fn parse_gene_record(text: &str, organism: &str) -> Result<GeneRecord, SnvError> {
    let mut record = GeneRecord::default();
    let mut capturing_aa = false;
    let mut capturing_na = false;
    let mut declared_aa = 0usize;
    let mut declared_na = 0usize;
    let mut aa_body = String::new();
    let mut na_body = String::new();

    for line in text.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() > 1 {
            capturing_aa = false;
            capturing_na = false;
        }
        if tokens.len() == 1 {
            if capturing_aa {
                aa_body.push_str(tokens[0]);
                continue;
            }
            if capturing_na {
                na_body.push_str(tokens[0]);
                continue;
            }
        }
        let Some(&keyword) = tokens.first() else {
            continue;
        };
        match keyword {
            "ENTRY" => {
                if let Some(token) = tokens.get(1) {
                    record.id = Some(format!("{organism}:{token}").parse()?);
                }
                record.coding_type = tokens.get(2).map(|token| token.to_string());
            }
            "SYMBOL" => {
                record.symbols = tokens[1..]
                    .iter()
                    .map(|token| token.trim_end_matches(',').to_string())
                    .collect();
            }
            "POSITION" => {
                if let Some(rest) = tokens.get(1) {
                    let (chromosome, span) = match rest.split_once(':') {
                        Some((chromosome, span)) => (Some(chromosome), span),
                        None => (None, *rest),
                    };
                    record.chromosome = chromosome.map(|value| value.to_string());
                    record.locus = Some(parse_locus(span));
                }
            }
            "AASEQ" => {
                declared_aa = parse_declared_length(&tokens)?;
                capturing_aa = true;
            }
            "NTSEQ" => {
                declared_na = parse_declared_length(&tokens)?;
                capturing_na = true;
            }
            _ => {
                if keyword.starts_with("UniProt") {
                    record.uniprot = tokens.get(1).map(|token| token.to_string());
                }
            }
        }
    }

    let Some(id) = record.id.clone() else {
        return Err(SnvError::MissingEntry);
    };
    if !aa_body.is_empty() {
        check_declared_length(&id, "aa", declared_aa, aa_body.len())?;
        record.aa_seq = Some(aa_body);
    }
    if !na_body.is_empty() {
        check_declared_length(&id, "nt", declared_na, na_body.len())?;
        record.na_seq = Some(na_body);
    }
    Ok(record)
}

fn parse_declared_length(tokens: &[&str]) -> Result<usize, SnvError> {
    let token = tokens.get(1).unwrap_or(&"0");
    token
        .parse()
        .map_err(|_| SnvError::KeggHttp(format!("malformed sequence header: {token}")))
}

fn check_declared_length(
    id: &GeneId,
    kind: &str,
    declared: usize,
    actual: usize,
) -> Result<(), SnvError> {
    if declared != actual {
        return Err(SnvError::SequenceLengthMismatch {
            id: id.to_string(),
            kind: kind.to_string(),
            declared,
            actual,
        });
    }
    Ok(())
}

fn parse_locus(span: &str) -> Locus {
    match RANGE_RE.captures(span) {
        Some(caps) => {
            let start = caps[1].parse().unwrap_or(0);
            let end = caps[2].parse().unwrap_or(0);
            Locus::Range { start, end }
        }
        None => Locus::Raw(span.to_string()),
    }
}

/// Splits a multi-record get response on the `///` delimiter and parses each
/// block. One bad record fails the whole response.
pub fn parse_gene_records(
    text: &str,
    organism: &str,
) -> Result<BTreeMap<GeneId, GeneRecord>, SnvError> {
    let mut records = BTreeMap::new();
    for block in text.split(RECORD_DELIMITER) {
        if block.trim().is_empty() {
            continue;
        }
        let record = parse_gene_record(block, organism)?;
        if let Some(id) = record.id.clone() {
            records.insert(id, record);
        }
    }
    Ok(records)
}

/// FASTA-like sequence blocks: a `>` header whose first token is the id,
/// body lines concatenated until the next header.
pub fn parse_sequence_blocks(text: &str) -> BTreeMap<String, String> {
    let mut sequences = BTreeMap::new();
    let mut current: Option<(String, String)> = None;
    for line in text.lines() {
        if let Some(header) = line.strip_prefix('>') {
            if let Some((id, body)) = current.take() {
                sequences.insert(id, body);
            }
            let id = header
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            current = Some((id, String::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line.trim());
        }
    }
    if let Some((id, body)) = current {
        sequences.insert(id, body);
    }
    sequences
}
