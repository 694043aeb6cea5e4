use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::Config;
use crate::domain::{GeneId, NetworkId, UniprotRefs};
use crate::error::SnvError;
use crate::parse::{
    self, GeneRecord, parse_sequence_blocks, parse_tab_map, parse_tab_values,
};

/// Hard KEGG limit on identifiers per get call.
pub const MAX_IDS_PER_CALL: usize = 10;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: usize,
    pub backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.retries,
            backoff: config.backoff(),
            retry_statuses: config.retry_statuses.clone(),
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// Outcome of a single request attempt.
pub enum Attempt<T> {
    Success(T),
    Status(u16),
    Transport(String),
}

/// Drives one request to completion under the retry policy. Retryable
/// statuses back off linearly in the attempt number; transport failures are
/// warned about and surfaced to the caller instead of being retried, so bulk
/// operations can decide how to continue.
pub fn with_retries<T, F>(policy: &RetryPolicy, query: &str, mut attempt: F) -> Result<T, SnvError>
where
    F: FnMut() -> Attempt<T>,
{
    let mut tries = 0usize;
    loop {
        match attempt() {
            Attempt::Success(value) => return Ok(value),
            Attempt::Status(status) if tries < policy.retries && policy.is_retryable(status) => {
                let delay = policy.backoff * (tries as u32 + 1);
                tracing::debug!(query, status, tries, "retrying KEGG request");
                thread::sleep(delay);
                tries += 1;
            }
            Attempt::Status(status) => {
                return Err(SnvError::KeggStatus {
                    status,
                    query: query.to_string(),
                });
            }
            Attempt::Transport(message) => {
                tracing::warn!(query, error = %message, "KEGG request failed");
                return Err(SnvError::KeggHttp(message));
            }
        }
    }
}

/// The four raw KEGG REST verbs. Identifiers are joined with `+`; each call
/// is one page-sized request, independently retried.
pub trait KeggClient: Send + Sync {
    fn list(&self, db: &str, organism: Option<&str>) -> Result<String, SnvError>;
    fn link(&self, target_db: &str, sources: &[String]) -> Result<String, SnvError>;
    fn conv(&self, target_db: &str, sources: &[String]) -> Result<String, SnvError>;
    fn get(&self, ids: &[String], option: Option<&str>) -> Result<String, SnvError>;
}

#[derive(Clone)]
pub struct KeggHttpClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl KeggHttpClient {
    pub fn new(config: &Config) -> Result<Self, SnvError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kegg-snv/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SnvError::KeggHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()
            .map_err(|err| SnvError::KeggHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            policy: RetryPolicy::from_config(config),
        })
    }

    fn get_text(&self, query: &str) -> Result<String, SnvError> {
        let url = format!("{}/{}", self.base_url, query);
        let body = with_retries(&self.policy, query, || {
            match self.client.get(&url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        match response.text() {
                            Ok(text) => Attempt::Success(text),
                            Err(err) => Attempt::Transport(err.to_string()),
                        }
                    } else {
                        Attempt::Status(status)
                    }
                }
                Err(err) => Attempt::Transport(err.to_string()),
            }
        })?;
        if body.trim().is_empty() {
            return Err(SnvError::EmptyResponse(query.to_string()));
        }
        Ok(body)
    }
}

impl KeggClient for KeggHttpClient {
    fn list(&self, db: &str, organism: Option<&str>) -> Result<String, SnvError> {
        let query = match organism {
            Some(organism) => format!("list/{db}/{organism}"),
            None => format!("list/{db}"),
        };
        self.get_text(&query)
    }

    fn link(&self, target_db: &str, sources: &[String]) -> Result<String, SnvError> {
        self.get_text(&format!("link/{target_db}/{}", sources.join("+")))
    }

    fn conv(&self, target_db: &str, sources: &[String]) -> Result<String, SnvError> {
        self.get_text(&format!("conv/{target_db}/{}", sources.join("+")))
    }

    fn get(&self, ids: &[String], option: Option<&str>) -> Result<String, SnvError> {
        let joined = ids.join("+");
        let query = match option {
            Some(option) => format!("get/{joined}/{option}"),
            None => format!("get/{joined}"),
        };
        self.get_text(&query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqKind {
    AminoAcid,
    Nucleotide,
}

impl SeqKind {
    pub fn option(self) -> &'static str {
        match self {
            SeqKind::AminoAcid => "aaseq",
            SeqKind::Nucleotide => "ntseq",
        }
    }
}

/// High-level KEGG operations derived from the four verbs. Oversized id
/// collections are split into page-sized sub-requests whose raw responses
/// are concatenated in input order before parsing.
pub struct KeggApi<K: KeggClient> {
    client: K,
    organism: String,
    page_size: usize,
}

impl<K: KeggClient> KeggApi<K> {
    pub fn new(client: K, config: &Config) -> Self {
        Self {
            client,
            organism: config.organism.clone(),
            page_size: config.page_size.max(1),
        }
    }

    pub fn organism(&self) -> &str {
        &self.organism
    }

    pub fn client(&self) -> &K {
        &self.client
    }

    /// All genes of the configured organism, id -> description.
    pub fn all_genes(&self) -> Result<BTreeMap<String, String>, SnvError> {
        Ok(parse_tab_map(&self.client.list(&self.organism, None)?))
    }

    pub fn all_pathways(&self) -> Result<BTreeMap<String, String>, SnvError> {
        Ok(parse_tab_map(
            &self.client.list("pathway", Some(&self.organism))?,
        ))
    }

    pub fn all_modules(&self) -> Result<BTreeMap<String, String>, SnvError> {
        Ok(parse_tab_map(&self.client.list("module", None)?))
    }

    /// Direct gene membership of a pathway.
    pub fn pathway_genes(&self, id: &NetworkId) -> Result<BTreeSet<GeneId>, SnvError> {
        let text = self
            .client
            .link(&self.organism, &[id.as_str().to_string()])?;
        Ok(self.gene_ids_from_values(parse_tab_values(&text)))
    }

    /// Module membership is indirect: modules reference ortholog groups, so
    /// resolution hops module -> ko, then ko -> organism genes.
    pub fn module_genes(&self, id: &NetworkId) -> Result<BTreeSet<GeneId>, SnvError> {
        let ko_text = self.client.link("ko", &[id.as_str().to_string()])?;
        let ko_ids: Vec<String> = parse_tab_values(&ko_text)
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut values = Vec::new();
        for chunk in ko_ids.chunks(self.page_size) {
            let text = self.client.link(&self.organism, chunk)?;
            values.extend(parse_tab_values(&text));
        }
        Ok(self.gene_ids_from_values(values))
    }

    /// Translates a gene id into the UniProt namespace. The first mapping is
    /// the primary accession, the rest are secondary aliases.
    pub fn convert(&self, id: &GeneId) -> Result<UniprotRefs, SnvError> {
        let text = self
            .client
            .conv("uniprot", &[id.as_str().to_string()])?;
        let mut refs = UniprotRefs::default();
        for value in parse_tab_values(&text) {
            let accession = value.strip_prefix("up:").unwrap_or(&value).to_string();
            if accession.is_empty() {
                continue;
            }
            if refs.primary.is_none() {
                refs.primary = Some(accession);
            } else if refs.primary.as_deref() != Some(accession.as_str()) {
                refs.secondary.insert(accession);
            }
        }
        Ok(refs)
    }

    /// Amino-acid or nucleotide sequences for a batch of genes.
    pub fn sequences(
        &self,
        ids: &[GeneId],
        kind: SeqKind,
    ) -> Result<BTreeMap<String, String>, SnvError> {
        let text = self.get_chunked(ids, Some(kind.option()))?;
        Ok(parse_sequence_blocks(&text))
    }

    /// Detailed flat-file records for a batch of genes.
    pub fn genes_info(&self, ids: &[GeneId]) -> Result<BTreeMap<GeneId, GeneRecord>, SnvError> {
        let text = self.get_chunked(ids, None)?;
        parse::parse_gene_records(&text, &self.organism)
    }

    fn get_chunked(&self, ids: &[GeneId], option: Option<&str>) -> Result<String, SnvError> {
        let tokens: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let mut merged = String::new();
        for chunk in tokens.chunks(self.page_size) {
            let body = self.client.get(chunk, option)?;
            merged.push_str(&body);
            if !body.ends_with('\n') {
                merged.push('\n');
            }
        }
        Ok(merged)
    }

    fn gene_ids_from_values(&self, values: Vec<String>) -> BTreeSet<GeneId> {
        let prefix = format!("{}:", self.organism);
        values
            .into_iter()
            .filter(|value| value.starts_with(&prefix))
            .filter_map(|value| value.parse().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    fn zero_backoff_policy(retries: usize) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::ZERO,
            retry_statuses: vec![429, 500, 502, 503, 504],
        }
    }

    #[test]
    fn retries_past_transient_statuses() {
        let policy = zero_backoff_policy(2);
        let mut statuses = vec![503u16, 503].into_iter();
        let result = with_retries(&policy, "get/hsa:7157", || match statuses.next() {
            Some(status) => Attempt::Status(status),
            None => Attempt::Success("body".to_string()),
        });
        assert_eq!(result.unwrap(), "body");
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let policy = zero_backoff_policy(2);
        let result: Result<String, _> =
            with_retries(&policy, "get/hsa:7157", || Attempt::Status(503));
        assert_matches!(result, Err(SnvError::KeggStatus { status: 503, .. }));
    }

    #[test]
    fn non_retryable_status_fails_immediately() {
        let policy = zero_backoff_policy(5);
        let mut calls = 0usize;
        let result: Result<String, _> = with_retries(&policy, "list/hsa", || {
            calls += 1;
            Attempt::Status(404)
        });
        assert_matches!(result, Err(SnvError::KeggStatus { status: 404, .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn transport_failure_surfaces_without_retry() {
        let policy = zero_backoff_policy(5);
        let mut calls = 0usize;
        let result: Result<String, _> = with_retries(&policy, "list/hsa", || {
            calls += 1;
            Attempt::Transport("connection reset".to_string())
        });
        assert_matches!(result, Err(SnvError::KeggHttp(_)));
        assert_eq!(calls, 1);
    }

    #[derive(Default)]
    struct RecordingClient {
        get_calls: Mutex<Vec<Vec<String>>>,
    }

    impl KeggClient for RecordingClient {
        fn list(&self, _db: &str, _organism: Option<&str>) -> Result<String, SnvError> {
            Ok("\n".to_string())
        }

        fn link(&self, _target_db: &str, _sources: &[String]) -> Result<String, SnvError> {
            Ok("\n".to_string())
        }

        fn conv(&self, _target_db: &str, _sources: &[String]) -> Result<String, SnvError> {
            Ok("\n".to_string())
        }

        fn get(&self, ids: &[String], _option: Option<&str>) -> Result<String, SnvError> {
            self.get_calls.lock().unwrap().push(ids.to_vec());
            let blocks: Vec<String> = ids.iter().map(|id| format!(">{id}\natg")).collect();
            Ok(blocks.join("\n"))
        }
    }

    #[test]
    fn oversized_batches_are_paged() {
        let api = KeggApi::new(RecordingClient::default(), &Config::default());
        let ids: Vec<GeneId> = (0..23)
            .map(|n| format!("hsa:{n}").parse().unwrap())
            .collect();
        let sequences = api.sequences(&ids, SeqKind::Nucleotide).unwrap();
        assert_eq!(sequences.len(), 23);

        let calls = api.client.get_calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].len(), 10);
        assert_eq!(calls[1].len(), 10);
        assert_eq!(calls[2].len(), 3);
        assert_eq!(calls[0][0], "hsa:0");
        assert_eq!(calls[2][2], "hsa:22");
    }

    struct LinkClient;

    impl KeggClient for LinkClient {
        fn list(&self, _db: &str, _organism: Option<&str>) -> Result<String, SnvError> {
            Ok("\n".to_string())
        }

        fn link(&self, target_db: &str, sources: &[String]) -> Result<String, SnvError> {
            if target_db == "ko" {
                return Ok("md:M00001\tko:K00844\nmd:M00001\tko:K12407\n".to_string());
            }
            let lines: Vec<String> = sources
                .iter()
                .enumerate()
                .map(|(n, ko)| format!("{ko}\thsa:{}", 100 + n))
                .collect();
            Ok(format!("{}\n", lines.join("\n")))
        }

        fn conv(&self, _target_db: &str, _sources: &[String]) -> Result<String, SnvError> {
            Ok("hsa:7157\tup:P04637\nhsa:7157\tup:A0A087X1Q1\n".to_string())
        }

        fn get(&self, _ids: &[String], _option: Option<&str>) -> Result<String, SnvError> {
            Ok("\n".to_string())
        }
    }

    #[test]
    fn module_membership_resolves_through_orthologs() {
        let api = KeggApi::new(LinkClient, &Config::default());
        let genes = api.module_genes(&"M00001".parse().unwrap()).unwrap();
        let ids: Vec<&str> = genes.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["hsa:100", "hsa:101"]);
    }

    #[test]
    fn convert_splits_primary_and_secondary() {
        let api = KeggApi::new(LinkClient, &Config::default());
        let refs = api.convert(&"hsa:7157".parse().unwrap()).unwrap();
        assert_eq!(refs.primary.as_deref(), Some("P04637"));
        assert!(refs.secondary.contains("A0A087X1Q1"));
    }
}
