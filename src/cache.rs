use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;

use crate::domain::{Gene, GeneId, Network, NetworkId, NetworkType, UniprotRefs};
use crate::error::SnvError;
use crate::kegg::{KeggApi, KeggClient, SeqKind};
use crate::parse::GeneRecord;
use crate::pool;

pub const GENES_NS: &str = "genes";
pub const NETWORKS_NS: &str = "networks";

/// Persistence backend for entity snapshots, one record per (kind, key).
pub trait Storage: Send + Sync {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>, SnvError>;
    fn write(&self, kind: &str, key: &str, bytes: &[u8]) -> Result<(), SnvError>;
    fn exists(&self, kind: &str, key: &str) -> bool;
    fn keys(&self, kind: &str) -> Result<BTreeSet<String>, SnvError>;
    /// Human-readable locator for error messages.
    fn describe(&self, kind: &str, key: &str) -> String;
}

/// Filesystem backend: one JSON file per entity under a kind directory,
/// written atomically via a temp file in the target directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: Utf8PathBuf,
}

impl FsStorage {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    fn entry_path(&self, kind: &str, key: &str) -> Utf8PathBuf {
        self.root.join(kind).join(format!("{key}.json"))
    }
}

impl Storage for FsStorage {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>, SnvError> {
        let path = self.entry_path(kind, key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let bytes =
            fs::read(path.as_std_path()).map_err(|err| SnvError::CacheCorrupt {
                path: path.to_string(),
                reason: err.to_string(),
            })?;
        if bytes.iter().all(|byte| byte.is_ascii_whitespace()) {
            return Err(SnvError::CacheCorrupt {
                path: path.to_string(),
                reason: "empty file".to_string(),
            });
        }
        Ok(Some(bytes))
    }

    fn write(&self, kind: &str, key: &str, bytes: &[u8]) -> Result<(), SnvError> {
        let path = self.entry_path(kind, key);
        let parent = path
            .parent()
            .ok_or_else(|| SnvError::Filesystem("invalid cache path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kegg-snv")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        use std::io::Write;
        temp.write_all(bytes)
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn exists(&self, kind: &str, key: &str) -> bool {
        self.entry_path(kind, key).as_std_path().exists()
    }

    fn keys(&self, kind: &str) -> Result<BTreeSet<String>, SnvError> {
        let dir = self.root.join(kind);
        if !dir.as_std_path().exists() {
            return Ok(BTreeSet::new());
        }
        let mut keys = BTreeSet::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| SnvError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    keys.insert(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn describe(&self, kind: &str, key: &str) -> String {
        self.entry_path(kind, key).to_string()
    }
}

/// In-memory backend for tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl Storage for MemoryStorage {
    fn read(&self, kind: &str, key: &str) -> Result<Option<Vec<u8>>, SnvError> {
        let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        match entries.get(&(kind.to_string(), key.to_string())) {
            Some(bytes) if bytes.iter().all(|byte| byte.is_ascii_whitespace()) => {
                Err(SnvError::CacheCorrupt {
                    path: self.describe(kind, key),
                    reason: "empty record".to_string(),
                })
            }
            Some(bytes) => Ok(Some(bytes.clone())),
            None => Ok(None),
        }
    }

    fn write(&self, kind: &str, key: &str, bytes: &[u8]) -> Result<(), SnvError> {
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        entries.insert((kind.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, kind: &str, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        entries.contains_key(&(kind.to_string(), key.to_string()))
    }

    fn keys(&self, kind: &str) -> Result<BTreeSet<String>, SnvError> {
        let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        Ok(entries
            .keys()
            .filter(|(entry_kind, _)| entry_kind == kind)
            .map(|(_, key)| key.clone())
            .collect())
    }

    fn describe(&self, kind: &str, key: &str) -> String {
        format!("memory:{kind}/{key}")
    }
}

/// Create-once cache over genes and networks. Persisted entries are returned
/// unconditionally; misses are built through the KEGG api and persisted.
pub struct EntityCache<K: KeggClient, S: Storage> {
    api: KeggApi<K>,
    storage: S,
    workers: usize,
    // Id-scoped creation locks: two in-process callers missing on the same
    // id must not both fetch and persist it.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<K: KeggClient, S: Storage> EntityCache<K, S> {
    pub fn new(api: KeggApi<K>, storage: S, workers: usize) -> Self {
        Self {
            api,
            storage,
            workers: workers.max(1),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn api(&self) -> &KeggApi<K> {
        &self.api
    }

    pub fn gene(&self, id: &GeneId) -> Result<Gene, SnvError> {
        let key = id.sanitized();
        if let Some(gene) = self.read_gene(&key)? {
            return Ok(gene);
        }
        let result = self.create_gene(id, &key);
        self.release_creation_lock(&key);
        result
    }

    fn create_gene(&self, id: &GeneId, key: &str) -> Result<Gene, SnvError> {
        let lock = self.creation_lock(key);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(gene) = self.read_gene(key)? {
            return Ok(gene);
        }
        tracing::debug!(gene = %id, "cache miss, fetching from KEGG");
        let gene = self.fetch_gene(id)?;
        self.persist_gene(&gene)?;
        Ok(gene)
    }

    /// Bulk path: builds a gene from an already-parsed flat record without a
    /// network round trip, replacing any existing snapshot.
    pub fn gene_from_record(&self, record: GeneRecord) -> Result<Gene, SnvError> {
        let Some(id) = record.id else {
            return Err(SnvError::MissingEntry);
        };
        let gene = Gene {
            id,
            uniprot: UniprotRefs {
                primary: record.uniprot,
                secondary: BTreeSet::new(),
            },
            aa_seq: record.aa_seq,
            na_seq: record.na_seq,
            chromosome: record.chromosome,
            locus: record.locus,
            coding_type: record.coding_type,
            symbols: record.symbols,
            fetched_at: iso_timestamp(),
        };
        self.persist_gene(&gene)?;
        Ok(gene)
    }

    pub fn network(&self, id: &NetworkId, kind: NetworkType) -> Result<Network, SnvError> {
        let key = id.sanitized();
        if let Some(network) = self.read_network(&key)? {
            return Ok(network);
        }
        let result = self.create_network(id, kind, &key);
        self.release_creation_lock(&key);
        result
    }

    fn create_network(
        &self,
        id: &NetworkId,
        kind: NetworkType,
        key: &str,
    ) -> Result<Network, SnvError> {
        let lock = self.creation_lock(key);
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(network) = self.read_network(key)? {
            return Ok(network);
        }

        tracing::info!(network = %id, %kind, "building network from KEGG");
        let members = match kind {
            NetworkType::Pathway => self.api.pathway_genes(id)?,
            NetworkType::Module => self.api.module_genes(id)?,
        };
        let tasks: Vec<GeneId> = members.iter().cloned().collect();
        let mut aa_total = 0u64;
        let mut na_total = 0u64;
        for result in pool::run_tasks(tasks, self.workers, |gene_id| self.gene(&gene_id)) {
            let gene = result?;
            aa_total += gene.aa_len() as u64;
            na_total += gene.na_len() as u64;
        }

        let network = Network {
            id: id.clone(),
            kind,
            genes: members,
            aa_total,
            na_total,
            fetched_at: iso_timestamp(),
        };
        let bytes = serde_json::to_vec_pretty(&network)
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        self.storage.write(NETWORKS_NS, key, &bytes)?;
        Ok(network)
    }

    /// Sanitized ids of all genes already on disk.
    pub fn cached_gene_keys(&self) -> Result<BTreeSet<String>, SnvError> {
        self.storage.keys(GENES_NS)
    }

    fn fetch_gene(&self, id: &GeneId) -> Result<Gene, SnvError> {
        let uniprot = self.api.convert(id)?;
        let ids = [id.clone()];
        let mut aa = self.api.sequences(&ids, SeqKind::AminoAcid)?;
        let mut na = self.api.sequences(&ids, SeqKind::Nucleotide)?;
        Ok(Gene {
            id: id.clone(),
            uniprot,
            aa_seq: aa.remove(id.as_str()),
            na_seq: na.remove(id.as_str()),
            chromosome: None,
            locus: None,
            coding_type: None,
            symbols: BTreeSet::new(),
            fetched_at: iso_timestamp(),
        })
    }

    fn read_gene(&self, key: &str) -> Result<Option<Gene>, SnvError> {
        let Some(bytes) = self.storage.read(GENES_NS, key)? else {
            return Ok(None);
        };
        let gene = serde_json::from_slice(&bytes).map_err(|err| SnvError::CacheCorrupt {
            path: self.storage.describe(GENES_NS, key),
            reason: err.to_string(),
        })?;
        Ok(Some(gene))
    }

    fn read_network(&self, key: &str) -> Result<Option<Network>, SnvError> {
        let Some(bytes) = self.storage.read(NETWORKS_NS, key)? else {
            return Ok(None);
        };
        let network = serde_json::from_slice(&bytes).map_err(|err| SnvError::CacheCorrupt {
            path: self.storage.describe(NETWORKS_NS, key),
            reason: err.to_string(),
        })?;
        Ok(Some(network))
    }

    fn persist_gene(&self, gene: &Gene) -> Result<(), SnvError> {
        if !gene.is_consistent() {
            tracing::warn!(
                gene = %gene.id,
                aa_len = gene.aa_len(),
                na_len = gene.na_len(),
                "sequence lengths violate the coding invariant"
            );
        }
        let bytes = serde_json::to_vec_pretty(gene)
            .map_err(|err| SnvError::Filesystem(err.to_string()))?;
        self.storage.write(GENES_NS, &gene.id.sanitized(), &bytes)
    }

    fn creation_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|err| err.into_inner());
        inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the creation lock once no other caller holds it, so the map
    /// does not accumulate one entry per id over a genome bootstrap.
    fn release_creation_lock(&self, key: &str) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(lock) = inflight.get(key) {
            if Arc::strong_count(lock) == 1 {
                inflight.remove(key);
            }
        }
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use crate::config::Config;
    use crate::kegg::KeggClient;

    use super::*;

    #[derive(Default)]
    struct CountingKegg {
        calls: AtomicUsize,
    }

    impl CountingKegg {
        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl KeggClient for CountingKegg {
        fn list(&self, _db: &str, _organism: Option<&str>) -> Result<String, SnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("hsa:1\tgene one\n".to_string())
        }

        fn link(&self, _target_db: &str, sources: &[String]) -> Result<String, SnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}\thsa:1\n", sources.join("+")))
        }

        fn conv(&self, _target_db: &str, sources: &[String]) -> Result<String, SnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}\tup:P00001\n", sources.join("+")))
        }

        fn get(&self, ids: &[String], option: Option<&str>) -> Result<String, SnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = match option {
                Some("aaseq") => "MK",
                _ => "atgaaatga",
            };
            let blocks: Vec<String> = ids.iter().map(|id| format!(">{id}\n{body}")).collect();
            Ok(format!("{}\n", blocks.join("\n")))
        }
    }

    fn cache_with(client: CountingKegg) -> EntityCache<CountingKegg, MemoryStorage> {
        let api = KeggApi::new(client, &Config::default());
        EntityCache::new(api, MemoryStorage::default(), 2)
    }

    #[test]
    fn second_lookup_hits_the_cache() {
        let cache = cache_with(CountingKegg::default());
        let id: GeneId = "hsa:1".parse().unwrap();

        let first = cache.gene(&id).unwrap();
        assert_eq!(first.uniprot.primary.as_deref(), Some("P00001"));
        assert_eq!(first.aa_seq.as_deref(), Some("MK"));
        assert_eq!(first.na_seq.as_deref(), Some("atgaaatga"));
        let calls_after_first = cache.api().client().count();

        let second = cache.gene(&id).unwrap();
        assert_eq!(second, first);
        assert_eq!(cache.api().client().count(), calls_after_first);
    }

    #[test]
    fn network_sums_member_lengths() {
        let cache = cache_with(CountingKegg::default());
        let network = cache
            .network(&"hsa01200".parse().unwrap(), NetworkType::Pathway)
            .unwrap();
        assert_eq!(network.genes.len(), 1);
        assert_eq!(network.aa_total, 2);
        assert_eq!(network.na_total, 9);

        let cached = cache
            .network(&"hsa01200".parse().unwrap(), NetworkType::Pathway)
            .unwrap();
        assert_eq!(cached, network);
    }

    #[test]
    fn creation_locks_do_not_accumulate() {
        let cache = cache_with(CountingKegg::default());
        cache.gene(&"hsa:1".parse().unwrap()).unwrap();
        cache
            .network(&"hsa01200".parse().unwrap(), NetworkType::Pathway)
            .unwrap();
        let inflight = cache.inflight.lock().unwrap();
        assert!(inflight.is_empty());
    }

    #[test]
    fn corrupted_entry_fails_loudly() {
        let cache = cache_with(CountingKegg::default());
        cache.storage.write(GENES_NS, "hsa_9", b"  ").unwrap();
        let result = cache.gene(&"hsa:9".parse().unwrap());
        assert_matches!(result, Err(SnvError::CacheCorrupt { .. }));
    }

    #[test]
    fn bulk_record_path_persists_without_fetch() {
        let cache = cache_with(CountingKegg::default());
        let record = crate::parse::parse_gene_record(
            "ENTRY  5  CDS\nAASEQ  2\n  MK\nNTSEQ  9\n  atgaaatga\n",
            "hsa",
        )
        .unwrap();
        let gene = cache.gene_from_record(record).unwrap();
        assert_eq!(gene.id.as_str(), "hsa:5");
        assert_eq!(cache.api().client().count(), 0);
        assert!(cache.cached_gene_keys().unwrap().contains("hsa_5"));
    }
}
