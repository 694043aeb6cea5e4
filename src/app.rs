use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::{EntityCache, Storage};
use crate::config::Config;
use crate::domain::{Gene, GeneId, Network, NetworkId, NetworkType, VariantRecord};
use crate::error::SnvError;
use crate::kegg::KeggClient;
use crate::pool;
use crate::snv::{SnvFilter, enumerate_snvs};

/// Orchestrates cache, fetch and enumeration. Thin by design; all policy
/// lives in the components it wires together.
pub struct App<K: KeggClient, S: Storage> {
    cache: EntityCache<K, S>,
    page_size: usize,
    workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenomeInitSummary {
    pub total: usize,
    pub skipped: usize,
    pub created: usize,
}

impl<K: KeggClient, S: Storage> App<K, S> {
    pub fn new(cache: EntityCache<K, S>, config: &Config) -> Self {
        Self {
            cache,
            page_size: config.page_size.max(1),
            workers: config.workers.max(1),
        }
    }

    pub fn cache(&self) -> &EntityCache<K, S> {
        &self.cache
    }

    /// Bootstraps the whole genome: every organism gene not yet cached is
    /// fetched in page-sized batches through the bulk record path. Re-running
    /// after a failure is cheap because cache hits are subtracted up front.
    pub fn init_genome(&self, recalc: bool) -> Result<GenomeInitSummary, SnvError> {
        let genes = self.cache.api().all_genes()?;
        let total = genes.len();
        let cached = if recalc {
            Default::default()
        } else {
            self.cache.cached_gene_keys()?
        };
        let pending: Vec<GeneId> = genes
            .keys()
            .filter_map(|id| id.parse().ok())
            .filter(|id: &GeneId| !cached.contains(&id.sanitized()))
            .collect();
        let skipped = total - pending.len();
        tracing::info!(total, skipped, "initializing genome cache");

        let batches: Vec<Vec<GeneId>> = pending
            .chunks(self.page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let results = pool::run_tasks(batches, self.workers, |batch| -> Result<usize, SnvError> {
            let records = self.cache.api().genes_info(&batch)?;
            let mut created = 0;
            for (_, record) in records {
                self.cache.gene_from_record(record)?;
                created += 1;
            }
            tracing::debug!(created, "stored gene batch");
            Ok(created)
        });

        let mut created = 0;
        for result in results {
            created += result?;
        }
        Ok(GenomeInitSummary {
            total,
            skipped,
            created,
        })
    }

    pub fn gene(&self, id: &GeneId) -> Result<Gene, SnvError> {
        self.cache.gene(id)
    }

    pub fn network(&self, id: &NetworkId, kind: NetworkType) -> Result<Network, SnvError> {
        self.cache.network(id, kind)
    }

    /// All qualifying SNVs of one gene. A gene without a cached nucleotide
    /// sequence yields no rows.
    pub fn gene_snvs(
        &self,
        id: &GeneId,
        filter: SnvFilter,
    ) -> Result<Vec<VariantRecord>, SnvError> {
        let gene = self.cache.gene(id)?;
        Ok(snvs_of(&gene, filter))
    }

    /// All qualifying SNVs across a network, enumerated per member gene in
    /// parallel and sorted by (protein, position, alternate) so the output
    /// is stable regardless of worker scheduling.
    pub fn network_snvs(
        &self,
        id: &NetworkId,
        kind: NetworkType,
        filter: SnvFilter,
    ) -> Result<Vec<VariantRecord>, SnvError> {
        let network = self.cache.network(id, kind)?;
        let tasks: Vec<GeneId> = network.genes.iter().cloned().collect();
        let results = pool::run_tasks(tasks, self.workers, |gene_id| {
            self.cache.gene(&gene_id).map(|gene| snvs_of(&gene, filter))
        });

        let mut variants = Vec::new();
        for result in results {
            variants.extend(result?);
        }
        variants.sort_by(|a, b| {
            (a.protein_id.as_str(), a.start, a.alt_base)
                .cmp(&(b.protein_id.as_str(), b.start, b.alt_base))
        });
        Ok(variants)
    }

    pub fn list_pathways(&self) -> Result<BTreeMap<String, String>, SnvError> {
        self.cache.api().all_pathways()
    }

    pub fn list_modules(&self) -> Result<BTreeMap<String, String>, SnvError> {
        self.cache.api().all_modules()
    }
}

fn snvs_of(gene: &Gene, filter: SnvFilter) -> Vec<VariantRecord> {
    enumerate_snvs(
        gene.na_seq.as_deref().unwrap_or(""),
        gene.protein_id(),
        gene.chromosome.as_deref(),
        filter,
    )
}
