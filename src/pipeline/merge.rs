// src/pipeline/merge.rs

//! Multi-source merge of partial records sharing an entity id.

use indexmap::IndexMap;

use crate::models::{EntityId, Record};

/// Canonical records produced by one source's sweep, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub name: String,
    pub records: IndexMap<EntityId, Record>,
}

impl SourceBatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: IndexMap::new(),
        }
    }

    /// Collect records under the id stored in `id_field`; records without
    /// an id are skipped, and a repeated id overlays the earlier record.
    pub fn from_records(
        name: impl Into<String>,
        id_field: &str,
        records: impl IntoIterator<Item = Record>,
    ) -> Self {
        let mut batch = Self::new(name);
        for record in records {
            batch.push(id_field, record);
        }
        batch
    }

    /// Add one record; returns `false` when it carries no id.
    pub fn push(&mut self, id_field: &str, record: Record) -> bool {
        let Some(id) = record.id(id_field) else {
            return false;
        };
        match self.records.get_mut(&id) {
            Some(existing) => {
                existing.overlay(&record);
            }
            None => {
                self.records.insert(id, record);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// How one overlay source fared against the base population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub name: String,
    pub matched: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub base: String,
    pub base_count: usize,
    pub sources: Vec<SourceReport>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: IndexMap<EntityId, Record>,
    pub report: MergeReport,
}

impl MergeOutcome {
    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

/// Merge ordered source batches into one record per base id.
///
/// The first batch fixes the population and its order. Each later batch
/// overlays its provided fields onto matching records (last writer wins);
/// ids unknown to the base are dropped and counted.
pub fn merge(sources: Vec<SourceBatch>) -> MergeOutcome {
    let mut sources = sources.into_iter();
    let Some(base) = sources.next() else {
        return MergeOutcome::default();
    };

    let mut report = MergeReport {
        base: base.name.clone(),
        base_count: base.records.len(),
        sources: Vec::new(),
    };
    let mut records = base.records;

    for source in sources {
        let mut matched = 0;
        let mut dropped = 0;
        for (id, overlay) in &source.records {
            match records.get_mut(id) {
                Some(target) => {
                    target.overlay(overlay);
                    matched += 1;
                }
                None => dropped += 1,
            }
        }

        log::info!(
            "Merged {}: {}/{} records matched, {} dropped",
            source.name,
            matched,
            report.base_count,
            dropped
        );
        report.sources.push(SourceReport {
            name: source.name,
            matched,
            dropped,
        });
    }

    MergeOutcome { records, report }
}
