// src/pipeline/summary.rs

//! End-of-stage coverage summary.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::models::Record;

/// Coverage counts over a stage's records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: usize,
    pub schools: usize,
    pub provinces: usize,
    /// Records per year
    pub years: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_records(records: &[Record]) -> Self {
        let mut schools = BTreeSet::new();
        let mut provinces = BTreeSet::new();
        let mut years = BTreeMap::new();

        for record in records {
            if let Some(id) = record.id("school_id") {
                schools.insert(id);
            }
            if let Some(province) = record.str("province").filter(|p| !p.is_empty()) {
                provinces.insert(province.to_string());
            }
            if let Some(year) = record.value("year").and_then(year_key) {
                *years.entry(year).or_insert(0) += 1;
            }
        }

        Self {
            records: records.len(),
            schools: schools.len(),
            provinces: provinces.len(),
            years,
        }
    }

    pub fn log(&self, stage: &str) {
        if self.records == 0 {
            log::info!("{stage}: no records");
            return;
        }
        log::info!(
            "{stage}: {} records covering {} schools, {} provinces",
            self.records,
            self.schools,
            self.provinces
        );
        if !self.years.is_empty() {
            let years = self
                .years
                .iter()
                .rev()
                .map(|(year, count)| format!("{year}: {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            log::info!("{stage}: by year {{{years}}}");
        }
    }
}

fn year_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
