// src/pipeline/majors.rs

//! Major stage: sweep the major listing into `majors.json`.
//!
//! The listing has answered under three different payload shapes over
//! time; each page tries them in order.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use super::normalize::{EntityType, normalize};
use super::{Harvest, MAJORS_FILE, StageReport, Tally};
use crate::error::Result;
use crate::services::{PageSource, Paginator, Termination};

pub async fn run_majors(harvest: &Harvest) -> Result<StageReport> {
    let started = Utc::now();
    let config = harvest.config();
    log::info!(
        "majors: sweeping up to {} pages of {}",
        config.harvest.page_ceiling,
        config.harvest.major_page_size
    );

    let source = PageSource::post(
        "major listing",
        &config.http.api_url,
        json!({
            "keyword": "",
            "type": "",
            "uri": "apidata/api/gkv3/special/lists",
        }),
    )
    .or_variant(json!({ "uri": "apidata/api/gk/special/page" }))
    .or_variant(json!({
        "keyword": "",
        "level1": "",
        "level2": "",
        "level3": "",
        "uri": "apidata/api/gkv3/special/lists",
    }));

    let sweep = Paginator::new(
        Arc::clone(harvest.engine()),
        source,
        config.harvest.major_page_size,
        config.harvest.page_ceiling,
    )
    .with_policy(harvest.policy(config.retry.max_attempts))
    .with_pause(config.pacing.page)
    .with_list_keys(config.business.list_keys.clone())
    .collect_all()
    .await;

    let mut tally = Tally::default();
    match &sweep.termination {
        Termination::Failed(e) => tally.fail(format!("major listing: {e}")),
        Termination::Exhausted | Termination::PartialData if sweep.pages == 0 => {
            log::warn!(
                "majors: no payload shape returned data, the listing parameters may need updating"
            );
        }
        _ => {}
    }

    let records = sweep
        .items
        .iter()
        .map(|item| normalize(item, EntityType::Major))
        .collect();

    harvest
        .finish("majors", MAJORS_FILE, started, records, tally)
        .await
}
