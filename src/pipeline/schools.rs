// src/pipeline/schools.rs

//! School stage: basic listing, per-school detail and the signed enhanced
//! listing, merged in that order into `schools.json`.

use std::sync::Arc;

use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::{Value, json};

use super::merge::{SourceBatch, merge};
use super::normalize::{EntityType, normalize};
use super::{Harvest, SCHOOLS_FILE, StageReport, Tally};
use crate::error::{FetchError, Result};
use crate::models::{EntityId, Payload, Record, data_payload};
use crate::services::{ApiRequest, PageSource, Paginator, Termination};

const LIST_URI: &str = "apidata/api/gkv3/school/lists";
const DETAIL_URI: &str = "apidata/api/gkv3/school/detail";
const ENHANCED_URI: &str = "v1/school/lists";

/// Run the school stage.
pub async fn run_schools(harvest: &Harvest) -> Result<StageReport> {
    let started = Utc::now();
    let harvest_config = &harvest.config().harvest;
    log::info!(
        "schools: up to {} pages, detail {}, enhanced {}",
        harvest_config.max_pages,
        if harvest_config.fetch_detail { "on" } else { "off" },
        if harvest_config.fetch_enhanced { "on" } else { "off" },
    );

    let mut tally = Tally::default();
    let mut sources = Vec::new();

    let (basic, termination) = fetch_basic(harvest).await;
    if let Termination::Failed(e) = &termination {
        tally.fail(format!("basic listing: {e}"));
    }

    if harvest_config.fetch_detail && !basic.is_empty() && !harvest.is_cancelled() {
        let (detail, detail_tally) = fetch_details(harvest, &basic).await;
        tally.absorb(detail_tally);
        sources.push(detail);
    }

    if harvest_config.fetch_enhanced && !basic.is_empty() && !harvest.is_cancelled() {
        let (enhanced, termination) = fetch_enhanced(harvest).await;
        match termination {
            Termination::Failed(FetchError::Cancelled) => tally.fail("cancelled"),
            Termination::Failed(e) => log::warn!("schools: enhanced listing ended early: {e}"),
            _ => {}
        }
        sources.push(enhanced);
    }

    sources.insert(0, basic);
    let outcome = merge(sources);
    let records = outcome.into_records();

    harvest
        .finish("schools", SCHOOLS_FILE, started, records, tally)
        .await
}

fn listing_pages(harvest: &Harvest) -> u32 {
    let config = &harvest.config().harvest;
    config.max_pages.min(config.page_ceiling)
}

/// Sweep the basic listing into the base batch.
async fn fetch_basic(harvest: &Harvest) -> (SourceBatch, Termination) {
    let config = harvest.config();
    let source = PageSource::post(
        "school listing",
        &config.http.api_url,
        json!({
            "keyword": "",
            "province_id": "",
            "ranktype": "",
            "request_type": 1,
            "type": "",
            "uri": LIST_URI,
        }),
    );
    let sweep = Paginator::new(
        Arc::clone(harvest.engine()),
        source,
        config.harvest.page_size,
        listing_pages(harvest),
    )
    .with_policy(harvest.policy(config.retry.max_attempts))
    .with_pause(config.pacing.page)
    .with_list_keys(config.business.list_keys.clone())
    .collect_all()
    .await;

    let batch = SourceBatch::from_records(
        "basic",
        EntityType::School.id_field(),
        sweep.items.iter().map(|item| normalize(item, EntityType::School)),
    );
    log::info!(
        "schools: basic listing gave {} schools over {} pages ({})",
        batch.len(),
        sweep.pages,
        sweep.termination
    );
    (batch, sweep.termination)
}

/// Fetch the detail document of every base school.
async fn fetch_details(harvest: &Harvest, basic: &SourceBatch) -> (SourceBatch, Tally) {
    let total = basic.len();
    log::info!("schools: fetching detail for {total} schools");

    let results: Vec<(EntityId, Value, std::result::Result<Option<Record>, FetchError>)> =
        stream::iter(basic.records.iter().enumerate())
            .map(|(idx, (id, record))| {
                let raw_id = record
                    .value(EntityType::School.id_field())
                    .cloned()
                    .unwrap_or_else(|| id.to_value());
                async move {
                    let result = fetch_detail(harvest, &raw_id).await;
                    let progress = format!("[{}/{}] school {}", idx + 1, total, id);
                    match &result {
                        Ok(Some(_)) => log::debug!("schools: {progress} detail fetched"),
                        Ok(None) => log::warn!("schools: {progress} has no detail"),
                        Err(e) => log::warn!("schools: {progress} detail failed: {e}"),
                    }
                    (id.clone(), raw_id, result)
                }
            })
            .buffered(harvest.concurrency())
            .collect()
            .await;

    let id_field = EntityType::School.id_field();
    let mut batch = SourceBatch::new("detail");
    let mut tally = Tally::default();
    for (id, raw_id, result) in results {
        tally.record(&result.as_ref().map(|_| ()).map_err(|e| e.clone()));
        if let Ok(Some(mut record)) = result {
            record.insert(id_field, raw_id);
            batch.records.insert(id, record);
        }
    }
    log::info!("schools: detail fetched for {}/{} schools", batch.len(), total);
    (batch, tally)
}

async fn fetch_detail(
    harvest: &Harvest,
    school_id: &Value,
) -> std::result::Result<Option<Record>, FetchError> {
    let config = harvest.config();
    let request = ApiRequest::post_json(
        &config.http.api_url,
        json!({ "school_id": school_id, "uri": DETAIL_URI }),
    );
    let body = harvest
        .engine()
        .execute(&request, harvest.policy(config.retry.detail_attempts))
        .await;
    let record = match body {
        Ok(body) => match data_payload(&body) {
            Some(Payload::Object(map)) => {
                Some(normalize(&Value::Object(map), EntityType::SchoolDetail))
            }
            _ => None,
        },
        Err(FetchError::NotFound) => None,
        Err(e) => return Err(e),
    };
    harvest.engine().pause(config.pacing.detail).await?;
    Ok(record)
}

/// Sweep the signed enhanced listing.
async fn fetch_enhanced(harvest: &Harvest) -> (SourceBatch, Termination) {
    let config = harvest.config();
    if harvest.signer().is_none() {
        log::debug!("schools: no signature secret configured, sending an empty signature");
    }
    let source = PageSource::signed_get(
        "enhanced listing",
        &config.http.enhanced_url,
        json!({
            "autosign": "",
            "keyword": "",
            "local_type_id": "",
            "platform": "2",
            "province_id": "",
            "ranktype": "",
            "request_type": 1,
            "spe_ids": "",
            "top_school_id": "",
            "uri": ENHANCED_URI,
        }),
        harvest.signer().cloned(),
        &config.signature.param,
    );
    let sweep = Paginator::new(
        Arc::clone(harvest.engine()),
        source,
        config.harvest.page_size,
        listing_pages(harvest),
    )
    .with_policy(harvest.policy(config.retry.max_attempts))
    .with_pause(config.pacing.page)
    .with_list_keys(config.business.list_keys.clone())
    .collect_all()
    .await;

    let batch = SourceBatch::from_records(
        "enhanced",
        EntityType::SchoolEnhanced.id_field(),
        sweep
            .items
            .iter()
            .map(|item| normalize(item, EntityType::SchoolEnhanced)),
    );
    log::info!(
        "schools: enhanced listing gave {} schools ({})",
        batch.len(),
        sweep.termination
    );
    (batch, sweep.termination)
}
