// src/pipeline/school_scores.rs

//! Provincial minimum stage: each school's static info document carries a
//! `province_score_min` map; every entry becomes one record in
//! `school_scores.json`.

use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};

use super::normalize::{EntityType, normalize};
use super::{Harvest, SCHOOL_SCORES_FILE, StageReport, Tally, with_context};
use crate::error::{FetchError, Result};
use crate::models::{EntityId, Payload, Record, data_payload, province};
use crate::services::ApiRequest;
use crate::utils::join_url;

pub async fn run_school_scores(harvest: &Harvest) -> Result<StageReport> {
    let started = Utc::now();
    let Some(school_ids) = harvest.school_ids("school_scores").await else {
        return Ok(StageReport::skipped("school_scores", SCHOOL_SCORES_FILE));
    };

    let total = school_ids.len();
    let results: Vec<std::result::Result<Vec<Record>, FetchError>> =
        stream::iter(school_ids.iter().enumerate())
            .map(|(idx, school_id)| async move {
                let result = school_minimums(harvest, school_id).await;
                match &result {
                    Ok(records) if records.is_empty() => {
                        log::debug!("school_scores: school {school_id} has no provincial minimums")
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("school_scores: school {school_id} failed: {e}"),
                }
                if (idx + 1) % 10 == 0 || idx + 1 == total {
                    log::info!("school_scores: {}/{} schools processed", idx + 1, total);
                }
                result
            })
            .buffered(harvest.concurrency())
            .collect()
            .await;

    let mut records = Vec::new();
    let mut tally = Tally::default();
    for result in results {
        tally.record(&result.as_ref().map(|_| ()).map_err(|e| e.clone()));
        if let Ok(school_records) = result {
            records.extend(school_records);
        }
    }

    harvest
        .finish(
            "school_scores",
            SCHOOL_SCORES_FILE,
            started,
            records,
            tally.close(),
        )
        .await
}

async fn school_minimums(
    harvest: &Harvest,
    school_id: &EntityId,
) -> std::result::Result<Vec<Record>, FetchError> {
    let config = harvest.config();
    let url = join_url(
        &config.http.static_url,
        &format!("school/{school_id}/info.json"),
    );
    let result = harvest
        .engine()
        .execute(&ApiRequest::get(url), harvest.policy(config.retry.max_attempts))
        .await;

    let records = match result {
        Ok(body) => match data_payload(&body) {
            Some(Payload::Object(info)) => province_minimums(school_id, &info),
            _ => Vec::new(),
        },
        Err(FetchError::NotFound) => Vec::new(),
        Err(e) => return Err(e),
    };
    harvest.engine().pause(config.pacing.school_score).await?;
    Ok(records)
}

/// One record per province entry of the info document.
fn province_minimums(school_id: &EntityId, info: &Map<String, Value>) -> Vec<Record> {
    let Some(Value::Object(by_province)) = info.get("province_score_min") else {
        return Vec::new();
    };
    let school_name = info.get("name").cloned().unwrap_or(Value::Null);

    by_province
        .iter()
        .filter(|(_, entry)| entry.is_object())
        .map(|(province_id, entry)| {
            let mut context = vec![
                ("school_id", school_id.to_value()),
                ("school_name", school_name.clone()),
                ("province_id", Value::from(province_id.as_str())),
                ("province", Value::from(province::province_name(province_id))),
            ];
            if let Some(code) = entry.get("type").filter(|t| !t.is_null()) {
                let code = match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                context.push(("type_name", Value::from(province::subject_type_name(&code))));
            }
            normalize(&with_context(entry, &context), EntityType::SchoolScore)
        })
        .collect()
}
