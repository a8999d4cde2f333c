// src/pipeline/scores.rs

//! Score-line stage: one request per school and year into `scores.json`.

use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::{Value, json};

use super::normalize::{EntityType, normalize};
use super::{Harvest, SCORES_FILE, StageReport, Tally, with_context};
use crate::error::{FetchError, Result};
use crate::models::{EntityId, Record, extract_items};
use crate::services::ApiRequest;

const SCORELINE_URI: &str = "apidata/api/gkv3/school/scoreline";

pub async fn run_scores(harvest: &Harvest) -> Result<StageReport> {
    let started = Utc::now();
    let Some(school_ids) = harvest.school_ids("scores").await else {
        return Ok(StageReport::skipped("scores", SCORES_FILE));
    };
    let years = &harvest.config().harvest.score_years;
    log::info!(
        "scores: {} schools, years {}",
        school_ids.len(),
        years.join(", ")
    );

    let total = school_ids.len();
    let per_school: Vec<(Vec<Record>, Tally)> = stream::iter(school_ids.iter().enumerate())
        .map(|(idx, school_id)| async move {
            let mut outcome = school_scores(harvest, school_id).await;
            log::info!(
                "scores: [{}/{}] school {}: {} score lines",
                idx + 1,
                total,
                school_id,
                outcome.0.len()
            );
            if idx + 1 < total
                && outcome.1.fatal.is_none()
                && harvest
                    .engine()
                    .pause(harvest.config().pacing.score_school)
                    .await
                    .is_err()
            {
                outcome.1.fail("cancelled");
            }
            outcome
        })
        .buffered(harvest.concurrency())
        .collect()
        .await;

    let mut records = Vec::new();
    let mut tally = Tally::default();
    for (school_records, school_tally) in per_school {
        records.extend(school_records);
        tally.absorb(school_tally);
    }

    harvest
        .finish("scores", SCORES_FILE, started, records, tally.close())
        .await
}

/// Every configured year for one school.
async fn school_scores(harvest: &Harvest, school_id: &EntityId) -> (Vec<Record>, Tally) {
    let config = harvest.config();
    let mut records = Vec::new();
    let mut tally = Tally::default();

    for year in &config.harvest.score_years {
        if harvest.is_cancelled() {
            tally.fail("cancelled");
            break;
        }

        let result = year_scores(harvest, school_id, year).await;
        tally.record(&result.as_ref().map(|_| ()).map_err(|e| e.clone()));
        match result {
            Ok(items) => {
                log::debug!("scores: school {school_id} {year}: {} lines", items.len());
                records.extend(items);
            }
            Err(FetchError::Cancelled) => break,
            Err(e) => log::warn!("scores: school {school_id} {year} failed: {e}"),
        }

        if harvest.engine().pause(config.pacing.score_request).await.is_err() {
            tally.fail("cancelled");
            break;
        }
    }
    (records, tally)
}

async fn year_scores(
    harvest: &Harvest,
    school_id: &EntityId,
    year: &str,
) -> std::result::Result<Vec<Record>, FetchError> {
    let config = harvest.config();
    let request = ApiRequest::post_json(
        &config.http.api_url,
        json!({
            "school_id": school_id.to_value(),
            "province_id": config.harvest.score_province_id,
            "year": year,
            "uri": SCORELINE_URI,
        }),
    );
    let body = harvest
        .engine()
        .execute(&request, harvest.policy(config.retry.score_attempts))
        .await?;

    let Some(items) = extract_items(&body, &config.business.list_keys) else {
        log::warn!("scores: school {school_id} {year}: response has no score list");
        return Ok(Vec::new());
    };

    let context = [
        ("school_id", school_id.to_value()),
        ("year", Value::from(year)),
    ];
    Ok(items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| normalize(&with_context(item, &context), EntityType::ScoreLine))
        .collect())
}
