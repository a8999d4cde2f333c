// src/pipeline/plans.rs

//! Admission plan stage: static plan documents per school, year and
//! province into `plans.json`. A 404 means the school does not recruit
//! in that province that year.

use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};

use super::normalize::{EntityType, normalize};
use super::{Harvest, PLANS_FILE, StageReport, Tally, with_context};
use crate::error::{FetchError, Result};
use crate::models::{EntityId, Payload, Record, data_payload, province};
use crate::services::ApiRequest;
use crate::utils::join_url;

/// Which plan documents to request for each school.
struct PlanScope {
    years: Vec<String>,
    provinces: Vec<String>,
}

pub async fn run_plans(harvest: &Harvest) -> Result<StageReport> {
    let started = Utc::now();
    let Some(school_ids) = harvest.school_ids("plans").await else {
        return Ok(StageReport::skipped("plans", PLANS_FILE));
    };

    let config = &harvest.config().harvest;
    let scope = PlanScope {
        years: config.plan_years.clone(),
        provinces: if config.plan_province_ids.is_empty() {
            province::province_ids()
        } else {
            config.plan_province_ids.clone()
        },
    };
    log::info!(
        "plans: {} schools × {} years × {} provinces",
        school_ids.len(),
        scope.years.len(),
        scope.provinces.len()
    );

    let total = school_ids.len();
    let scope = &scope;
    let per_school: Vec<(Vec<Record>, Tally)> = stream::iter(school_ids.iter().enumerate())
        .map(|(idx, school_id)| async move {
            let mut outcome = school_plans(harvest, school_id, scope).await;
            log::info!(
                "plans: [{}/{}] school {}: {} plan rows",
                idx + 1,
                total,
                school_id,
                outcome.0.len()
            );
            if idx + 1 < total
                && outcome.1.fatal.is_none()
                && harvest
                    .engine()
                    .pause(harvest.config().pacing.plan_school)
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
        .finish("plans", PLANS_FILE, started, records, tally.close())
        .await
}

async fn school_plans(
    harvest: &Harvest,
    school_id: &EntityId,
    scope: &PlanScope,
) -> (Vec<Record>, Tally) {
    let pause = harvest.config().pacing.plan_request;
    let mut records = Vec::new();
    let mut tally = Tally::default();

    'years: for year in &scope.years {
        let mut year_count = 0;
        for province_id in &scope.provinces {
            if harvest.is_cancelled() {
                tally.fail("cancelled");
                break 'years;
            }

            let result = plan_document(harvest, school_id, year, province_id).await;
            tally.record(&result.as_ref().map(|_| ()).map_err(|e| e.clone()));
            match result {
                Ok(rows) => {
                    year_count += rows.len();
                    records.extend(rows);
                }
                Err(FetchError::NotFound) => {}
                Err(FetchError::Cancelled) => break 'years,
                Err(e) => log::debug!(
                    "plans: school {school_id} {year} province {province_id} failed: {e}"
                ),
            }

            if harvest.engine().pause(pause).await.is_err() {
                tally.fail("cancelled");
                break 'years;
            }
        }
        if year_count == 0 {
            log::debug!("plans: school {school_id} {year}: no plan data");
        }
    }
    (records, tally)
}

async fn plan_document(
    harvest: &Harvest,
    school_id: &EntityId,
    year: &str,
    province_id: &str,
) -> std::result::Result<Vec<Record>, FetchError> {
    let config = harvest.config();
    let url = join_url(
        &config.http.static_url,
        &format!("schoolspecialplan/{school_id}/{year}/{province_id}.json"),
    );
    let body = harvest
        .engine()
        .execute(&ApiRequest::get(url), harvest.policy(config.retry.max_attempts))
        .await?;

    Ok(match data_payload(&body) {
        Some(Payload::Object(by_type)) => plan_rows(school_id, year, province_id, &by_type),
        _ => Vec::new(),
    })
}

/// Flatten `{plan_type: {item: [...]}}` into plan records.
fn plan_rows(
    school_id: &EntityId,
    year: &str,
    province_id: &str,
    by_type: &Map<String, Value>,
) -> Vec<Record> {
    let province_name = province::province_name(province_id);
    let mut rows = Vec::new();

    for (plan_type, info) in by_type {
        let Some(Value::Array(items)) = info.get("item") else {
            continue;
        };
        let context = [
            ("school_id", school_id.to_value()),
            ("year", Value::from(year)),
            ("province_id", Value::from(province_id)),
            ("province", Value::from(province_name.as_str())),
            ("plan_type", Value::from(plan_type.as_str())),
        ];
        rows.extend(
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| normalize(&with_context(item, &context), EntityType::Plan)),
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_rows_flatten_plan_types() {
        let data = json!({
            "普通类": {"item": [
                {"sp_name": "计算机科学与技术", "spcode": "080901", "num": 5, "length": "四年", "tuition": "5000"},
                {"spname": "数学", "plan_num": 3, "remark": "限理科"}
            ]},
            "中外合作": {"item": [{"sp_name": "金融学", "num": 2}]},
            "meta": "ignored"
        });
        let rows = plan_rows(
            &EntityId::new("31"),
            "2024",
            "11",
            data.as_object().unwrap(),
        );
        assert_eq!(rows.len(), 3);

        let cs = rows
            .iter()
            .find(|r| r.str("major") == Some("计算机科学与技术"))
            .unwrap();
        assert_eq!(cs.str("plan_type"), Some("普通类"));
        assert_eq!(cs.str("province"), Some("北京"));
        assert_eq!(cs.str("year"), Some("2024"));
        assert_eq!(cs.value("plan_number"), Some(&json!(5)));
        assert_eq!(cs.str("years"), Some("四年"));

        let math = rows.iter().find(|r| r.str("major") == Some("数学")).unwrap();
        assert_eq!(math.value("plan_number"), Some(&json!(3)));
        assert_eq!(math.str("note"), Some("限理科"));
        assert_eq!(math.value("school_id"), Some(&json!(31)));
    }
}
