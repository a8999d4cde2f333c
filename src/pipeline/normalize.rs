// src/pipeline/normalize.rs

//! Table-driven schema normalization.
//!
//! Each entity type owns one table of `field -> [alias, ...]`. Upstream
//! renames a key every so often (`code` became `special_code`, `name`
//! became `special_name`); picking up a rename is a one-line edit here.

use std::fmt;

use serde_json::Value;

use crate::models::{EntityId, Field, Record};

/// One canonical field and the raw keys that may carry it, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

const fn field(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, aliases }
}

/// Kinds of raw item the harvester understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Item of the basic school listing
    School,
    /// Per-school detail document
    SchoolDetail,
    /// Item of the signed enhanced school listing
    SchoolEnhanced,
    Major,
    ScoreLine,
    /// One entry of a school's per-province minimum score map
    SchoolScore,
    Plan,
}

impl EntityType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::School => "school",
            Self::SchoolDetail => "school_detail",
            Self::SchoolEnhanced => "school_enhanced",
            Self::Major => "major",
            Self::ScoreLine => "score_line",
            Self::SchoolScore => "school_score",
            Self::Plan => "plan",
        }
    }

    /// Canonical field carrying the entity id.
    pub fn id_field(&self) -> &'static str {
        match self {
            Self::Major => "special_id",
            _ => "school_id",
        }
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::School => SCHOOL,
            Self::SchoolDetail => SCHOOL_DETAIL,
            Self::SchoolEnhanced => SCHOOL_ENHANCED,
            Self::Major => MAJOR,
            Self::ScoreLine => SCORE_LINE,
            Self::SchoolScore => SCHOOL_SCORE,
            Self::Plan => PLAN,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static SCHOOL: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("name", &["name", "school_name"]),
    field("province", &["province_name"]),
    field("city", &["city_name"]),
    field("county", &["county_name"]),
    field("type", &["type_name"]),
    field("level", &["level_name"]),
    field("belong", &["belong"]),
    field("rank", &["rank"]),
    field("dual_class", &["dual_class_name"]),
    field("f985", &["f985"]),
    field("f211", &["f211"]),
    field("is_dual_class", &["dual_class"]),
    field("central", &["central"]),
    field("nature", &["nature_name"]),
    field("view_month", &["view_month"]),
    field("view_total", &["view_total"]),
    field("view_week", &["view_week"]),
    field("alumni", &["alumni"]),
    field("city_id", &["city_id"]),
    field("county_id", &["county_id"]),
    field("province_id", &["province_id"]),
    field("type_id", &["type"]),
    field("level_id", &["level"]),
];

static SCHOOL_DETAIL: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("logo", &["logo"]),
    field("img", &["img"]),
    field("address", &["address"]),
    field("postcode", &["postcode"]),
    field("phone", &["phone"]),
    field("email", &["email"]),
    field("website", &["site", "school_site"]),
    field("tags", &["tags"]),
    field("feature", &["feature"]),
    field("school_feature", &["school_feature"]),
    field("academician", &["academician"]),
    field("national_feature", &["national_feature"]),
    field("key_discipline", &["key_discipline"]),
    field("master_degree", &["master_degree"]),
    field("doctor_degree", &["doctor_degree"]),
    field("recruit", &["recruit"]),
    field("admission_brochure", &["admissions_brochure"]),
    field("history", &["content"]),
    field("found_time", &["create_date"]),
    field("area", &["area"]),
    field("student_num", &["student_num"]),
    field("teacher_num", &["teacher_num"]),
    field("motto", &["motto"]),
    field("anniversary", &["anniversary"]),
    field("old_name", &["old_name"]),
    field("dorm_condition", &["dorm_condition"]),
    field("canteen_condition", &["canteen_condition"]),
    field("is_985", &["f985"]),
    field("is_211", &["f211"]),
    field("is_double_first_class", &["dual_class"]),
    field("has_graduate_school", &["graduate_school"]),
    field("has_independent_enrollment", &["independent_enrollment"]),
    field("subject_evaluate", &["subject_evaluate"]),
    field("dual_class_disciplines", &["dual_class_name_dict"]),
];

static SCHOOL_ENHANCED: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("label_list", &["label_list"]),
    field("recommend_master_level", &["recommend_master_level"]),
    field("is_top", &["is_top"]),
    field("attr_list", &["attr_list"]),
];

static MAJOR: &[FieldSpec] = &[
    field("special_id", &["special_id", "id"]),
    field("code", &["code", "special_code", "spcode"]),
    field("name", &["name", "special_name"]),
    field("level1_name", &["level1_name"]),
    field("level2_name", &["level2_name"]),
    field("level3_name", &["level3_name"]),
    field("degree", &["degree"]),
    field("years", &["years", "limit_year"]),
];

static SCORE_LINE: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("year", &["year"]),
    field("province", &["province_name", "local_province_name"]),
    field("batch", &["local_batch_name"]),
    field("type", &["local_type_name"]),
    field("major", &["spname", "special_name"]),
    field("major_code", &["spcode"]),
    field("min_score", &["min"]),
    field("avg_score", &["average", "avg"]),
    field("max_score", &["max"]),
    field("min_section", &["min_section"]),
    field("proscore", &["proscore"]),
    field("enrollment_count", &["sg_info", "zs_num"]),
];

static SCHOOL_SCORE: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("school_name", &["school_name"]),
    field("province_id", &["province_id"]),
    field("province", &["province"]),
    field("type", &["type"]),
    field("type_name", &["type_name"]),
    field("min_score", &["min"]),
    field("year", &["year"]),
    field("batch", &["batch"]),
    field("min_rank", &["min_section"]),
];

static PLAN: &[FieldSpec] = &[
    field("school_id", &["school_id"]),
    field("year", &["year"]),
    field("province_id", &["province_id"]),
    field("province", &["province"]),
    field("plan_type", &["plan_type"]),
    field("batch", &["local_batch_name"]),
    field("type", &["type"]),
    field("major", &["sp_name", "spname"]),
    field("major_code", &["spcode"]),
    field("major_group", &["sg_name"]),
    field("major_group_code", &["sg_code"]),
    field("major_group_info", &["sg_info"]),
    field("level1_name", &["level1_name"]),
    field("level2_name", &["level2_name"]),
    field("level3_name", &["level3_name"]),
    field("plan_number", &["num", "plan_num"]),
    field("years", &["length", "years"]),
    field("tuition", &["tuition"]),
    field("note", &["note", "remark"]),
];

/// `""` and `"-"` mean "upstream has the slot but nothing in it".
fn is_placeholder(value: &Value) -> bool {
    matches!(value, Value::String(s) if matches!(s.trim(), "" | "-"))
}

/// Resolve one field from a raw object.
///
/// The first alias holding a real value wins. If only placeholders are
/// present the first of them is kept as provided-but-empty. With no alias
/// present at all the field is unknown.
fn resolve(raw: &serde_json::Map<String, Value>, spec: &FieldSpec) -> Field {
    let mut placeholder = None;
    for alias in spec.aliases {
        match raw.get(*alias) {
            None | Some(Value::Null) => continue,
            Some(value) if is_placeholder(value) => {
                placeholder.get_or_insert(value);
            }
            Some(value) => return Field::Value(value.clone()),
        }
    }
    placeholder.map_or(Field::Unknown, |v| Field::Value(v.clone()))
}

/// Map a raw upstream item onto the canonical record of `entity`.
///
/// Every table field is present in the result, in table order. Anything
/// that is not a JSON object yields an all-unknown record.
pub fn normalize(raw: &Value, entity: EntityType) -> Record {
    let empty = serde_json::Map::new();
    let object = raw.as_object().unwrap_or(&empty);
    entity
        .fields()
        .iter()
        .map(|spec| (spec.name, resolve(object, spec)))
        .collect()
}

/// Entity id of a raw item, read through the same alias table.
pub fn raw_id(raw: &Value, entity: EntityType) -> Option<EntityId> {
    let id_field = entity.id_field();
    let spec = entity.fields().iter().find(|s| s.name == id_field)?;
    let object = raw.as_object()?;
    resolve(object, spec).as_value().and_then(EntityId::from_value)
}
