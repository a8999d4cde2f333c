// src/models/province.rs

//! Province and subject-type lookup tables.

/// Provincial-level region codes used by the upstream static resources.
pub const PROVINCES: &[(&str, &str)] = &[
    ("11", "北京"),
    ("12", "天津"),
    ("13", "河北"),
    ("14", "山西"),
    ("15", "内蒙古"),
    ("21", "辽宁"),
    ("22", "吉林"),
    ("23", "黑龙江"),
    ("31", "上海"),
    ("32", "江苏"),
    ("33", "浙江"),
    ("34", "安徽"),
    ("35", "福建"),
    ("36", "江西"),
    ("37", "山东"),
    ("41", "河南"),
    ("42", "湖北"),
    ("43", "湖南"),
    ("44", "广东"),
    ("45", "广西"),
    ("46", "海南"),
    ("50", "重庆"),
    ("51", "四川"),
    ("52", "贵州"),
    ("53", "云南"),
    ("54", "西藏"),
    ("61", "陕西"),
    ("62", "甘肃"),
    ("63", "青海"),
    ("64", "宁夏"),
    ("65", "新疆"),
    ("71", "台湾"),
    ("81", "香港"),
    ("82", "澳门"),
];

/// All province codes in table order.
pub fn province_ids() -> Vec<String> {
    PROVINCES.iter().map(|(id, _)| id.to_string()).collect()
}

/// Display name for a province code; unknown codes get a generic label.
pub fn province_name(id: &str) -> String {
    PROVINCES
        .iter()
        .find(|(code, _)| *code == id)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("省份{id}"))
}

/// Display name for a subject-type code (文科/理科/...).
pub fn subject_type_name(code: &str) -> String {
    match code {
        "1" => "文科".to_string(),
        "2" => "理科".to_string(),
        "3" => "综合".to_string(),
        "4" => "物理类".to_string(),
        "5" => "历史类".to_string(),
        other => format!("类型{other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_provinces() {
        assert_eq!(province_name("44"), "广东");
        assert_eq!(province_name("99"), "省份99");
        assert_eq!(province_ids().len(), PROVINCES.len());
    }

    #[test]
    fn subject_types() {
        assert_eq!(subject_type_name("2"), "理科");
        assert_eq!(subject_type_name("7"), "类型7");
    }
}
