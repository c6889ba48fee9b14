use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Search constraints keyed by field name. Values are scalars, lists of
/// scalars, null, or control values such as `limit`.
pub type FilterMap = BTreeMap<String, Value>;

/// Keys that configure the search itself and never name a storage column.
pub const CONTROL_KEYS: [&str; 8] = [
    "limit",
    "mode",
    "match_strategy",
    "allow_null_fields",
    "exact_match",
    "minimum_match_ratio",
    "sort_by",
    "similarity_threshold",
];

pub const REGION_FIELD: &str = "region";
pub const RESIDENCE_COLUMN: &str = "residence";

pub fn is_control_key(key: &str) -> bool {
    CONTROL_KEYS.contains(&key)
}

/// Categorical columns of the `panel` table. This is the only set of
/// identifiers ever interpolated into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelColumn {
    AgeGroup,
    Gender,
    Residence,
    Occupation,
    MaritalStatus,
    PhoneBrand,
    CarBrand,
}

impl PanelColumn {
    pub const ALL: [PanelColumn; 7] = [
        PanelColumn::AgeGroup,
        PanelColumn::Gender,
        PanelColumn::Residence,
        PanelColumn::Occupation,
        PanelColumn::MaritalStatus,
        PanelColumn::PhoneBrand,
        PanelColumn::CarBrand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PanelColumn::AgeGroup => "age_group",
            PanelColumn::Gender => "gender",
            PanelColumn::Residence => "residence",
            PanelColumn::Occupation => "occupation",
            PanelColumn::MaritalStatus => "marital_status",
            PanelColumn::PhoneBrand => "phone_brand",
            PanelColumn::CarBrand => "car_brand",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|column| column.as_str() == name)
    }

    /// Name used in stats and charts. Only `residence` differs.
    pub fn presentation_name(&self) -> &'static str {
        match self {
            PanelColumn::Residence => REGION_FIELD,
            other => other.as_str(),
        }
    }

    pub fn from_presentation_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|column| column.presentation_name() == name)
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            PanelColumn::AgeGroup => "Age group",
            PanelColumn::Gender => "Gender",
            PanelColumn::Residence => "Region",
            PanelColumn::Occupation => "Occupation",
            PanelColumn::MaritalStatus => "Marital status",
            PanelColumn::PhoneBrand => "Phone brand",
            PanelColumn::CarBrand => "Car brand",
        }
    }
}

/// Translate semantic field names into `panel` column names. A `region`
/// value always lands on `residence`, replacing any explicit `residence`.
pub fn map_filters_to_columns(filters: &FilterMap) -> FilterMap {
    let mut mapped: FilterMap = filters
        .iter()
        .filter(|(key, _)| key.as_str() != REGION_FIELD)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(region) = filters.get(REGION_FIELD) {
        mapped.insert(RESIDENCE_COLUMN.to_string(), region.clone());
    }
    mapped
}

/// Read the `limit` control key as a positive row cap.
pub fn requested_limit(filters: &FilterMap) -> Option<usize> {
    match filters.get("limit")? {
        Value::Number(n) => n.as_u64().map(|v| v as usize).filter(|v| *v > 0),
        Value::String(s) => s.trim().parse::<usize>().ok().filter(|v| *v > 0),
        _ => None,
    }
}
