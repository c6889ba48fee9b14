use serde_json::Value;

use crate::filters::{is_control_key, FilterMap, PanelColumn};

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl SqlParam {
    fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(SqlParam::Text(s.clone())),
            Value::Bool(b) => Some(SqlParam::Integer(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(SqlParam::Integer)
                .or_else(|| n.as_f64().map(SqlParam::Real)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// Parameterized predicate over the `panel` table. The last parameter is
/// always the row cap.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelQuery {
    pub where_clause: String,
    pub params: Vec<SqlParam>,
}

impl PanelQuery {
    pub fn sql(&self) -> String {
        format!(
            "SELECT panel_id FROM panel WHERE {} LIMIT ?",
            self.where_clause
        )
    }
}

/// Build an equality / IN predicate from a column-keyed filter map.
///
/// Control keys, nulls, empty lists and unrecognized columns produce no
/// predicate. Non-scalar values are dropped as well, since they cannot be
/// bound; inside a list only the offending elements are skipped.
pub fn build_panel_query(filters: &FilterMap, limit: usize) -> PanelQuery {
    let mut predicates = Vec::new();
    let mut params = Vec::new();

    for (key, value) in filters {
        if is_control_key(key) || value.is_null() {
            continue;
        }

        let Some(column) = PanelColumn::from_column_name(key) else {
            tracing::debug!("Dropping filter on unrecognized column '{}'", key);
            continue;
        };

        match value {
            Value::Array(items) => {
                let bound: Vec<SqlParam> = items.iter().filter_map(SqlParam::from_scalar).collect();
                if bound.len() < items.len() {
                    tracing::debug!(
                        "Skipping {} unbindable element(s) in list filter on '{}'",
                        items.len() - bound.len(),
                        key
                    );
                }
                if bound.is_empty() {
                    continue;
                }
                let placeholders = vec!["?"; bound.len()].join(", ");
                predicates.push(format!("{} IN ({})", column.as_str(), placeholders));
                params.extend(bound);
            }
            scalar => {
                let Some(param) = SqlParam::from_scalar(scalar) else {
                    tracing::debug!("Dropping non-scalar filter on '{}'", key);
                    continue;
                };
                predicates.push(format!("{} = ?", column.as_str()));
                params.push(param);
            }
        }
    }

    let where_clause = if predicates.is_empty() {
        "1 = 1".to_string()
    } else {
        predicates.join(" AND ")
    };

    params.push(SqlParam::Integer(limit.min(i64::MAX as usize) as i64));

    PanelQuery {
        where_clause,
        params,
    }
}
