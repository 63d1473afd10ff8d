//! Campaign record shape and filter evaluation.
//!
//! A [`FilterExpression`] is a MongoDB-style JSON object: field names map to a
//! literal (equality) or to an operator object such as `{"$gt": 1000}`.
//! [`matches`] evaluates a filter against one document for stores that have
//! no native query engine.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field-to-constraint mapping. `{}` matches every record.
pub type FilterExpression = Map<String, Value>;

/// Every field a campaign record carries, in schema order.
pub const CAMPAIGN_FIELDS: [&str; 12] = [
    "campaign_id",
    "name",
    "channel",
    "region",
    "objective",
    "status",
    "date",
    "spend",
    "impressions",
    "clicks",
    "ctr",
    "conversions",
];

/// One marketing campaign as stored in the `campaigns` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub campaign_id: String,
    pub name: String,
    pub channel: String,
    pub region: String,
    pub objective: String,
    pub status: String,
    /// `YYYY-MM-DD`; compares correctly as text.
    pub date: String,
    pub spend: f64,
    pub impressions: i64,
    pub clicks: i64,
    /// Click-through rate as a percentage, e.g. `4.91`.
    pub ctr: f64,
    pub conversions: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("unsupported filter operator '{0}'")]
    UnsupportedOperator(String),

    #[error("malformed filter: {0}")]
    Malformed(String),
}

/// Top-level and nested field names that are not part of the campaign schema.
pub fn unknown_fields(filter: &FilterExpression) -> Vec<String> {
    let mut unknown = Vec::new();
    for (key, condition) in filter {
        if key == "$and" || key == "$or" {
            if let Some(subs) = condition.as_array() {
                for sub in subs.iter().filter_map(Value::as_object) {
                    unknown.extend(unknown_fields(sub));
                }
            }
        } else if !key.starts_with('$') && !CAMPAIGN_FIELDS.contains(&key.as_str()) {
            unknown.push(key.clone());
        }
    }
    unknown
}

/// Check operator names and operand shapes without touching any document.
pub fn validate_filter(filter: &FilterExpression) -> Result<(), FilterError> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" => {
                for sub in sub_filters(key, condition)? {
                    validate_filter(sub)?;
                }
            }
            op if op.starts_with('$') => return Err(FilterError::UnsupportedOperator(op.into())),
            _ => {
                if let Value::Object(ops) = condition
                    && ops.keys().any(|k| k.starts_with('$'))
                {
                    for (op, operand) in ops {
                        apply_operator(None, op, operand)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Evaluate `filter` against a single document.
pub fn matches(doc: &Map<String, Value>, filter: &FilterExpression) -> Result<bool, FilterError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => return Err(FilterError::UnsupportedOperator(op.into())),
            field => field_matches(doc.get(field), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> Result<Vec<&'a FilterExpression>, FilterError> {
    let items = condition
        .as_array()
        .ok_or_else(|| FilterError::Malformed(format!("{op} expects an array of filters")))?;
    if items.is_empty() {
        return Err(FilterError::Malformed(format!("{op} needs at least one filter")));
    }
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| FilterError::Malformed(format!("{op} entries must be objects")))
        })
        .collect()
}

fn field_matches(value: Option<&Value>, condition: &Value) -> Result<bool, FilterError> {
    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            for (op, operand) in ops {
                if !apply_operator(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(value.is_some_and(|v| values_equal(v, literal))),
    }
}

fn apply_operator(value: Option<&Value>, op: &str, operand: &Value) -> Result<bool, FilterError> {
    let ordering = || value.and_then(|v| compare(v, operand));
    match op {
        "$eq" => Ok(value.is_some_and(|v| values_equal(v, operand))),
        "$ne" => Ok(!value.is_some_and(|v| values_equal(v, operand))),
        "$gt" => Ok(ordering() == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))),
        "$lt" => Ok(ordering() == Some(Ordering::Less)),
        "$lte" => Ok(matches!(ordering(), Some(Ordering::Less | Ordering::Equal))),
        "$in" | "$nin" => {
            let candidates = operand
                .as_array()
                .ok_or_else(|| FilterError::Malformed(format!("{op} expects an array")))?;
            let found = value.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)));
            Ok(if op == "$in" { found } else { !found })
        }
        other => Err(FilterError::UnsupportedOperator(other.to_string())),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// Numbers compare with numbers and strings with strings; anything else never matches.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
