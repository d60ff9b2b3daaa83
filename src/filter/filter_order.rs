use serde_json::Value;

use super::error::FilterError;
use super::types::{SortDirection, SortSpec};

/// Parses sort requests in their accepted shapes:
/// `"created_at desc, name"`, `["created_at desc", "name asc"]`,
/// `{"created_at": "desc"}` or `[{"field": "name", "direction": "asc"}]`.
pub struct FilterOrder;

impl FilterOrder {
    pub fn parse(order: &Value) -> Result<Vec<SortSpec>, FilterError> {
        match order {
            Value::Null => Ok(vec![]),
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)?),
                        Value::Object(_) => out.push(serde_json::from_value(v.clone())?),
                        other => return Err(FilterError::InvalidSort(other.to_string())),
                    }
                }
                Ok(out)
            }
            Value::Object(obj) => {
                let mut out = Vec::new();
                for (field, dir) in obj {
                    let direction = Self::parse_direction(dir.as_str().unwrap_or("asc"))?;
                    out.push(SortSpec { field: Self::check_field(field)?, direction });
                }
                Ok(out)
            }
            other => Err(FilterError::InvalidSort(other.to_string())),
        }
    }

    fn parse_order_string(s: &str) -> Result<Vec<SortSpec>, FilterError> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            if let Some(field) = it.next() {
                let direction = Self::parse_direction(it.next().unwrap_or("asc"))?;
                if it.next().is_some() {
                    return Err(FilterError::InvalidSort(trimmed.to_string()));
                }
                out.push(SortSpec { field: Self::check_field(field)?, direction });
            }
        }
        Ok(out)
    }

    fn parse_direction(dir: &str) -> Result<SortDirection, FilterError> {
        if dir.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else if dir.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else {
            Err(FilterError::InvalidSort(format!("unknown direction '{}'", dir)))
        }
    }

    // Sort names end up in SQL identifiers
    fn check_field(field: &str) -> Result<String, FilterError> {
        let valid = !field.is_empty()
            && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if valid {
            Ok(field.to_string())
        } else {
            Err(FilterError::InvalidSort(format!("invalid field '{}'", field)))
        }
    }
}
