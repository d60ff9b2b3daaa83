// Raw JSON -> TypedValue conversion per field type
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

use super::error::{ValidationError, ValidationKind};
use super::value::TypedValue;
use crate::schema::{FieldDefinition, FieldType};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9 ().\-]{7,20}$").expect("valid phone regex"));

/// Convert a raw payload or filter value into the field's typed form.
///
/// `Ok(None)` means the value is absent: JSON null for every type, and the
/// empty string for everything except text/textarea. Pure; lookup existence
/// is checked separately by `Validator`.
pub fn convert_value(field: &FieldDefinition, raw: &Value) -> Result<Option<TypedValue>, ValidationError> {
    if raw.is_null() {
        return Ok(None);
    }
    if let Value::String(s) = raw {
        if s.is_empty() && !field.field_type.keeps_empty_string() {
            return Ok(None);
        }
    }

    let value = match field.field_type {
        FieldType::Text | FieldType::Textarea => TypedValue::Text(
            to_text(raw).ok_or_else(|| ValidationError::invalid_type(field, "text value"))?,
        ),
        FieldType::Number => TypedValue::Number(
            parse_number(raw).ok_or_else(|| ValidationError::invalid_type(field, "number"))?,
        ),
        FieldType::Boolean => TypedValue::Bool(
            parse_bool(raw).ok_or_else(|| ValidationError::invalid_type(field, "boolean"))?,
        ),
        FieldType::Date => TypedValue::Date(
            raw.as_str()
                .and_then(parse_date)
                .ok_or_else(|| ValidationError::invalid_format(field, "ISO-8601 date"))?,
        ),
        FieldType::Email => {
            let s = require_str(field, raw)?;
            if !EMAIL_RE.is_match(s) {
                return Err(ValidationError::invalid_format(field, "email address"));
            }
            TypedValue::Text(s.to_string())
        }
        FieldType::Url => {
            let s = require_str(field, raw)?;
            if !is_web_url(s) {
                return Err(ValidationError::invalid_format(field, "http(s) URL"));
            }
            TypedValue::Text(s.to_string())
        }
        FieldType::Phone => {
            let s = require_str(field, raw)?;
            if !PHONE_RE.is_match(s) {
                return Err(ValidationError::invalid_format(field, "phone number"));
            }
            TypedValue::Text(s.to_string())
        }
        FieldType::Currency => TypedValue::Currency(
            parse_decimal(raw).ok_or_else(|| ValidationError::invalid_type(field, "currency amount"))?,
        ),
        FieldType::Select => {
            let s = require_str(field, raw)?;
            check_option(field, s)?;
            TypedValue::Text(s.to_string())
        }
        FieldType::Multiselect => {
            let items = split_values(raw);
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                let s = item
                    .as_str()
                    .ok_or_else(|| ValidationError::invalid_type(field, "list of text values"))?;
                check_option(field, s)?;
                out.push(TypedValue::Text(s.to_string()));
            }
            TypedValue::List(out)
        }
        FieldType::Lookup => {
            let id = reference_id(raw).ok_or_else(|| ValidationError::invalid_type(field, "record identifier"))?;
            let uuid = Uuid::parse_str(id).map_err(|_| ValidationError::invalid_format(field, "record identifier"))?;
            TypedValue::Ref(uuid.to_string())
        }
        FieldType::File | FieldType::Image => {
            let id = reference_id(raw).ok_or_else(|| ValidationError::invalid_type(field, "file identifier"))?;
            if id.trim().is_empty() {
                return Err(ValidationError::invalid_format(field, "file identifier"));
            }
            TypedValue::Ref(id.to_string())
        }
        FieldType::Other => TypedValue::Json(raw.clone()),
    };

    Ok(Some(value))
}

/// Parse an ISO-8601 timestamp, a naive `YYYY-MM-DDTHH:MM:SS`, or a plain
/// `YYYY-MM-DD` date (midnight UTC)
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

pub fn parse_number(raw: &Value) -> Option<f64> {
    let n = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Accepts the same spellings as Go's strconv.ParseBool
pub fn parse_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_decimal(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Split an array or comma-delimited string into individual values
pub fn split_values(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Identifier from a raw id string or an already-populated display object
pub fn reference_id(raw: &Value) -> Option<&str> {
    match raw {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("id").or_else(|| map.get("_id")).and_then(Value::as_str),
        _ => None,
    }
}

fn to_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn require_str<'v>(field: &FieldDefinition, raw: &'v Value) -> Result<&'v str, ValidationError> {
    raw.as_str().ok_or_else(|| ValidationError::invalid_type(field, "text value"))
}

fn check_option(field: &FieldDefinition, value: &str) -> Result<(), ValidationError> {
    match &field.options {
        Some(options) if !options.is_empty() && !options.iter().any(|o| o == value) => Err(
            ValidationError::new(field, ValidationKind::InvalidOption { allowed: options.clone() }),
        ),
        _ => Ok(()),
    }
}

fn is_web_url(s: &str) -> bool {
    match url::Url::parse(s) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn field(field_type: FieldType) -> FieldDefinition {
        FieldDefinition::new("f", field_type).label("Field")
    }

    fn convert(field_type: FieldType, raw: Value) -> Result<Option<TypedValue>, ValidationError> {
        convert_value(&field(field_type), &raw)
    }

    #[test]
    fn test_null_and_empty() {
        assert_eq!(convert(FieldType::Number, Value::Null).unwrap(), None);
        assert_eq!(convert(FieldType::Number, json!("")).unwrap(), None);
        assert_eq!(convert(FieldType::Date, json!("")).unwrap(), None);
        assert_eq!(
            convert(FieldType::Text, json!("")).unwrap(),
            Some(TypedValue::Text(String::new()))
        );
    }

    #[test]
    fn test_number() {
        assert_eq!(convert(FieldType::Number, json!(42)).unwrap(), Some(TypedValue::Number(42.0)));
        assert_eq!(convert(FieldType::Number, json!(" 3.5 ")).unwrap(), Some(TypedValue::Number(3.5)));

        let err = convert(FieldType::Number, json!("forty")).unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidType { expected: "number" });
        assert_eq!(err.label, "Field");
        assert!(convert(FieldType::Number, json!("NaN")).is_err());
        assert!(convert(FieldType::Number, json!(true)).is_err());
    }

    #[test]
    fn test_boolean() {
        assert_eq!(convert(FieldType::Boolean, json!(true)).unwrap(), Some(TypedValue::Bool(true)));
        assert_eq!(convert(FieldType::Boolean, json!("F")).unwrap(), Some(TypedValue::Bool(false)));
        assert!(convert(FieldType::Boolean, json!("yes")).is_err());
        assert!(convert(FieldType::Boolean, json!(1)).is_err());
    }

    #[test]
    fn test_date_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
        assert_eq!(
            convert(FieldType::Date, json!("2024-05-17")).unwrap(),
            Some(TypedValue::Date(midnight))
        );
        assert_eq!(
            convert(FieldType::Date, json!("2024-05-17T02:00:00+02:00")).unwrap(),
            Some(TypedValue::Date(midnight))
        );
        assert_eq!(
            convert(FieldType::Date, json!("2024-05-17T00:00:00")).unwrap(),
            Some(TypedValue::Date(midnight))
        );

        let err = convert(FieldType::Date, json!("17/05/2024")).unwrap_err();
        assert!(matches!(err.kind, ValidationKind::InvalidFormat { .. }));
    }

    #[test]
    fn test_email_url_phone() {
        assert!(convert(FieldType::Email, json!("ann@example.com")).is_ok());
        let err = convert(FieldType::Email, json!("ann@")).unwrap_err();
        assert!(matches!(err.kind, ValidationKind::InvalidFormat { .. }));

        assert!(convert(FieldType::Url, json!("https://example.com/a")).is_ok());
        assert!(convert(FieldType::Url, json!("ftp://example.com")).is_err());
        assert!(convert(FieldType::Url, json!("example.com")).is_err());

        assert!(convert(FieldType::Phone, json!("+1 (555) 010-9999")).is_ok());
        assert!(convert(FieldType::Phone, json!("call me")).is_err());
    }

    #[test]
    fn test_currency() {
        assert_eq!(
            convert(FieldType::Currency, json!("19.99")).unwrap(),
            Some(TypedValue::Currency(Decimal::new(1999, 2)))
        );
        assert_eq!(
            convert(FieldType::Currency, json!(5)).unwrap(),
            Some(TypedValue::Currency(Decimal::new(5, 0)))
        );
        assert!(convert(FieldType::Currency, json!("five")).is_err());
    }

    #[test]
    fn test_select_options() {
        let stage = FieldDefinition::new("stage", FieldType::Select).options(["new", "won"]);
        assert!(convert_value(&stage, &json!("won")).is_ok());
        let err = convert_value(&stage, &json!("lost")).unwrap_err();
        assert!(matches!(err.kind, ValidationKind::InvalidOption { .. }));

        let tags = FieldDefinition::new("tags", FieldType::Multiselect).options(["a", "b", "c"]);
        assert_eq!(
            convert_value(&tags, &json!("a, c")).unwrap(),
            Some(TypedValue::List(vec!["a".into(), "c".into()]))
        );
        assert!(convert_value(&tags, &json!(["a", "z"])).is_err());
    }

    #[test]
    fn test_references_accept_populated_objects() {
        let id = Uuid::new_v4().to_string();
        let owner = FieldDefinition::new("owner", FieldType::Lookup).lookup("users", "name");
        assert_eq!(
            convert_value(&owner, &json!(id)).unwrap(),
            Some(TypedValue::Ref(id.clone()))
        );
        assert_eq!(
            convert_value(&owner, &json!({"id": id, "display_label": "Ann"})).unwrap(),
            Some(TypedValue::Ref(id.clone()))
        );
        assert!(convert_value(&owner, &json!("not-an-id")).is_err());

        let avatar = FieldDefinition::new("avatar", FieldType::Image);
        assert_eq!(
            convert_value(&avatar, &json!({"id": "f-1", "original_name": "a.png", "url": "/files/f-1"})).unwrap(),
            Some(TypedValue::Ref("f-1".into()))
        );
    }

    #[test]
    fn test_unknown_type_passes_through() {
        assert_eq!(
            convert(FieldType::Other, json!({"x": 1})).unwrap(),
            Some(TypedValue::Json(json!({"x": 1})))
        );
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let cases = vec![
            (field(FieldType::Text), json!("hello")),
            (field(FieldType::Textarea), json!(12)),
            (field(FieldType::Number), json!("18")),
            (field(FieldType::Number), json!(0.25)),
            (field(FieldType::Boolean), json!("true")),
            (field(FieldType::Date), json!("2024-02-29")),
            (field(FieldType::Date), json!("2024-02-29T10:11:12.345+01:00")),
            (field(FieldType::Email), json!("a.b@example.org")),
            (field(FieldType::Url), json!("http://example.org/x?y=1")),
            (field(FieldType::Phone), json!("555-0100")),
            (field(FieldType::Currency), json!("10.50")),
            (FieldDefinition::new("s", FieldType::Select).options(["x", "y"]), json!("y")),
            (FieldDefinition::new("m", FieldType::Multiselect), json!("x,y")),
            (
                FieldDefinition::new("l", FieldType::Lookup).lookup("users", "name"),
                json!({"id": Uuid::new_v4().to_string(), "display_label": "Z"}),
            ),
            (field(FieldType::File), json!("file-123")),
            (field(FieldType::Other), json!([1, "two"])),
        ];

        for (field, raw) in cases {
            let first = convert_value(&field, &raw).unwrap().unwrap();
            let second = convert_value(&field, &first.to_json()).unwrap().unwrap();
            assert_eq!(first, second, "conversion not stable for {:?}", field.field_type);
        }
    }
}
