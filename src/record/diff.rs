use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use super::EntityRecord;

/// A single field change for the audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,    // Field didn't exist before
    Modified, // Field existed but value changed
    Removed,  // Field was cleared
}

/// Every data field of a new record as an addition
pub fn diff_created(record: &EntityRecord) -> Vec<FieldChange> {
    record
        .data
        .iter()
        .map(|(field, value)| FieldChange {
            field: field.clone(),
            old_value: None,
            new_value: Some(value.to_json()),
            change_type: ChangeType::Added,
        })
        .collect()
}

/// Top-level differences between two versions of a record, data fields in
/// name order followed by the deleted flag
pub fn diff_records(before: &EntityRecord, after: &EntityRecord) -> Vec<FieldChange> {
    let keys: BTreeSet<&String> = before.data.keys().chain(after.data.keys()).collect();

    let mut changes = Vec::new();
    for key in keys {
        let old_value = before.data.get(key).map(|v| v.to_json());
        let new_value = after.data.get(key).map(|v| v.to_json());
        let change_type = match (&old_value, &new_value) {
            (None, Some(_)) => ChangeType::Added,
            (Some(_), None) => ChangeType::Removed,
            (Some(old), Some(new)) if old != new => ChangeType::Modified,
            _ => continue,
        };
        changes.push(FieldChange { field: key.clone(), old_value, new_value, change_type });
    }

    if before.deleted != after.deleted {
        changes.push(FieldChange {
            field: "deleted".to_string(),
            old_value: Some(Value::Bool(before.deleted)),
            new_value: Some(Value::Bool(after.deleted)),
            change_type: ChangeType::Modified,
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::TypedValue;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_diff_records() {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TypedValue::from("Ann"));
        data.insert("age".to_string(), TypedValue::Number(30.0));
        let before = EntityRecord::new("t", "contacts", "u", Utc::now(), data);

        let mut after = before.clone();
        after.data.insert("name".into(), "Anne".into());
        after.data.remove("age");
        after.data.insert("city".into(), "Oslo".into());

        let changes = diff_records(&before, &after);
        let summary: Vec<(&str, ChangeType)> = changes.iter().map(|c| (c.field.as_str(), c.change_type)).collect();
        assert_eq!(
            summary,
            vec![("age", ChangeType::Removed), ("city", ChangeType::Added), ("name", ChangeType::Modified)]
        );
        assert_eq!(changes[2].old_value, Some(json!("Ann")));
    }

    #[test]
    fn test_diff_created_and_soft_delete() {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), TypedValue::from("Ann"));
        let before = EntityRecord::new("t", "contacts", "u", Utc::now(), data);
        assert_eq!(diff_created(&before).len(), 1);

        let mut after = before.clone();
        after.deleted = true;
        let changes = diff_records(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "deleted");
    }
}
