//! Subscription records and their registration body.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

fn default_version() -> String {
    "1".to_string()
}

/// One subscription an account holds. Equal records are the same
/// subscription regardless of condition key order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Subscription type, e.g. `channel.follow`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Subscription version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Filter, e.g. `{"broadcaster_user_id": "1337"}`.
    #[serde(default)]
    pub condition: BTreeMap<String, String>,
}

impl SubscriptionRecord {
    /// Record with the default version.
    pub fn new(kind: impl Into<String>, condition: BTreeMap<String, String>) -> Self {
        Self {
            kind: kind.into(),
            version: default_version(),
            condition,
        }
    }

    /// Body of the registration request for WebSocket delivery.
    pub fn registration_body(&self, session_id: &str) -> Value {
        json!({
            "type": self.kind,
            "version": self.version,
            "condition": self.condition,
            "transport": {
                "method": "websocket",
                "session_id": session_id,
            },
        })
    }
}

/// Insertion-ordered set of records.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    records: Vec<SubscriptionRecord>,
}

impl SubscriptionSet {
    /// Whether an equal record is held.
    pub fn contains(&self, record: &SubscriptionRecord) -> bool {
        self.records.contains(record)
    }

    /// Append unless already held. Returns whether it was added.
    pub fn insert(&mut self, record: SubscriptionRecord) -> bool {
        if self.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Records in insertion order.
    pub fn to_vec(&self) -> Vec<SubscriptionRecord> {
        self.records.clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn version_defaults_to_one() {
        let record: SubscriptionRecord = serde_json::from_value(json!({
            "type": "channel.follow",
            "condition": {"broadcaster_user_id": "1"}
        }))
        .unwrap();
        assert_eq!(record.version, "1");
    }

    #[test]
    fn equality_ignores_condition_order() {
        let a: SubscriptionRecord = serde_json::from_str(
            r#"{"type":"t","version":"2","condition":{"a":"1","b":"2"}}"#,
        )
        .unwrap();
        let b: SubscriptionRecord = serde_json::from_str(
            r#"{"type":"t","version":"2","condition":{"b":"2","a":"1"}}"#,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn registration_body_shape() {
        let record = SubscriptionRecord::new("channel.follow", condition(&[("broadcaster_user_id", "1337")]));
        let body = record.registration_body("s1");
        assert_eq!(body["type"], "channel.follow");
        assert_eq!(body["version"], "1");
        assert_eq!(body["condition"]["broadcaster_user_id"], "1337");
        assert_eq!(body["transport"]["method"], "websocket");
        assert_eq!(body["transport"]["session_id"], "s1");
    }

    #[test]
    fn set_rejects_duplicates_and_keeps_order() {
        let mut set = SubscriptionSet::default();
        let a = SubscriptionRecord::new("a", BTreeMap::new());
        let b = SubscriptionRecord::new("b", BTreeMap::new());
        assert!(set.insert(a.clone()));
        assert!(set.insert(b.clone()));
        assert!(!set.insert(a.clone()));
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_vec(), vec![a, b]);
    }

    #[test]
    fn version_distinguishes_records() {
        let mut set = SubscriptionSet::default();
        let mut v2 = SubscriptionRecord::new("a", BTreeMap::new());
        v2.version = "2".into();
        assert!(set.insert(SubscriptionRecord::new("a", BTreeMap::new())));
        assert!(set.insert(v2));
    }
}
