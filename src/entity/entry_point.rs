//! Entry point descriptors
//!
//! An entry point is the opaque connection descriptor a service publishes
//! for dependent services to consume: a string-keyed map carrying at least
//! a `type` key naming the personality, plus personality-specific
//! connection data (seed address, volume name, master hostname, ...).
//! Dependent personalities may embed upstream entry points under nested
//! keys to propagate multi-hop dependencies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque connection descriptor published by a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryPoint(BTreeMap<String, Value>);

impl EntryPoint {
    /// Create an entry point for the given personality type.
    pub fn new(personality_type: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert("type".to_string(), Value::String(personality_type.to_string()));
        Self(map)
    }

    /// The personality type this entry point was published by.
    pub fn personality_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Embed another entry point under a nested key (multi-hop
    /// dependency propagation, e.g. a `db` key inside a compute layer's
    /// entry point).
    pub fn embed(&mut self, key: &str, upstream: &EntryPoint) {
        self.0.insert(
            key.to_string(),
            Value::Object(upstream.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Merge entry points in order into a single map. Key collisions resolve
/// last-writer-wins: a key appearing in a later entry point overwrites the
/// earlier value.
pub fn merge_entry_points(ordered: &[EntryPoint]) -> EntryPoint {
    let mut out = EntryPoint::default();
    for ep in ordered {
        for (k, v) in ep.iter() {
            out.0.insert(k.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_carries_type() {
        let ep = EntryPoint::new("mongodb");
        assert_eq!(ep.personality_type(), Some("mongodb"));
    }

    #[test]
    fn test_embed_nested() {
        let mut db = EntryPoint::new("mongodb");
        db.set("ip", "10.0.0.2");

        let mut compute = EntryPoint::new("hadoop");
        compute.embed("db", &db);

        let nested = compute.get("db").unwrap();
        assert_eq!(nested["type"], "mongodb");
        assert_eq!(nested["ip"], "10.0.0.2");
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut a = EntryPoint::new("gluster");
        a.set("volume", "vol0");
        a.set("shared", "from-a");

        let mut b = EntryPoint::new("hadoop");
        b.set("master", "hadoop-0");
        b.set("shared", "from-b");

        let merged = merge_entry_points(&[a, b]);
        assert_eq!(merged.get_str("type"), Some("hadoop"));
        assert_eq!(merged.get_str("volume"), Some("vol0"));
        assert_eq!(merged.get_str("master"), Some("hadoop-0"));
        assert_eq!(merged.get_str("shared"), Some("from-b"));
    }

    #[test]
    fn test_merge_empty() {
        let merged = merge_entry_points(&[]);
        assert!(merged.is_empty());
    }
}
