//! Tamper-evident audit entries.
//!
//! Each entry is hashed over a canonical JSON rendering of its fields plus
//! the previous entry's hash, so editing, deleting or reordering rows breaks
//! the chain from that point on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::types::timestamp;
use crate::types::{AuditEntry, AuditEvent};

/// `prev_hash` of the first entry in the log.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Serialize)]
struct Canonical<'a> {
    timestamp: String,
    user_id: Option<i64>,
    action: &'a str,
    resource_type: &'a str,
    resource_id: Option<&'a str>,
    outcome: &'a str,
    details: Value,
    prev_hash: &'a str,
}

/// Rebuild objects with keys in sorted order, recursively.
fn canonical_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), canonical_value(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

pub fn canonical_bytes(entry: &AuditEntry) -> Vec<u8> {
    let canonical = Canonical {
        timestamp: timestamp::encode(&entry.timestamp),
        user_id: entry.user_id,
        action: &entry.action,
        resource_type: &entry.resource_type,
        resource_id: entry.resource_id.as_deref(),
        outcome: entry.outcome.as_str(),
        details: canonical_value(&entry.details),
        prev_hash: &entry.prev_hash,
    };
    // Serializing plain strings/numbers/Value cannot fail.
    serde_json::to_vec(&canonical).unwrap_or_default()
}

pub fn compute_hash(entry: &AuditEntry) -> String {
    hex::encode(Sha256::digest(canonical_bytes(entry)))
}

/// Turn an event into an entry chained onto `prev_hash`. `id` is assigned on insert.
pub fn seal(event: AuditEvent, at: DateTime<Utc>, prev_hash: &str) -> AuditEntry {
    let mut entry = AuditEntry {
        id: 0,
        timestamp: at,
        user_id: event.user_id,
        action: event.action,
        resource_type: event.resource_type,
        resource_id: event.resource_id,
        outcome: event.outcome,
        details: event.details,
        prev_hash: prev_hash.to_string(),
        integrity_hash: String::new(),
    };
    entry.integrity_hash = compute_hash(&entry);
    entry
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub total: usize,
    pub verified: usize,
    /// Entries whose stored hash does not match their content.
    pub tampered: Vec<i64>,
    /// Entries whose `prev_hash` does not point at the preceding entry.
    pub broken_links: Vec<i64>,
    pub valid: bool,
}

/// Verify hashes and links of entries given in chain order.
pub fn verify_chain(entries: &[AuditEntry]) -> IntegrityReport {
    let mut tampered = Vec::new();
    let mut broken_links = Vec::new();
    let mut expected_prev = GENESIS_HASH.to_string();

    for entry in entries {
        let computed = compute_hash(entry);
        let hash_ok: bool = computed
            .as_bytes()
            .ct_eq(entry.integrity_hash.as_bytes())
            .into();
        if !hash_ok {
            tampered.push(entry.id);
        }
        let link_ok: bool = expected_prev
            .as_bytes()
            .ct_eq(entry.prev_hash.as_bytes())
            .into();
        if !link_ok {
            broken_links.push(entry.id);
        }
        expected_prev = entry.integrity_hash.clone();
    }

    let verified = entries
        .iter()
        .filter(|e| !tampered.contains(&e.id) && !broken_links.contains(&e.id))
        .count();
    let valid = tampered.is_empty() && broken_links.is_empty();

    IntegrityReport {
        total: entries.len(),
        verified,
        tampered,
        broken_links,
        valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(n: usize) -> Vec<AuditEntry> {
        let mut prev = GENESIS_HASH.to_string();
        let mut out = Vec::new();
        for i in 0..n {
            let event = AuditEvent::new("equipment.register", "equipment")
                .resource(i)
                .details(json!({"serial": format!("SN-{i}"), "a": 1}));
            let mut e = seal(event, timestamp::now(), &prev);
            e.id = i as i64 + 1;
            prev = e.integrity_hash.clone();
            out.push(e);
        }
        out
    }

    #[test]
    fn hash_ignores_key_order_in_details() {
        let t = timestamp::now();
        let a = seal(
            AuditEvent::new("x", "y").details(json!({"b": 2, "a": {"d": 1, "c": 0}})),
            t,
            GENESIS_HASH,
        );
        let b = seal(
            AuditEvent::new("x", "y").details(json!({"a": {"c": 0, "d": 1}, "b": 2})),
            t,
            GENESIS_HASH,
        );
        assert_eq!(a.integrity_hash, b.integrity_hash);
        assert_eq!(a.integrity_hash.len(), 64);
    }

    #[test]
    fn intact_chain_verifies() {
        let report = verify_chain(&chain(5));
        assert!(report.valid);
        assert_eq!(report.total, 5);
        assert_eq!(report.verified, 5);
    }

    #[test]
    fn edited_entry_is_flagged_as_tampered() {
        let mut entries = chain(4);
        entries[2].details = json!({"serial": "forged"});
        let report = verify_chain(&entries);
        assert!(!report.valid);
        assert_eq!(report.tampered, vec![3]);
        assert!(report.broken_links.is_empty());
    }

    #[test]
    fn deleted_entry_breaks_the_link() {
        let mut entries = chain(4);
        entries.remove(1);
        let report = verify_chain(&entries);
        assert!(!report.valid);
        assert!(report.tampered.is_empty());
        assert_eq!(report.broken_links, vec![3]);
    }
}
