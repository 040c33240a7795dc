//! Core data model: `Event`, `Filter`, `RelayUrl` and the canonical
//! fingerprint used as cache and single-flight key (spec.md §3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// 32-byte event identifier, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub [u8; 32]);

impl EventId {
    pub fn from_hex(s: &str) -> Result<Self, ModelError> {
        if s.len() != 64 {
            return Err(ModelError::InvalidHex("event id must be 64 hex chars"));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| ModelError::InvalidHex("event id"))?;
        Ok(Self(out))
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl Serialize for EventId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        EventId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte author public key, hex-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    pub fn from_hex(s: &str) -> Result<Self, ModelError> {
        if s.len() != 64 {
            return Err(ModelError::InvalidHex("pubkey must be 64 hex chars"));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(|_| ModelError::InvalidHex("pubkey"))?;
        Ok(Self(out))
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self.to_hex())
    }
}

impl Serialize for PubKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        PubKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 64-byte BIP-340 Schnorr signature.
#[derive(Clone, Copy)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_hex(s: &str) -> Result<Self, ModelError> {
        if s.len() != 128 {
            return Err(ModelError::InvalidHex("signature must be 128 hex chars"));
        }
        let mut out = [0u8; 64];
        hex::decode_to_slice(s, &mut out).map_err(|_| ModelError::InvalidHex("signature"))?;
        Ok(Self(out))
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid hex: {0}")]
    InvalidHex(&'static str),
    #[error("limit out of range: must be 1..=200")]
    LimitOutOfRange,
}

/// A non-empty tag: `["e", "<id>", "wss://relay"]` etc.
pub type Tag = Vec<String>;

/// An immutable, content-addressed event record (spec.md §3).
///
/// Two instances with the same `id` are considered equal; `relays_seen` is
/// the only field mutated after construction, and only under the lock of the
/// collection that owns it (the Fan-Out union map, spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: PubKey,
    pub sig: Signature,
    pub kind: u32,
    pub created_at: i64,
    pub content: String,
    pub tags: Vec<Tag>,
    #[serde(skip, default)]
    pub relays_seen: HashSet<crate::relay_url::RelayUrl>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Event {
    /// Canonical ordering: `(created_at DESC, id DESC)`, id compared as
    /// lowercased hex (spec.md §4.5 "Tie-breaks").
    pub fn order_key(&self) -> (i64, [u8; 32]) {
        (self.created_at, self.id.0)
    }

    /// Returns the first value of the named tag (`#e`, `#p`, ...), if any.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(|n| n.as_str()) == Some(name))
            .and_then(|t| t.get(1))
            .map(|s| s.as_str())
    }
}

/// Sort events by `(created_at DESC, id DESC)` — the total order spec.md
/// §4.5 and §8 require everywhere results are returned.
pub fn sort_desc(events: &mut [Event]) {
    events.sort_by(|a, b| {
        let (at, aid) = a.order_key();
        let (bt, bid) = b.order_key();
        bt.cmp(&at).then_with(|| bid.cmp(&aid))
    });
}

/// A single `#<tag>` filter constraint: tag name plus allowed values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter {
    pub name: String,
    pub values: Vec<String>,
}

/// Query criteria — also the cache / single-flight key once fingerprinted
/// (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<EventId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<PubKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    pub limit: u16,
}

/// Stable hash over the filter's sorted sets (spec.md §3, §8
/// "Fingerprint stability"): author-list order must not affect the result.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(self.0))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Filter {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.limit == 0 || self.limit > 200 {
            return Err(ModelError::LimitOutOfRange);
        }
        Ok(())
    }

    /// Canonical fingerprint: sort every set before hashing so logically
    /// identical filters collapse to the same key regardless of input order.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();

        let mut ids: Vec<String> = self
            .ids
            .as_ref()
            .map(|v| v.iter().map(|i| i.to_hex()).collect())
            .unwrap_or_default();
        ids.sort();
        hash_str_list(&mut hasher, "ids", &ids);

        let mut authors: Vec<String> = self
            .authors
            .as_ref()
            .map(|v| v.iter().map(|a| a.to_hex()).collect())
            .unwrap_or_default();
        authors.sort();
        hash_str_list(&mut hasher, "authors", &authors);

        let mut kinds: Vec<u32> = self.kinds.clone().unwrap_or_default();
        kinds.sort_unstable();
        hasher.update(b"kinds");
        for k in &kinds {
            hasher.update(k.to_le_bytes());
        }

        let mut tags: Vec<(String, Vec<String>)> = self
            .tags
            .iter()
            .map(|t| {
                let mut values = t.values.clone();
                values.sort();
                (t.name.clone(), values)
            })
            .collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        hasher.update(b"tags");
        for (name, values) in &tags {
            hasher.update(name.as_bytes());
            for v in values {
                hasher.update(v.as_bytes());
            }
        }

        hasher.update(b"since");
        hasher.update(self.since.unwrap_or(0).to_le_bytes());
        hasher.update(b"until");
        hasher.update(self.until.unwrap_or(i64::MAX).to_le_bytes());
        hasher.update(b"limit");
        hasher.update(self.limit.to_le_bytes());

        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Fingerprint(out)
    }

    /// Build a pagination cursor filter: `until = min(created_at) - 1` over
    /// the returned page, per spec.md §4.5.
    pub fn next_page(&self, page: &[Event]) -> Option<Filter> {
        let min_created_at = page.iter().map(|e| e.created_at).min()?;
        let mut next = self.clone();
        next.until = Some(min_created_at - 1);
        Some(next)
    }
}

fn hash_str_list(hasher: &mut Sha256, label: &str, items: &[String]) {
    hasher.update(label.as_bytes());
    for item in items {
        hasher.update(item.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(byte: u8) -> PubKey {
        PubKey([byte; 32])
    }

    #[test]
    fn fingerprint_ignores_author_order() {
        let mut a = Filter {
            authors: Some(vec![pk(1), pk(2)]),
            limit: 20,
            ..Default::default()
        };
        let mut b = Filter {
            authors: Some(vec![pk(2), pk(1)]),
            limit: 20,
            ..Default::default()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());

        a.limit = 21;
        b.limit = 21;
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_limit() {
        let a = Filter {
            limit: 20,
            ..Default::default()
        };
        let b = Filter {
            limit: 21,
            ..Default::default()
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validate_rejects_zero_and_oversize_limit() {
        assert!(Filter { limit: 0, ..Default::default() }.validate().is_err());
        assert!(Filter { limit: 201, ..Default::default() }.validate().is_err());
        assert!(Filter { limit: 200, ..Default::default() }.validate().is_ok());
    }

    #[test]
    fn sort_desc_orders_by_created_at_then_id_desc() {
        let mk = |ts: i64, id_byte: u8| Event {
            id: EventId([id_byte; 32]),
            pubkey: pk(0),
            sig: Signature([0; 64]),
            kind: 1,
            created_at: ts,
            content: String::new(),
            tags: vec![],
            relays_seen: HashSet::new(),
        };
        let mut events = vec![mk(100, 1), mk(100, 2), mk(90, 1)];
        sort_desc(&mut events);
        assert_eq!(
            events.iter().map(|e| (e.created_at, e.id.0[0])).collect::<Vec<_>>(),
            vec![(100, 2), (100, 1), (90, 1)]
        );
    }
}
