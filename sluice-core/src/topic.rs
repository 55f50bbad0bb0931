//! Topic names and cache key descriptors.
//!
//! A topic is a logical cache partition. Static topics map to one fixed
//! [`CacheKey`]; parameterized topics own a family prefix plus a
//! [`KeyBuilder`] that produces the per-instance suffix. The registry always
//! composes `prefix ++ suffix`, so every key a builder ever yields is a
//! member of the topic's family and family eviction is a prefix match.

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::Payload;

/// Logical topic name, e.g. `"BENEFICIARIES"`.
///
/// Topic names are compared by value. Names declared in code are borrowed
/// `'static` strings; names arriving at runtime are owned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicName(Cow<'static, str>);

impl TopicName {
    /// Create a topic name from a static string without allocating.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TopicName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TopicName {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for TopicName {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&TopicName> for TopicName {
    fn from(name: &TopicName) -> Self {
        name.clone()
    }
}

impl PartialEq<str> for TopicName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for TopicName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// One primitive component of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl KeyPart {
    /// Convert a JSON scalar into a key part.
    ///
    /// Floats, arrays and objects are rejected: they have no stable identity
    /// as cache key components.
    pub fn from_json(field: &str, value: &Payload) -> Result<Self, ConfigError> {
        match value {
            Payload::Null => Ok(Self::Null),
            Payload::Bool(b) => Ok(Self::Bool(*b)),
            Payload::String(s) => Ok(Self::Str(s.clone())),
            Payload::Number(n) => n.as_i64().map(Self::Int).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: n.to_string(),
                    reason: "key parts must be integers, strings, booleans or null".to_string(),
                }
            }),
            other => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: other.to_string(),
                reason: "key parts must be scalars".to_string(),
            }),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// An ordered, immutable sequence of key parts identifying cached results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` matches the leading parts of this key.
    ///
    /// Every key starts with itself and with the empty key.
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Append `suffix` to this key, producing a new key.
    pub fn join(&self, suffix: &CacheKey) -> CacheKey {
        let mut parts = Vec::with_capacity(self.0.len() + suffix.0.len());
        parts.extend_from_slice(&self.0);
        parts.extend_from_slice(&suffix.0);
        CacheKey(parts)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", part)?;
        }
        f.write_str("]")
    }
}

impl<P: Into<KeyPart>, const N: usize> From<[P; N]> for CacheKey {
    fn from(parts: [P; N]) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<KeyPart>> for CacheKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

/// What the registry resolves a topic name to for eviction purposes.
///
/// This is the descriptor handed to the cache host's executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum TopicKey {
    /// A single concrete key (static topics).
    Exact(CacheKey),
    /// Every key starting with this prefix (parameterized topics).
    Family(CacheKey),
}

impl TopicKey {
    /// The key (exact) or prefix (family) carried by this descriptor.
    pub fn key(&self) -> &CacheKey {
        match self {
            Self::Exact(key) | Self::Family(key) => key,
        }
    }

    /// True if evicting this descriptor must evict `candidate`.
    pub fn matches(&self, candidate: &CacheKey) -> bool {
        match self {
            Self::Exact(key) => key == candidate,
            Self::Family(prefix) => candidate.starts_with(prefix),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{}", key),
            Self::Family(prefix) => write!(f, "{}*", prefix),
        }
    }
}

type KeyBuilderFn = dyn Fn(&Payload) -> Result<CacheKey, ConfigError> + Send + Sync;

/// Pure function mapping topic parameters to the per-instance key suffix.
#[derive(Clone)]
pub struct KeyBuilder {
    build: Arc<KeyBuilderFn>,
}

impl KeyBuilder {
    /// Wrap an arbitrary builder function.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&Payload) -> Result<CacheKey, ConfigError> + Send + Sync + 'static,
    {
        Self {
            build: Arc::new(build),
        }
    }

    /// Builder that reads the named fields from a JSON object, in order.
    pub fn from_fields(fields: &'static [&'static str]) -> Self {
        Self::new(move |params| {
            fields
                .iter()
                .map(|field| {
                    let value = params.get(field).ok_or_else(|| ConfigError::InvalidValue {
                        field: (*field).to_string(),
                        value: params.to_string(),
                        reason: "missing key parameter".to_string(),
                    })?;
                    KeyPart::from_json(field, value)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(CacheKey::new)
        })
    }

    /// Produce the key suffix for `params`.
    pub fn build(&self, params: &Payload) -> Result<CacheKey, ConfigError> {
        (self.build)(params)
    }
}

impl fmt::Debug for KeyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBuilder").finish_non_exhaustive()
    }
}

/// How a registered topic maps onto cache keys.
#[derive(Debug, Clone)]
pub enum TopicKind {
    Static { key: CacheKey },
    Parameterized { prefix: CacheKey, builder: KeyBuilder },
}

impl TopicKind {
    /// The eviction descriptor for this topic at topic granularity.
    pub fn topic_key(&self) -> TopicKey {
        match self {
            Self::Static { key } => TopicKey::Exact(key.clone()),
            Self::Parameterized { prefix, .. } => TopicKey::Family(prefix.clone()),
        }
    }

    pub fn is_parameterized(&self) -> bool {
        matches!(self, Self::Parameterized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_name_compares_by_value() {
        let a = TopicName::from("CONTRACTS");
        let b = TopicName::from("CONTRACTS".to_string());
        assert_eq!(a, b);
        assert_eq!(a, "CONTRACTS");
        assert_eq!(a.to_string(), "CONTRACTS");
    }

    #[test]
    fn test_cache_key_prefix_matching() {
        let prefix = CacheKey::from(["beneficiary"]);
        let key = CacheKey::from(["beneficiary"]).join(&CacheKey::from([42i64]));
        assert!(key.starts_with(&prefix));
        assert!(!prefix.starts_with(&key));
        assert!(key.starts_with(&CacheKey::default()));
    }

    #[test]
    fn test_topic_key_matches() {
        let exact = TopicKey::Exact(CacheKey::from(["contracts"]));
        let family = TopicKey::Family(CacheKey::from(["contract"]));

        assert!(exact.matches(&CacheKey::from(["contracts"])));
        assert!(!exact.matches(&CacheKey::from(["contracts", "active"])));
        assert!(family.matches(&CacheKey::new(vec!["contract".into(), 7i64.into()])));
        assert!(!family.matches(&CacheKey::from(["contracts"])));
    }

    #[test]
    fn test_key_part_from_json_rejects_floats() {
        assert_eq!(KeyPart::from_json("id", &json!(5)).unwrap(), KeyPart::Int(5));
        assert!(KeyPart::from_json("id", &json!(1.5)).is_err());
        assert!(KeyPart::from_json("id", &json!({"a": 1})).is_err());
    }

    #[test]
    fn test_key_builder_from_fields() {
        let builder = KeyBuilder::from_fields(&["property_id", "year"]);
        let key = builder
            .build(&json!({"property_id": "p-1", "year": 2024}))
            .unwrap();
        assert_eq!(key, CacheKey::new(vec!["p-1".into(), 2024i64.into()]));

        let err = builder.build(&json!({"property_id": "p-1"})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "year"));
    }

    #[test]
    fn test_display_formats() {
        let key = CacheKey::new(vec!["trial-balance".into(), 2024i64.into(), true.into()]);
        assert_eq!(key.to_string(), "[\"trial-balance\", 2024, true]");
        assert_eq!(
            TopicKey::Family(CacheKey::from(["contract"])).to_string(),
            "[\"contract\"]*"
        );
    }

    #[test]
    fn test_topic_key_serde_shape() {
        let key = TopicKey::Family(CacheKey::from(["beneficiary"]));
        let encoded = serde_json::to_value(&key).unwrap();
        assert_eq!(encoded, json!({"kind": "family", "key": ["beneficiary"]}));
    }
}
