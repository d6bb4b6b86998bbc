use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
///
/// Every content-addressed identity in the crate (payments, deployed
/// instances) is a `Digest` computed by [`Digest::of_canonical`]. It
/// serializes as a 64-character lowercase hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Hashes `value` as canonical JSON (sorted keys, compact separators)
    /// behind a domain tag, so equal values always yield equal digests and
    /// different kinds of values never collide.
    pub fn of_canonical<T: Serialize + ?Sized>(domain: &str, value: &T) -> Result<Self> {
        // `serde_json::Value` objects are BTreeMap-backed, which sorts keys.
        let normalized = serde_json::to_value(value)?;
        let bytes = serde_json::to_vec(&normalized)?;

        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update([0u8]);
        hasher.update(&bytes);
        Ok(Self(hasher.finalize().into()))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex)
            .ok_or_else(|| de::Error::custom(format!("invalid digest {hex:?}, expected 64 hex characters")))
    }
}

/// Content hash of a [`PaymentInfo`](super::payment::PaymentInfo); the key of
/// every per-payment map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub Digest);

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payment:{}", self.0)
    }
}

/// Identity of a factory-deployed instance, derived from its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceAddress(pub Digest);

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance:{}", self.0)
    }
}

/// Identity of a party or caller (payer, receiver, operator, arbiter...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the asset a payment is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical time in seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_digest_ignores_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            Digest::of_canonical("test", &a).unwrap(),
            Digest::of_canonical("test", &b).unwrap()
        );
    }

    #[test]
    fn test_domain_tag_separates_digests() {
        let value = json!({"a": 1});
        assert_ne!(
            Digest::of_canonical("one", &value).unwrap(),
            Digest::of_canonical("two", &value).unwrap()
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let digest = Digest::of_canonical("test", &42u32).unwrap();
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::from_hex(&hex), Some(digest));
        assert_eq!(Digest::from_hex("zz"), None);
    }

    #[test]
    fn test_ids_serialize_as_hex_strings() {
        let digest = Digest([0xab; 32]);
        let payment_id = PaymentId(digest);
        let value = serde_json::to_value(payment_id).unwrap();
        assert_eq!(value, json!("ab".repeat(32)));
        assert_eq!(serde_json::from_value::<PaymentId>(value).unwrap(), payment_id);

        let instance = serde_json::to_string(&InstanceAddress(digest)).unwrap();
        assert_eq!(instance, format!("\"{}\"", "ab".repeat(32)));

        assert!(serde_json::from_value::<Digest>(json!("ab")).is_err());
        assert!(serde_json::from_value::<Digest>(json!([171, 171])).is_err());
    }
}
