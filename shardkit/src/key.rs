//! Shard key values.
//!
//! Source documents are untyped; the shard field's value may be an integer,
//! a string, or an object id. `ShardKey` makes that union explicit instead
//! of carrying it around as a generic JSON value everywhere a key is used
//! for equality/hashing (route caching, shard records, log replay).

use std::fmt;

use serde_json::Value;

/// A single shard-key value. Object ids are carried as their raw bytes so
/// `ShardKey` can be `Hash`/`Eq` without pulling in a specific driver's id
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardKey {
    Int(i64),
    Str(String),
    Oid([u8; 16]),
}

impl ShardKey {
    /// Attempt to read a shard key out of a JSON value bound to the shard
    /// field in a query or document. Returns `None` for any other shape
    /// (arrays, sub-documents, operator expressions), per §4.4: "any other
    /// operator form is untargeted".
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ShardKey::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(ShardKey::Int),
            Value::Object(obj) => {
                // `{"$oid": "<32 hex chars>"}` is how an object id survives
                // a JSON round trip in this crate's document model.
                let hex = obj.get("$oid")?.as_str()?;
                Self::oid_from_hex(hex)
            }
            _ => None,
        }
    }

    fn oid_from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in bytes.iter_mut().enumerate() {
            *chunk = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(ShardKey::Oid(bytes))
    }

    pub fn to_value(&self) -> Value {
        match self {
            ShardKey::Int(i) => Value::from(*i),
            ShardKey::Str(s) => Value::from(s.clone()),
            ShardKey::Oid(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                serde_json::json!({ "$oid": hex })
            }
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKey::Int(i) => write!(f, "{i}"),
            ShardKey::Str(s) => write!(f, "{s}"),
            ShardKey::Oid(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_int_and_string_keys() {
        assert_eq!(ShardKey::from_value(&Value::from(42)), Some(ShardKey::Int(42)));
        assert_eq!(
            ShardKey::from_value(&Value::from("abc")),
            Some(ShardKey::Str("abc".into()))
        );
    }

    #[test]
    fn rejects_operator_expressions() {
        let query = serde_json::json!({"$gt": 5});
        assert_eq!(ShardKey::from_value(&query), None);
    }

    #[test]
    fn oid_round_trips() {
        let oid = ShardKey::Oid([1; 16]);
        let value = oid.to_value();
        assert_eq!(ShardKey::from_value(&value), Some(oid));
    }
}
