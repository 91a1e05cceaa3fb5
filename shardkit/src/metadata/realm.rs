use serde_json::{Map, Value};

use crate::location::Location;
use crate::metadata::Error;

/// Placement strategy for a realm. Only the single-value (per-key)
/// strategy is implemented; a hash-range distributor exists in the source
/// this crate is modeled on but is non-functional there and is omitted
/// here entirely (§1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardType {
    SingleValue,
}

impl ShardType {
    fn as_str(self) -> &'static str {
        match self {
            ShardType::SingleValue => "single_value",
        }
    }
}

/// A logical sharded collection definition (§3 "Realm"). Immutable after
/// creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Realm {
    pub name: String,
    pub shard_field: String,
    pub collection: String,
    pub default_dest: Location,
    pub shard_type: ShardType,
}

impl Realm {
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::from(self.name.clone()));
        doc.insert("shard_field".into(), Value::from(self.shard_field.clone()));
        doc.insert("collection".into(), Value::from(self.collection.clone()));
        doc.insert(
            "default_dest".into(),
            Value::from(self.default_dest.to_string()),
        );
        doc.insert(
            "shard_type".into(),
            Value::from(self.shard_type.as_str()),
        );
        doc
    }

    pub fn from_document(doc: &Map<String, Value>) -> Result<Self, Error> {
        let name = doc
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("realm.name"))?
            .to_string();
        let shard_field = doc
            .get("shard_field")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("realm.shard_field"))?
            .to_string();
        let collection = doc
            .get("collection")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("realm.collection"))?
            .to_string();
        let default_dest = doc
            .get("default_dest")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("realm.default_dest"))?;
        let default_dest = Location::parse(default_dest).map_err(|_| Error::CorruptRecord("realm.default_dest"))?;
        Ok(Self {
            name,
            shard_field,
            collection,
            default_dest,
            shard_type: ShardType::SingleValue,
        })
    }
}
