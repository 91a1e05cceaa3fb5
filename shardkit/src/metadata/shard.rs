use serde_json::{Map, Value};

use crate::key::ShardKey;
use crate::location::Location;
use crate::metadata::status::ShardStatus;
use crate::metadata::Error;

/// One record per explicitly-placed shard key (§3 "Shard"). Absence of a
/// record means the key lives at the realm's `default_dest` with implicit
/// status `AT_REST` — see [`Shard::virtual_at_rest`].
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub realm: String,
    pub shard_key: ShardKey,
    pub location: Location,
    pub new_location: Option<Location>,
    pub status: ShardStatus,
}

impl Shard {
    pub fn virtual_at_rest(realm: &str, shard_key: ShardKey, default_dest: Location) -> Self {
        Self {
            realm: realm.to_string(),
            shard_key,
            location: default_dest,
            new_location: None,
            status: ShardStatus::AtRest,
        }
    }

    /// The location whose copy is authoritative for reads given this
    /// shard's current status (§4.4, GLOSSARY "Authoritative location").
    pub fn authoritative_location(&self) -> &Location {
        if self.status.is_post_migration_phase() {
            self.new_location.as_ref().unwrap_or(&self.location)
        } else {
            &self.location
        }
    }

    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("realm".into(), Value::from(self.realm.clone()));
        doc.insert("shard_key".into(), self.shard_key.to_value());
        doc.insert("location".into(), Value::from(self.location.to_string()));
        if let Some(new_location) = &self.new_location {
            doc.insert(
                "new_location".into(),
                Value::from(new_location.to_string()),
            );
        }
        doc.insert(
            "status".into(),
            serde_json::to_value(self.status).expect("ShardStatus always serializes"),
        );
        doc
    }

    pub fn from_document(doc: &Map<String, Value>) -> Result<Self, Error> {
        let realm = doc
            .get("realm")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("shard.realm"))?
            .to_string();
        let shard_key = doc
            .get("shard_key")
            .and_then(ShardKey::from_value)
            .ok_or(Error::CorruptRecord("shard.shard_key"))?;
        let location = doc
            .get("location")
            .and_then(|v| v.as_str())
            .ok_or(Error::CorruptRecord("shard.location"))?;
        let location =
            Location::parse(location).map_err(|_| Error::CorruptRecord("shard.location"))?;
        let new_location = match doc.get("new_location").and_then(|v| v.as_str()) {
            Some(s) => Some(Location::parse(s).map_err(|_| Error::CorruptRecord("shard.new_location"))?),
            None => None,
        };
        let status = doc
            .get("status")
            .cloned()
            .ok_or(Error::CorruptRecord("shard.status"))
            .and_then(|v| serde_json::from_value(v).map_err(|_| Error::CorruptRecord("shard.status")))?;
        Ok(Self {
            realm,
            shard_key,
            location,
            new_location,
            status,
        })
    }
}
