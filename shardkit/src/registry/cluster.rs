use serde_json::{Map, Value};

/// A named physical cluster (§3 "Cluster").
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub uri: String,
    pub hidden_secondary_host: Option<String>,
}

impl Cluster {
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::from(self.name.clone()));
        doc.insert("uri".into(), Value::from(self.uri.clone()));
        if let Some(host) = &self.hidden_secondary_host {
            doc.insert("hidden_secondary_host".into(), Value::from(host.clone()));
        }
        doc
    }

    pub fn from_document(doc: &Map<String, Value>) -> Option<Self> {
        Some(Self {
            name: doc.get("name")?.as_str()?.to_string(),
            uri: doc.get("uri")?.as_str()?.to_string(),
            hidden_secondary_host: doc
                .get("hidden_secondary_host")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }
}
