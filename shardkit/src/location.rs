//! `"<cluster-name>/<database-name>"` location strings (§3, §6).

use std::fmt;

use crate::registry::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub cluster: String,
    pub database: String,
}

impl Location {
    pub fn new(cluster: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            database: database.into(),
        }
    }

    /// Parses `"cluster/db"`. Fails unless the string contains exactly one
    /// `/` (§4.1, §6): either half may contain anything else the
    /// underlying database permits in a name.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(3, '/');
        let cluster = parts.next().unwrap_or("");
        let database = match (parts.next(), parts.next()) {
            (Some(db), None) => db,
            _ => return Err(Error::InvalidLocation(s.to_string())),
        };
        Ok(Self::new(cluster, database))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.database)
    }
}

impl TryFrom<&str> for Location {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Location::parse(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_valid_location() {
        let loc = Location::parse("c1/testdb").unwrap();
        assert_eq!(loc, Location::new("c1", "testdb"));
        assert_eq!(loc.to_string(), "c1/testdb");
    }

    #[test]
    fn rejects_zero_or_multiple_slashes() {
        assert!(Location::parse("no-slash-here").is_err());
        assert!(Location::parse("a/b/c").is_err());
    }

    #[test]
    fn allows_empty_halves() {
        assert_eq!(Location::parse("/db").unwrap(), Location::new("", "db"));
        assert_eq!(
            Location::parse("cluster/").unwrap(),
            Location::new("cluster", "")
        );
    }
}
