use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;
use uuid::Uuid;

const ID_PREFIX: &str = "id:";

/// Stable identity of a patch log. Assigned once at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ID_PREFIX, self.0)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(ID_PREFIX).unwrap_or(s);
        Ok(Self(Uuid::parse_str(raw)?))
    }
}

impl TryFrom<String> for Id {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Id> for String {
    fn from(value: Id) -> Self {
        value.to_string()
    }
}

/// Sequence number of a patch within one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Head of a log that has no patches yet.
    pub const INIT: Version = Version(0);
    /// Version assigned to the first patch of every log.
    pub const FIRST: Version = Version(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }

    pub fn is_init(&self) -> bool {
        *self == Self::INIT
    }

    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::INIT
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identity, name and URI of a patch log, as persisted in its metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogDescriptor {
    pub id: Id,
    pub name: String,
    pub uri: String,
}

impl LogDescriptor {
    pub fn new(id: Id, name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            uri: uri.into(),
        }
    }
}

impl Display for LogDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} <{}>]", self.id, self.name, self.uri)
    }
}

/// Summary of a log's version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchLogInfo {
    pub descriptor: LogDescriptor,
    pub min_version: Version,
    pub max_version: Version,
}

/// A log addressed either by name or by identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRef {
    Name(String),
    Id(Id),
}

impl From<&str> for LogRef {
    fn from(value: &str) -> Self {
        LogRef::Name(value.to_string())
    }
}

impl From<String> for LogRef {
    fn from(value: String) -> Self {
        LogRef::Name(value)
    }
}

impl From<Id> for LogRef {
    fn from(value: Id) -> Self {
        LogRef::Id(value)
    }
}

impl Display for LogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRef::Name(name) => write!(f, "{}", name),
            LogRef::Id(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_text_form() {
        let id = Id::new();
        let text = id.to_string();
        assert!(text.starts_with("id:"));
        assert_eq!(text.parse::<Id>().unwrap(), id);
        // Bare UUIDs are accepted too.
        assert_eq!(id.as_uuid().to_string().parse::<Id>().unwrap(), id);
        assert!("id:not-a-uuid".parse::<Id>().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Id::new(), Id::new());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::INIT.is_init());
        assert_eq!(Version::INIT.next(), Version::FIRST);
        assert!(Version::FIRST < Version::new(2));
        assert_eq!(Version::default(), Version::INIT);
    }

    #[test]
    fn test_descriptor_json_shape() {
        let id: Id = "id:8c1f7c66-52c2-4b43-9b6e-0a9a3c3e4d10".parse().unwrap();
        let dsd = LogDescriptor::new(id, "ABC", "http://example/abc");
        let json = serde_json::to_value(&dsd).unwrap();
        assert_eq!(json["id"], "id:8c1f7c66-52c2-4b43-9b6e-0a9a3c3e4d10");
        assert_eq!(json["name"], "ABC");
        let back: LogDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, dsd);
    }
}
