//! Strongly-typed identifiers for Smelt entities.
//!
//! Two families of ids coexist:
//!
//! - **Stable ids** ([`ProjectId`]): string-valued, defined by the build
//!   configuration and stable across server restarts. Two builds of the
//!   same workspace agree on these.
//! - **Generated ids** ([`ClientId`], [`AttemptId`]): ULID-valued,
//!   lexicographically sortable by creation time, globally unique without
//!   coordination.
//!
//! # Example
//!
//! ```rust
//! use smelt_core::id::{ClientId, ProjectId};
//!
//! let project = ProjectId::new("backend");
//! let client = ClientId::generate();
//!
//! // Ids are different types - this won't compile:
//! // let wrong: ProjectId = client;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// The stable identity of a build unit (project).
///
/// Projects are the nodes of the compilation DAG. The id comes from the
/// build configuration and is stable across runs, so it can key
/// last-successful compilation state between traversals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a project id from a stable name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A unique identifier for a connected build client.
///
/// Each client (an editor session, a CLI invocation) gets its own id;
/// ownership of running compilations is tracked per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Ulid);

impl ClientId {
    /// Generates a new unique client id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a client id from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the creation timestamp encoded in the id.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)] // ULID timestamps fit in i64 until year 10889
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(ms as i64).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid client id '{s}': {e}"),
            })
    }
}

/// A unique identifier for one compilation attempt.
///
/// A fresh attempt id is minted every time a compilation is dispatched;
/// compare-and-remove operations on the deduplication registry use it to
/// avoid racing a removal against a later resubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Ulid);

impl AttemptId {
    /// Generates a new unique attempt id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an attempt id from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttemptId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid attempt id '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_stable() {
        let a = ProjectId::new("backend");
        let b = ProjectId::new("backend");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "backend");
    }

    #[test]
    fn client_id_roundtrip() {
        let id = ClientId::generate();
        let s = id.to_string();
        let parsed: ClientId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn client_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn attempt_id_rejects_garbage() {
        let result: Result<AttemptId> = "not-a-ulid".parse();
        assert!(result.is_err());
    }

    #[test]
    fn project_id_serde_is_transparent() {
        let id = ProjectId::new("frontend");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"frontend\"");
    }
}
