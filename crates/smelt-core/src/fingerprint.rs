//! Fingerprints for deduplicating compilation work.
//!
//! [`UniqueCompileInputs`] digests every semantically relevant input of a
//! compilation (source hashes, classpath entry hashes, compiler options)
//! into one stable key. Two requests with equal fingerprints describe the
//! same logical work and may share one running compilation.
//!
//! The digest is computed over a canonical encoding: entries are written
//! in a fixed field order with length prefixes, so equality of the inputs
//! implies byte-equality of the digested stream. Hash and equality are
//! stable across processes.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::id::ProjectId;

/// Fingerprint of all semantically relevant inputs to one compilation.
///
/// This is the deduplication key: the registry holds at most one running
/// compilation per distinct fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueCompileInputs {
    project: ProjectId,
    digest: String,
}

impl UniqueCompileInputs {
    /// Computes the fingerprint for a project from its canonical inputs.
    ///
    /// `source_hashes` are per-file content hashes, `classpath_hashes` are
    /// per-entry jar/directory hashes, and `options` are the flattened
    /// compiler options. Order matters for options (it is semantically
    /// relevant); source and classpath entries are digested in the order
    /// given, which callers must keep deterministic.
    #[must_use]
    pub fn compute(
        project: &ProjectId,
        source_hashes: &[(String, u64)],
        classpath_hashes: &[u64],
        options: &[String],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(project.as_str().as_bytes());
        hasher.update([0u8]);
        for (path, hash) in source_hashes {
            hasher.update((path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update(hash.to_le_bytes());
        }
        hasher.update([0u8]);
        for hash in classpath_hashes {
            hasher.update(hash.to_le_bytes());
        }
        hasher.update([0u8]);
        for opt in options {
            hasher.update((opt.len() as u64).to_le_bytes());
            hasher.update(opt.as_bytes());
        }

        let digest = hasher.finalize();
        // 20 bytes = 40 hex chars = 160 bits, plenty for collision resistance
        // while keeping log lines readable.
        Self {
            project: project.clone(),
            digest: hex::encode(digest.get(..20).unwrap_or(&digest)),
        }
    }

    /// Creates a fingerprint from a pre-computed digest string.
    ///
    /// Intended for callers that already carry a stable content digest for
    /// the compilation inputs (e.g. from an incremental-state store).
    #[must_use]
    pub fn from_digest(project: ProjectId, digest: impl Into<String>) -> Self {
        Self {
            project,
            digest: digest.into(),
        }
    }

    /// The project these inputs belong to.
    #[must_use]
    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// The hex-encoded digest of the inputs.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for UniqueCompileInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.digest)
    }
}
