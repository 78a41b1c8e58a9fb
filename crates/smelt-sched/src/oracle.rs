//! Compiler oracles.
//!
//! The oracle is the capability the scheduler hands to each compiler
//! invocation. In normal mode it is an opaque marker
//! ([`SimpleOracle`]); in pipelined mode ([`PipeliningOracle`]) it
//! carries everything a downstream compilation needs to start before its
//! upstreams have produced bytecode:
//!
//! - the transitive upstream type signatures, in a deterministic order
//!   simulating classpath lookup (DFS over the DAG, first occurrence wins
//!   on name collisions),
//! - the macro symbols defined by each upstream,
//! - the promise this producer fulfils with its *own* signatures so its
//!   pipelined downstreams can proceed.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use smelt_core::ProjectId;

use crate::promise::Promise;

/// A compact type-interface summary used to unblock pipelined
/// downstreams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Fully-qualified name of the summarized symbol.
    pub name: String,
    /// Content hash of the signature.
    pub hash: u64,
}

impl Signature {
    /// Creates a signature.
    #[must_use]
    pub fn new(name: impl Into<String>, hash: u64) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}

/// Insertion-ordered signature table with classpath-shadowing semantics.
///
/// Keyed by signature name; the first inserted entry for a name wins,
/// exactly like the first classpath entry shadows later ones. Iteration
/// yields entries in insertion order.
#[derive(Debug, Clone, Default)]
pub struct SignatureTable {
    entries: IndexMap<String, Signature>,
}

impl SignatureTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a signature unless its name is already present.
    ///
    /// Returns `true` if the signature was inserted, `false` if an
    /// earlier occurrence shadows it.
    pub fn insert_first_wins(&mut self, signature: Signature) -> bool {
        if self.entries.contains_key(&signature.name) {
            return false;
        }
        self.entries.insert(signature.name.clone(), signature);
        true
    }

    /// Inserts all signatures, first occurrence winning per name.
    pub fn extend_first_wins(&mut self, signatures: impl IntoIterator<Item = Signature>) {
        for signature in signatures {
            self.insert_first_wins(signature);
        }
    }

    /// Looks up a signature by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.entries.get(name)
    }

    /// Iterates signatures in insertion order.
    pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
        self.entries.values()
    }

    /// Number of distinct signature names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Failure of a signature or completion promise.
///
/// Produced when an upstream compilation finishes (or is cancelled)
/// without fulfilling a promise its downstreams wait on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("promise failed or cancelled: {reason}")]
pub struct PromiseFailed {
    /// Why the promise cannot be fulfilled.
    pub reason: String,
}

impl PromiseFailed {
    /// Creates a promise failure with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What a producer publishes when its type signatures are ready.
#[derive(Debug, Clone)]
pub struct SignatureBatch {
    /// The producer's own signatures.
    pub signatures: Arc<[Signature]>,
    /// Macro symbols the producer defines.
    pub macro_symbols: Arc<[String]>,
}

/// Result type of the signatures promise.
pub type SignaturesResult = std::result::Result<SignatureBatch, PromiseFailed>;

/// Result type of the finished-compilation promise.
pub type DoneResult = std::result::Result<(), PromiseFailed>;

/// Opaque capability used during non-pipelined compilation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleOracle;

/// Capability for pipelined compilation.
pub struct PipeliningOracle {
    signatures: SignatureTable,
    upstream_macros: IndexMap<ProjectId, Arc<[String]>>,
    own_signatures: Promise<SignaturesResult>,
    upstream_successes: Vec<ProjectId>,
    defined_macros: Mutex<Vec<String>>,
}

impl PipeliningOracle {
    /// Creates the oracle for one pipelined compilation.
    #[must_use]
    pub fn new(
        signatures: SignatureTable,
        upstream_macros: IndexMap<ProjectId, Arc<[String]>>,
        own_signatures: Promise<SignaturesResult>,
        upstream_successes: Vec<ProjectId>,
    ) -> Self {
        Self {
            signatures,
            upstream_macros,
            own_signatures,
            upstream_successes,
            defined_macros: Mutex::new(Vec::new()),
        }
    }

    /// The transitive upstream signature table, in classpath-lookup order.
    #[must_use]
    pub fn upstream_signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// Macro symbols defined per upstream project.
    #[must_use]
    pub fn upstream_macro_symbols(&self) -> &IndexMap<ProjectId, Arc<[String]>> {
        &self.upstream_macros
    }

    /// The promise this producer fulfils with its own signatures.
    #[must_use]
    pub fn own_signatures(&self) -> &Promise<SignaturesResult> {
        &self.own_signatures
    }

    /// The upstream partial successes this compilation depends on.
    #[must_use]
    pub fn upstream_successes(&self) -> &[ProjectId] {
        &self.upstream_successes
    }

    /// Records a macro symbol defined by this compilation.
    pub fn register_defined_macro(&self, symbol: impl Into<String>) {
        self.defined_macros.lock().push(symbol.into());
    }

    /// Returns the macro symbols this compilation defined.
    ///
    /// Meaningful after the compiler has run; used to build partial
    /// products for pipelined dependents.
    #[must_use]
    pub fn collect_defined_macro_symbols(&self) -> Vec<String> {
        self.defined_macros.lock().clone()
    }
}

impl std::fmt::Debug for PipeliningOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeliningOracle")
            .field("upstream_signatures", &self.signatures.len())
            .field("upstream_successes", &self.upstream_successes)
            .finish_non_exhaustive()
    }
}

/// The capability handed to a compiler invocation.
#[derive(Debug)]
pub enum CompilerOracle {
    /// Non-pipelined compilation.
    Simple(SimpleOracle),
    /// Pipelined compilation.
    Pipelining(Arc<PipeliningOracle>),
}

impl CompilerOracle {
    /// Returns the pipelining oracle, if this is a pipelined compilation.
    #[must_use]
    pub fn pipelining(&self) -> Option<&Arc<PipeliningOracle>> {
        match self {
            Self::Simple(_) => None,
            Self::Pipelining(oracle) => Some(oracle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins_on_collision() {
        let mut table = SignatureTable::new();
        assert!(table.insert_first_wins(Signature::new("com.example.A", 1)));
        assert!(!table.insert_first_wins(Signature::new("com.example.A", 2)));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get("com.example.A").map(|s| s.hash), Some(1));
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut table = SignatureTable::new();
        table.extend_first_wins([
            Signature::new("c", 3),
            Signature::new("a", 1),
            Signature::new("b", 2),
        ]);

        let names: Vec<_> = table.signatures().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn oracle_collects_defined_macros() {
        let oracle = PipeliningOracle::new(
            SignatureTable::new(),
            IndexMap::new(),
            Promise::new(),
            Vec::new(),
        );
        oracle.register_defined_macro("com.example.Macros.hello");
        oracle.register_defined_macro("com.example.Macros.bye");

        assert_eq!(
            oracle.collect_defined_macro_symbols(),
            vec!["com.example.Macros.hello", "com.example.Macros.bye"]
        );
    }
}
