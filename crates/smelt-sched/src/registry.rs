//! The deduplication registry.
//!
//! Process-wide shared state of the scheduler, in three independently
//! locked maps:
//!
//! - **running**: unique-compile-inputs fingerprint → the live
//!   [`RunningCompilation`] all deduplicating clients share
//! - **last successful**: project id → the current
//!   [`LastSuccessfulResult`]
//! - **refcounts**: classes directory → number of outstanding readers
//!
//! At most one running compilation exists per fingerprint at any moment,
//! and at most one last-successful result is current per project. The
//! refcount is the sole gate for deleting a superseded classes directory:
//! deletion is only scheduled once the count reaches zero AND a different
//! directory has replaced it as current.
//!
//! Lock ordering is `running → last_successful → refcounts`; every
//! operation that takes more than one lock takes them in that order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use smelt_core::{AttemptId, ClientId, ProjectId, UniqueCompileInputs};

use crate::bundle::LastSuccessfulResult;
use crate::compile::PipelineHandles;
use crate::event::Problem;
use crate::metrics::SchedMetrics;
use crate::mirror::EventMirror;
use crate::result::{FinalCompileResult, SharedTask};

/// A live compilation shared by every deduplicating client.
#[derive(Clone)]
pub struct RunningCompilation {
    /// The memoized per-project outcome.
    pub result: SharedTask<FinalCompileResult>,
    /// The mirror deduplicated subscribers replay from.
    pub mirror: Arc<EventMirror>,
    /// The last-successful result this attempt obtained (refcounted).
    pub previous_successful: Arc<LastSuccessfulResult>,
    /// Diagnostics re-derived from the previous analysis, replayed to
    /// late subscribers whose cached analysis may differ.
    pub previous_problems: Arc<[Problem]>,
    /// Set when a subscriber disconnected and unregistered this entry.
    pub is_unsubscribed: Arc<AtomicBool>,
    /// The client that dispatched this compilation.
    pub owner: ClientId,
    /// Identity of this attempt, for compare-and-remove.
    pub attempt: AttemptId,
    /// Cancels the underlying compilation future.
    pub cancel: CancellationToken,
    /// Pipelining handles, when the compilation runs pipelined.
    pub pipeline: Option<PipelineHandles>,
}

impl std::fmt::Debug for RunningCompilation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningCompilation")
            .field("owner", &self.owner)
            .field("attempt", &self.attempt)
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

/// Process-wide table of running compilations, last-successful results,
/// and classes-directory refcounts.
///
/// Encapsulated in the scheduler context rather than global state; tests
/// reset by constructing a fresh registry.
pub struct DeduplicationRegistry {
    running: Mutex<HashMap<UniqueCompileInputs, RunningCompilation>>,
    last_successful: Mutex<HashMap<ProjectId, Arc<LastSuccessfulResult>>>,
    refcounts: Mutex<HashMap<PathBuf, usize>>,
    metrics: SchedMetrics,
}

impl DeduplicationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            last_successful: Mutex::new(HashMap::new()),
            refcounts: Mutex::new(HashMap::new()),
            metrics: SchedMetrics::new(),
        }
    }

    /// Returns the running compilation for `key`, inserting the one
    /// produced by `factory` if none is registered.
    ///
    /// The boolean is `true` when this call inserted (the caller owns the
    /// new compilation) and `false` when an existing compilation was
    /// returned (the caller deduplicates against it).
    pub fn lookup_or_insert(
        &self,
        key: &UniqueCompileInputs,
        factory: impl FnOnce() -> RunningCompilation,
    ) -> (RunningCompilation, bool) {
        let mut running = self.running.lock();
        if let Some(existing) = running.get(key) {
            return (existing.clone(), false);
        }
        let fresh = factory();
        running.insert(key.clone(), fresh.clone());
        self.metrics.set_running_compilations(running.len());
        (fresh, true)
    }

    /// Removes the entry for `key` if it still refers to `expected`.
    ///
    /// Compare-and-remove: a disconnecting subscriber must not race a
    /// re-dispatch that already registered a newer attempt under the same
    /// key. Returns `true` if the entry was removed.
    pub fn remove_if_attempt(&self, key: &UniqueCompileInputs, expected: AttemptId) -> bool {
        let mut running = self.running.lock();
        let matches = running.get(key).is_some_and(|rc| rc.attempt == expected);
        if matches {
            running.remove(key);
            self.metrics.set_running_compilations(running.len());
        }
        matches
    }

    /// Removes the entry for `key` unconditionally.
    ///
    /// Used by result enrichment when a compilation finishes
    /// unsuccessfully and its entry must not serve further subscribers.
    pub fn remove(&self, key: &UniqueCompileInputs) -> Option<RunningCompilation> {
        let mut running = self.running.lock();
        let removed = running.remove(key);
        if removed.is_some() {
            self.metrics.set_running_compilations(running.len());
        }
        removed
    }

    /// Returns the current last-successful result for a project,
    /// inserting `fallback` if none is registered, and atomically
    /// increments the refcount of the returned result's classes
    /// directory.
    ///
    /// A result installed as current carries one reference of its own
    /// (released by the swap that supersedes it), so a freshly inserted
    /// fallback counts both the install and this reader.
    pub fn get_or_insert_last_successful(
        &self,
        project: &ProjectId,
        fallback: Arc<LastSuccessfulResult>,
    ) -> Arc<LastSuccessfulResult> {
        let mut last = self.last_successful.lock();
        let mut installed = false;
        let current = last
            .entry(project.clone())
            .or_insert_with(|| {
                installed = true;
                fallback
            })
            .clone();
        let mut refcounts = self.refcounts.lock();
        let count = refcounts
            .entry(current.classes_dir().to_path_buf())
            .or_insert(0);
        *count += if installed { 2 } else { 1 };
        current
    }

    /// Installs `new` as the current last-successful result for a
    /// project.
    ///
    /// The new result takes the current-holder reference on its classes
    /// directory; the previous result's is released. When the previous
    /// directory's count reaches zero AND the new result uses a different
    /// directory, the previous result is returned so the caller can
    /// schedule its deletion.
    pub fn swap_last_successful(
        &self,
        project: &ProjectId,
        new: Arc<LastSuccessfulResult>,
    ) -> Option<Arc<LastSuccessfulResult>> {
        let mut last = self.last_successful.lock();
        let old = last.insert(project.clone(), Arc::clone(&new));

        let mut refcounts = self.refcounts.lock();
        *refcounts
            .entry(new.classes_dir().to_path_buf())
            .or_insert(0) += 1;
        let remaining = old.as_ref().map(|old| {
            let count = refcounts
                .entry(old.classes_dir().to_path_buf())
                .or_insert(0);
            *count = count.saturating_sub(1);
            *count
        });
        drop(refcounts);
        drop(last);

        self.metrics.record_swap();
        let old = old?;
        tracing::debug!(
            project = %project,
            old_dir = %old.classes_dir().display(),
            new_dir = %new.classes_dir().display(),
            remaining = remaining.unwrap_or(0),
            "superseded last-successful result"
        );

        if remaining == Some(0) && old.classes_dir() != new.classes_dir() {
            Some(old)
        } else {
            None
        }
    }

    /// Decrements the refcount of a classes directory.
    ///
    /// Used on error paths where an attempt obtained a last-successful
    /// result it will not supersede.
    pub fn decrement_classes_dir_refcount(&self, dir: &Path) {
        let mut refcounts = self.refcounts.lock();
        if let Some(count) = refcounts.get_mut(dir) {
            *count = count.saturating_sub(1);
        }
    }

    /// The current refcount of a classes directory.
    #[must_use]
    pub fn classes_dir_refcount(&self, dir: &Path) -> usize {
        self.refcounts.lock().get(dir).copied().unwrap_or(0)
    }

    /// The current last-successful result for a project, if any.
    #[must_use]
    pub fn last_successful(&self, project: &ProjectId) -> Option<Arc<LastSuccessfulResult>> {
        self.last_successful.lock().get(project).cloned()
    }

    /// Number of currently registered running compilations.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Drops every last-successful result.
    ///
    /// Test hook, used between scenarios; running compilations and
    /// refcounts are untouched.
    pub fn clear_successful_results(&self) {
        self.last_successful.lock().clear();
    }

    /// The metrics recorder shared with the traversal engine.
    #[must_use]
    pub(crate) fn metrics(&self) -> &SchedMetrics {
        &self.metrics
    }
}

impl Default for DeduplicationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeduplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeduplicationRegistry")
            .field("running", &self.running.lock().len())
            .field("last_successful", &self.last_successful.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::result::ready_task;

    fn key(digest: &str) -> UniqueCompileInputs {
        UniqueCompileInputs::from_digest(ProjectId::new("a"), digest)
    }

    fn running(attempt: AttemptId) -> RunningCompilation {
        RunningCompilation {
            result: ready_task(FinalCompileResult::Cancelled),
            mirror: Arc::new(EventMirror::new()),
            previous_successful: Arc::new(LastSuccessfulResult::empty(&Project::new("a"))),
            previous_problems: Vec::new().into(),
            is_unsubscribed: Arc::new(AtomicBool::new(false)),
            owner: ClientId::generate(),
            attempt,
            cancel: CancellationToken::new(),
            pipeline: None,
        }
    }

    fn successful(dir: &str) -> Arc<LastSuccessfulResult> {
        Arc::new(LastSuccessfulResult::new(
            PathBuf::from(dir),
            Arc::new(crate::bundle::Analysis::default()),
            ready_task(()),
        ))
    }

    #[test]
    fn second_lookup_deduplicates() {
        let registry = DeduplicationRegistry::new();
        let attempt = AttemptId::generate();

        let (_, inserted) = registry.lookup_or_insert(&key("k"), || running(attempt));
        assert!(inserted);

        let (existing, inserted) = registry.lookup_or_insert(&key("k"), || {
            panic!("factory must not run for a registered key")
        });
        assert!(!inserted);
        assert_eq!(existing.attempt, attempt);
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn compare_and_remove_respects_attempt_identity() {
        let registry = DeduplicationRegistry::new();
        let first = AttemptId::generate();
        let other = AttemptId::generate();
        registry.lookup_or_insert(&key("k"), || running(first));

        assert!(!registry.remove_if_attempt(&key("k"), other));
        assert_eq!(registry.running_count(), 1);

        assert!(registry.remove_if_attempt(&key("k"), first));
        assert_eq!(registry.running_count(), 0);
    }

    #[test]
    fn get_or_insert_increments_refcount() {
        let registry = DeduplicationRegistry::new();
        let project = ProjectId::new("a");
        let result = successful("/tmp/classes-1");

        let got = registry.get_or_insert_last_successful(&project, Arc::clone(&result));
        assert_eq!(got.classes_dir(), result.classes_dir());
        // Install reference plus this reader.
        assert_eq!(registry.classes_dir_refcount(result.classes_dir()), 2);

        registry.get_or_insert_last_successful(&project, successful("/tmp/other"));
        // The registered result wins over the fallback.
        assert_eq!(registry.classes_dir_refcount(result.classes_dir()), 3);
        assert_eq!(registry.classes_dir_refcount(Path::new("/tmp/other")), 0);
    }

    #[test]
    fn swap_returns_old_only_at_refcount_zero_with_new_dir() {
        let registry = DeduplicationRegistry::new();
        let project = ProjectId::new("a");
        let r1 = successful("/tmp/classes-1");
        let r2 = successful("/tmp/classes-2");

        registry.get_or_insert_last_successful(&project, Arc::clone(&r1));
        // The attempt that produced r2 releases its reader reference
        // before swapping.
        registry.decrement_classes_dir_refcount(r1.classes_dir());

        let to_delete = registry.swap_last_successful(&project, Arc::clone(&r2));
        assert!(to_delete.is_some_and(|old| old.classes_dir() == r1.classes_dir()));
        assert_eq!(registry.classes_dir_refcount(r1.classes_dir()), 0);
        assert_eq!(registry.classes_dir_refcount(r2.classes_dir()), 1);
        assert_eq!(
            registry
                .last_successful(&project)
                .map(|r| r.classes_dir().to_path_buf()),
            Some(PathBuf::from("/tmp/classes-2"))
        );
    }

    #[test]
    fn swap_withholds_old_while_still_referenced() {
        let registry = DeduplicationRegistry::new();
        let project = ProjectId::new("a");
        let r1 = successful("/tmp/classes-1");
        let r2 = successful("/tmp/classes-2");

        // Two readers obtained r1; only one released before the swap.
        registry.get_or_insert_last_successful(&project, Arc::clone(&r1));
        registry.get_or_insert_last_successful(&project, Arc::clone(&r1));
        registry.decrement_classes_dir_refcount(r1.classes_dir());

        // One outstanding reader remains: not yet deletable.
        assert!(registry.swap_last_successful(&project, r2).is_none());
        assert_eq!(registry.classes_dir_refcount(r1.classes_dir()), 1);
    }

    #[test]
    fn swap_withholds_old_when_directory_is_reused() {
        let registry = DeduplicationRegistry::new();
        let project = ProjectId::new("a");
        let r1 = successful("/tmp/classes-1");
        let same_dir = successful("/tmp/classes-1");

        registry.get_or_insert_last_successful(&project, Arc::clone(&r1));
        registry.decrement_classes_dir_refcount(r1.classes_dir());
        assert!(registry.swap_last_successful(&project, same_dir).is_none());
    }

    #[test]
    fn clear_successful_results_drops_the_map() {
        let registry = DeduplicationRegistry::new();
        let project = ProjectId::new("a");
        registry.get_or_insert_last_successful(&project, successful("/tmp/classes-1"));

        registry.clear_successful_results();
        assert!(registry.last_successful(&project).is_none());
    }
}
