//! Client identity and per-client resources.

use std::path::PathBuf;
use std::sync::Arc;

use smelt_core::ClientId;

use crate::event::ClientSink;
use crate::project::Project;

/// A connected build client.
///
/// The scheduler uses this to attribute running compilations to an owner,
/// to deliver events, and to resolve the client-facing external classes
/// directory each project's outputs are published into.
pub trait ClientInfo: Send + Sync {
    /// This client's id.
    fn id(&self) -> ClientId;

    /// The sink compilation events are delivered to.
    fn sink(&self) -> Arc<dyn ClientSink>;

    /// The external classes directory for a project.
    ///
    /// Must be stable per (client, project) pair for the lifetime of the
    /// client.
    fn unique_classes_dir_for(&self, project: &Project) -> PathBuf;
}
