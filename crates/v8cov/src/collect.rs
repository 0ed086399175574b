//! Boundary with the server and client coverage collectors
//!
//! Collectors are external (remote-debugging clients, browser automation);
//! they implement [`CoverageSource`]. A [`CollectionSession`] drives both
//! sides together and never fails: a side that cannot start, cannot stop,
//! or yields nothing contributes an empty snapshot.

use crate::result::CovResult;
use crate::v8::{CoverageReader, V8Coverage};
use std::thread;
use tracing::{debug, info, warn};

/// A coverage collector
pub trait CoverageSource: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Begin capturing
    fn start(&mut self) -> CovResult<()>;

    /// Stop capturing and hand over the snapshot
    fn stop(&mut self) -> CovResult<V8Coverage>;
}

/// Snapshots of both sides of one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedCoverage {
    /// Server process coverage
    pub server: V8Coverage,
    /// Browser coverage
    pub client: V8Coverage,
}

impl CollectedCoverage {
    /// Check whether neither side produced entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.server.is_empty() && self.client.is_empty()
    }

    /// Server entries followed by client entries
    #[must_use]
    pub fn merged(self) -> V8Coverage {
        CoverageReader::merge([self.server, self.client])
    }
}

type Slot = Option<Box<dyn CoverageSource>>;

/// Running server + client capture
pub struct CollectionSession {
    server: Slot,
    client: Slot,
}

impl std::fmt::Debug for CollectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSession")
            .field("server", &self.server.as_ref().map(|s| s.name().to_string()))
            .field("client", &self.client.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

fn start_source(mut source: Box<dyn CoverageSource>) -> Slot {
    match source.start() {
        Ok(()) => {
            debug!(source = source.name(), "coverage capture started");
            Some(source)
        }
        Err(e) => {
            warn!(source = source.name(), error = %e, "coverage source failed to start; it will report nothing");
            None
        }
    }
}

fn stop_source(slot: Slot) -> V8Coverage {
    let Some(mut source) = slot else {
        return V8Coverage::new();
    };
    match source.stop() {
        Ok(coverage) if coverage.is_empty() => {
            warn!(source = source.name(), "coverage source yielded no entries");
            coverage
        }
        Ok(coverage) => {
            debug!(source = source.name(), entries = coverage.len(), "coverage capture stopped");
            coverage
        }
        Err(e) => {
            warn!(source = source.name(), error = %e, "coverage source failed to stop; using empty coverage");
            V8Coverage::new()
        }
    }
}

fn join_or_empty<T: Default>(handle: thread::ScopedJoinHandle<'_, T>, side: &str) -> T {
    handle.join().unwrap_or_else(|_| {
        warn!(side, "coverage source panicked; using empty coverage");
        T::default()
    })
}

impl CollectionSession {
    /// Start both sources concurrently
    pub fn start(server: Box<dyn CoverageSource>, client: Box<dyn CoverageSource>) -> Self {
        let (server, client) = thread::scope(|scope| {
            let server = scope.spawn(move || start_source(server));
            let client = scope.spawn(move || start_source(client));
            (join_or_empty(server, "server"), join_or_empty(client, "client"))
        });
        Self { server, client }
    }

    /// Check whether the server source is capturing
    #[must_use]
    pub fn server_active(&self) -> bool {
        self.server.is_some()
    }

    /// Check whether the client source is capturing
    #[must_use]
    pub fn client_active(&self) -> bool {
        self.client.is_some()
    }

    /// Stop both sources concurrently
    #[must_use]
    pub fn stop(self) -> CollectedCoverage {
        let Self { server, client } = self;
        let collected = thread::scope(|scope| {
            let server = scope.spawn(move || stop_source(server));
            let client = scope.spawn(move || stop_source(client));
            CollectedCoverage {
                server: join_or_empty(server, "server"),
                client: join_or_empty(client, "client"),
            }
        });
        info!(
            server = collected.server.len(),
            client = collected.client.len(),
            "coverage collection finished"
        );
        collected
    }
}
