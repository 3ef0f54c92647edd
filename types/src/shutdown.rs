//! Component shutdown traits, shared across every crate in the workspace so
//! the main controller can tear down C1-C9 through one uniform interface
//! (§5 "Shutdown" / §4.5 "Ownership & lifecycle").

use std::future::Future;

/// Implemented by components that can shut down without suspending.
pub trait SyncShutdown {
    type Result;

    fn shutdown(&mut self) -> Self::Result;
}

/// Implemented by components whose shutdown involves I/O: flushing a
/// buffer, draining a queue, waiting (up to a grace window) for in-flight
/// work to reach a terminal state.
pub trait AsyncShutdown {
    type Result;

    fn shutdown(&mut self) -> impl Future<Output = Self::Result> + Send;
}
