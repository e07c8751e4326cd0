//! Storage and execution primitives for replication.
//!
//! A [`Replica`] is a byte-addressable store backed by a memory-mapped file that hosts one or
//! more views back to back. A [`Dispatcher`] is a small pool of named worker threads that runs
//! detached replication tasks.

pub use dispatcher::*;
pub use replica::*;

mod dispatcher;
mod replica;
