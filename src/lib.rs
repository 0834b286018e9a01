//! corio: a coroutine-style asynchronous I/O runtime.
//!
//! The core pieces are:
//! - [`Task`]: a single-resolution result cell shared between an I/O
//!   completion callback (producer) and a suspended coroutine (consumer).
//! - [`Executor`]: a scheduler for priority-tagged work units, either
//!   single-threaded ([`SimpleExecutor`]) or a work-stealing pool
//!   ([`MultithreadExecutor`]).
//! - [`Proactor`]: the backend-specific I/O engine. Requests are issued
//!   against raw OS handles and their completions are harvested once per
//!   executor cycle as a batch of ready callbacks.
//! - [`Context`]: the composition root binding one executor to one or more
//!   named proactors, and tracking outstanding top-level routines.
//!
//! Application code spawns routines into a [`Context`]; the socket wrappers
//! under [`net`] turn proactor completions back into resolved [`Task`]s.

pub mod context;
pub mod executor;
pub mod future;
pub mod net;
pub mod proactor;
pub mod routine;
pub mod task;

pub use context::Context;
pub use executor::{Executor, MultithreadExecutor, Priority, PriorityTask, SimpleExecutor};
pub use net::{Address, TcpSocket, UdpSocket};
pub use proactor::{EpollProactor, Proactor};
pub use routine::Co;
pub use task::Task;

#[cfg(feature = "uring")]
pub use proactor::UringProactor;
