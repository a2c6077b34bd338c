//! Dispatch queue + worker pool (design §4.5, §4.6, §4.7): the in-process
//! path from "claimed" to "COMPLETED/FAILED, next year seeded".

pub mod dispatch;
pub mod pool;

pub use dispatch::{DispatchClosed, Dispatcher};
pub use pool::{process_event, spawn, ProcessError, WorkerDeps};
