//! Delivery attempts and bulk flushes.
//!
//! ## Flow
//!
//! ```text
//! record → Dispatcher::attempt() → task: transport.send() → store.delete() / store.set_error() → callback
//! store.list_all() → flush_all() → Dispatcher::attempt(force) per record
//! ```

pub mod dispatcher;
pub mod flush;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{AttemptHandle, AttemptOutcome, DispatchPolicy, Dispatcher};
pub use flush::{flush_all, FlushCallback, FlushHandle, FlushReport};
