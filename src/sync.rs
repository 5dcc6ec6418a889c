//! Synchronization primitive re-exports.
//!
//! The binding layer is invoked synchronously from whichever interpreter
//! thread happens to need resolution first, so every lazy cache in this crate
//! goes through these types. Keeping the imports funneled through one module
//! makes the locking discipline easy to audit.

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
