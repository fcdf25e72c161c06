//! Task-level synchronization primitives.

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};

#[cfg(test)]
mod tests;
