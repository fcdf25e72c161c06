//! Utility modules.

pub mod logger;
