//! Shared utilities: hashing for content addressing and filesystem helpers.

pub mod fs;
pub mod hash;
