//! Shared utilities.
//!
//! Common utilities used across the crate: hashing and test helpers.

pub mod hash;

#[cfg(test)]
pub mod testutil;
