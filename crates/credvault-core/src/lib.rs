//! Core abstractions for credvault: the key-value storage contract, clocks,
//! and the plaintext credential views handed to callers.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod clock;
pub mod credentials;
pub mod storage;
