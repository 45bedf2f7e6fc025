//! Concrete storage and crypto for credvault.
//! Envelope encryption uses AES-256-GCM with keys derived from an operator secret
//! (environment or OS keyring); records land in any `KvStore`, such as the file store here.

pub mod envelope;
pub mod file_store;
pub mod key_provider;
