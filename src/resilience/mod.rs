//! Retry and backoff.

pub mod retry;
