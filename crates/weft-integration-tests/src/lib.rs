//! End-to-end scenarios for the Weft fabric live under `tests/`.
//!
//! This crate intentionally exports nothing; it exists to host the
//! integration test binaries and their shared helpers.

#![deny(unsafe_code)]
