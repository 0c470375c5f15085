//! End-to-end tests for the crosswire conformance harness.
//!
//! Spins up in-process KV probe servers on ephemeral ports with real TLS,
//! drives them through the client stack, and exercises the matrix
//! orchestrator against spawned stand-in server processes.

pub mod infra;

#[cfg(test)]
mod handshake_e2e_test;
#[cfg(test)]
mod kv_e2e_test;
#[cfg(test)]
mod matrix_e2e_test;
