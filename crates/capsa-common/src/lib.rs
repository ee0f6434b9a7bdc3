//! # capsa-common
//!
//! Shared types, error definitions, runtime options, and constants
//! used across the entire capsa workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives that both process phases
//! (the namespace-creating launcher and the re-executed init) agree on.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
