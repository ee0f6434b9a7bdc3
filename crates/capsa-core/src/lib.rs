//! # capsa-core
//!
//! Low-level Linux isolation primitives for the capsa runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags for mount, UTS, IPC, PID and user
//!   namespaces, and single-entry UID/GID mappings.
//! - **Filesystem**: the ordered pseudo-filesystem mount table,
//!   `pivot_root`, old-root detachment, device links and `OverlayFS`.
//! - **Syscalls**: a [`syscall::Syscall`] seam so root filesystem
//!   construction can be driven against a recorder in tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod namespace;
pub mod syscall;
