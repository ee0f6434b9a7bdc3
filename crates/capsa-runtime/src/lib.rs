//! Container run pipeline for the capsa runtime.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod container;
pub mod env;
pub mod process;
pub mod rootfs;
pub mod tty;
