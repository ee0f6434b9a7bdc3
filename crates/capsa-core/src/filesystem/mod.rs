//! Filesystem management for container isolation.
//!
//! Provides the ordered pseudo-filesystem mount table, `pivot_root` with
//! a detachable old root, device links and OverlayFS layer mounting.

pub mod devices;
pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
