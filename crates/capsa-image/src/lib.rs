//! # capsa-image
//!
//! Image and layer access for the capsa runtime.
//!
//! Handles:
//! - **Storage**: reading the image catalog and metadata blobs of an
//!   overlay-driver backing store, and mounting its layers.
//! - **Resolver**: looking up an image by name and extracting its top
//!   layer and declared environment.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod resolver;
pub mod storage;
