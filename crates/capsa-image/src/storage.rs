//! Backing store for images and layers.
//!
//! Reads the on-disk layout written by the containers/storage overlay
//! driver under the graph root: the image catalog in
//! `overlay-images/images.json`, per-image metadata blobs next to it, and
//! layer directories under `overlay/`.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use capsa_common::config::RuntimeOptions;
use capsa_common::error::{CapsaError, Result};
use capsa_common::types::{ImageId, LayerId};
use capsa_core::filesystem::overlayfs::{self, OverlayConfig};
use capsa_core::syscall::LinuxSyscall;
use serde::{Deserialize, Serialize};

const IMAGES_DIR: &str = "overlay-images";
const IMAGES_FILE: &str = "images.json";
const LAYERS_DIR: &str = "overlay";

/// Entry of the image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique identifier for this image.
    pub id: ImageId,
    /// Names (tags) the image is known by.
    #[serde(default)]
    pub names: Vec<String>,
    /// Top layer; empty for an image without layers.
    #[serde(default)]
    pub layer: LayerId,
    /// Keys of the metadata blobs stored for this image.
    #[serde(default, rename = "big-data-names")]
    pub big_data_names: Vec<String>,
}

/// Operations the runtime consumes from a backing store.
pub trait ImageStore {
    /// Lists every image in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or parsed.
    fn list_images(&self) -> Result<Vec<ImageRecord>>;

    /// Reads the metadata blob `key` of image `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob does not exist or cannot be read.
    fn image_big_data(&self, id: &ImageId, key: &str) -> Result<Vec<u8>>;

    /// Mounts `layer` and returns the host path of its merged tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is unknown or cannot be mounted.
    fn mount_layer(&self, layer: &LayerId) -> Result<PathBuf>;
}

/// Store configuration derived from [`RuntimeOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Ephemeral state directory.
    pub run_root: PathBuf,
    /// Persistent storage directory.
    pub graph_root: PathBuf,
    /// FUSE helper used instead of the kernel overlay driver.
    pub mount_program: Option<PathBuf>,
    /// Extra options appended to the overlay mount data.
    pub mount_opts: Option<String>,
}

impl StoreOptions {
    /// Parses the comma-separated `key=value` storage options.
    ///
    /// Keys are case-insensitive and may carry an `overlay.` or `.` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not of the form `key=value`.
    pub fn parse(options: &RuntimeOptions) -> Result<Self> {
        let mut parsed = Self {
            run_root: options.run_root.clone(),
            graph_root: options.graph_root.clone(),
            mount_program: None,
            mount_opts: None,
        };

        for entry in options.storage_opt.split(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry.split_once('=').ok_or_else(|| CapsaError::Config {
                message: format!("storage option {entry:?} is not key=value"),
            })?;
            let key = key.trim().to_ascii_lowercase();
            let key = key
                .strip_prefix("overlay.")
                .or_else(|| key.strip_prefix('.'))
                .unwrap_or(&key);
            let value = value.trim();
            match key {
                "mount_program" => parsed.mount_program = Some(PathBuf::from(value)),
                "mountopt" => parsed.mount_opts = Some(value.to_owned()),
                other => tracing::debug!(key = other, "ignoring unknown storage option"),
            }
        }

        Ok(parsed)
    }
}

/// Backing store over an overlay-driver graph root.
#[derive(Debug)]
pub struct OverlayStore {
    options: StoreOptions,
}

impl OverlayStore {
    /// Opens the store, creating the run root if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the run root cannot be created.
    pub fn open(options: StoreOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.run_root)
            .map_err(|e| CapsaError::io(&options.run_root, e))?;
        tracing::info!(
            graph_root = %options.graph_root.display(),
            run_root = %options.run_root.display(),
            "opening image store"
        );
        Ok(Self { options })
    }

    fn images_dir(&self) -> PathBuf {
        self.options.graph_root.join(IMAGES_DIR)
    }

    fn layers_dir(&self) -> PathBuf {
        self.options.graph_root.join(LAYERS_DIR)
    }

    /// Computes the overlay directories of an existing layer.
    fn overlay_config(&self, layer: &LayerId) -> Result<OverlayConfig> {
        let layers = self.layers_dir();
        let dir = layers.join(layer.as_str());
        if layer.is_empty() || !dir.is_dir() {
            return Err(CapsaError::NotFound {
                kind: "layer",
                id: layer.to_string(),
            });
        }

        let lower_file = dir.join("lower");
        let lower_dirs = match std::fs::read_to_string(&lower_file) {
            Ok(content) => content
                .trim()
                .split(':')
                .filter(|l| !l.is_empty())
                .map(|l| layers.join(l))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![dir.join("empty")],
            Err(e) => return Err(CapsaError::io(lower_file, e)),
        };

        Ok(OverlayConfig {
            lower_dirs,
            upper_dir: dir.join("diff"),
            work_dir: dir.join("work"),
            merged_dir: dir.join("merged"),
        })
    }
}

impl ImageStore for OverlayStore {
    fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let path = self.images_dir().join(IMAGES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| CapsaError::io(&path, e))?;
        let records: Vec<ImageRecord> = serde_json::from_str(&content)?;
        Ok(records)
    }

    fn image_big_data(&self, id: &ImageId, key: &str) -> Result<Vec<u8>> {
        let path = self
            .images_dir()
            .join(id.as_str())
            .join(big_data_file_name(key));
        std::fs::read(&path).map_err(|e| CapsaError::io(path, e))
    }

    fn mount_layer(&self, layer: &LayerId) -> Result<PathBuf> {
        let config = self.overlay_config(layer)?;
        let extra = self.options.mount_opts.as_deref();
        match &self.options.mount_program {
            Some(program) => overlayfs::mount_with_program(&LinuxSyscall, program, &config, extra)?,
            None => overlayfs::mount_overlay(&LinuxSyscall, &config, extra)?,
        }
        tracing::info!(layer = %layer, merged = %config.merged_dir.display(), "layer mounted");
        Ok(config.merged_dir)
    }
}

/// File name a metadata blob is stored under.
///
/// Keys made only of lowercase letters, digits and dots are used as is;
/// anything else is `=` followed by the standard base64 of the key.
fn big_data_file_name(key: &str) -> String {
    let plain = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.');
    if plain {
        key.to_owned()
    } else {
        format!("={}", STANDARD.encode(key))
    }
}
