//! Image lookup by name.
//!
//! Finds an image in the backing store and extracts what the runtime needs
//! from it: the top layer to mount and the environment declared in the
//! image configuration.

use capsa_common::error::{CapsaError, Result};
use capsa_common::types::{ImageId, LayerId};
use serde::Deserialize;

use crate::storage::{ImageRecord, ImageStore};

/// An image ready to be mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Image identifier.
    pub id: ImageId,
    /// Layer to mount as the container root.
    pub top_layer: LayerId,
    /// `KEY=value` entries declared by the image, in declaration order.
    pub env: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: Option<ContainerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerConfig {
    #[serde(default, alias = "Env")]
    env: Option<Vec<String>>,
}

/// Looks up `name` in `store`.
///
/// An image matches when `name` is one of its names or its exact ID.
///
/// # Errors
///
/// Returns [`CapsaError::NotFound`] when no image matches, or an error if
/// the image metadata cannot be read or parsed.
pub fn resolve_image(store: &dyn ImageStore, name: &str) -> Result<ResolvedImage> {
    let record = store
        .list_images()?
        .into_iter()
        .find(|r| r.id.as_str() == name || r.names.iter().any(|n| n == name))
        .ok_or_else(|| CapsaError::NotFound {
            kind: "image",
            id: name.to_owned(),
        })?;

    let env = match config_key(&record) {
        Some(key) => {
            let data = store.image_big_data(&record.id, key)?;
            let blob: ConfigBlob = serde_json::from_slice(&data)?;
            blob.config.and_then(|c| c.env).unwrap_or_default()
        }
        None => Vec::new(),
    };

    tracing::debug!(image = name, id = %record.id, layer = %record.layer, env = ?env, "image resolved");
    Ok(ResolvedImage {
        id: record.id,
        top_layer: record.layer,
        env,
    })
}

/// Picks the metadata blob holding the image configuration.
fn config_key(record: &ImageRecord) -> Option<&str> {
    let digest_key = format!("sha256:{}", record.id);
    record
        .big_data_names
        .iter()
        .find(|k| **k == digest_key)
        .or_else(|| record.big_data_names.first())
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        images: Vec<ImageRecord>,
        blobs: HashMap<(String, String), Vec<u8>>,
    }

    impl MemoryStore {
        fn with_image(mut self, id: &str, name: &str, keys: &[&str]) -> Self {
            self.images.push(ImageRecord {
                id: ImageId::new(id),
                names: vec![name.to_owned()],
                layer: LayerId::new(format!("{id}-layer")),
                big_data_names: keys.iter().map(|k| (*k).to_owned()).collect(),
            });
            self
        }

        fn with_blob(mut self, id: &str, key: &str, data: &str) -> Self {
            let _ = self
                .blobs
                .insert((id.to_owned(), key.to_owned()), data.as_bytes().to_vec());
            self
        }
    }

    impl ImageStore for MemoryStore {
        fn list_images(&self) -> Result<Vec<ImageRecord>> {
            Ok(self.images.clone())
        }

        fn image_big_data(&self, id: &ImageId, key: &str) -> Result<Vec<u8>> {
            self.blobs
                .get(&(id.to_string(), key.to_owned()))
                .cloned()
                .ok_or_else(|| CapsaError::NotFound {
                    kind: "big data",
                    id: key.to_owned(),
                })
        }

        fn mount_layer(&self, layer: &LayerId) -> Result<PathBuf> {
            Ok(PathBuf::from("/mnt").join(layer.as_str()))
        }
    }

    #[test]
    fn missing_image_is_not_found() {
        let store = MemoryStore::default().with_image("abc", "alpine", &[]);
        let err = resolve_image(&store, "missingimage").unwrap_err();
        assert!(matches!(err, CapsaError::NotFound { kind: "image", ref id } if id == "missingimage"));
    }

    #[test]
    fn image_without_metadata_has_empty_env() {
        let store = MemoryStore::default().with_image("abc", "myimage", &[]);
        let image = resolve_image(&store, "myimage").unwrap();
        assert_eq!(image.top_layer, LayerId::new("abc-layer"));
        assert!(image.env.is_empty());
    }

    #[test]
    fn config_blob_is_preferred_over_first_key() {
        let store = MemoryStore::default()
            .with_image("abc", "myimage", &["manifest", "sha256:abc"])
            .with_blob("abc", "manifest", r#"{"config":{"Env":["WRONG=1"]}}"#)
            .with_blob(
                "abc",
                "sha256:abc",
                r#"{"config":{"Env":["PATH=/usr/bin:/bin","LANG=C"]}}"#,
            );
        let image = resolve_image(&store, "myimage").unwrap();
        assert_eq!(image.env, vec!["PATH=/usr/bin:/bin", "LANG=C"]);
    }

    #[test]
    fn lowercase_env_field_and_lookup_by_id() {
        let store = MemoryStore::default()
            .with_image("abc", "myimage", &["blob"])
            .with_blob("abc", "blob", r#"{"config":{"env":["A=1"]}}"#);
        let image = resolve_image(&store, "abc").unwrap();
        assert_eq!(image.id, ImageId::new("abc"));
        assert_eq!(image.env, vec!["A=1"]);
    }

    #[test]
    fn malformed_metadata_is_a_serialization_error() {
        let store = MemoryStore::default()
            .with_image("abc", "myimage", &["blob"])
            .with_blob("abc", "blob", "not json");
        let err = resolve_image(&store, "myimage").unwrap_err();
        assert!(matches!(err, CapsaError::Serialization { .. }));
    }
}
