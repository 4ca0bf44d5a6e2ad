use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::{GatewayError, Result};

/// On-disk object storage.
///
/// Each object lives at `{dir}/{bucket}/{path}` and is served from
/// `{public_url}/{bucket}/{path}`.
pub struct ObjectStore {
    dir: PathBuf,
    public_url: String,
}

impl ObjectStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Location of an object, refusing anything that would escape the storage directory.
    pub fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(path);
        let safe = !bucket.is_empty()
            && !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(GatewayError::InvalidRow(format!(
                "invalid object path {}/{}",
                bucket, path
            )));
        }
        Ok(self.dir.join(relative))
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_url, bucket, path)
    }

    pub async fn put(&self, bucket: &str, path: &str, bytes: &[u8], upsert: bool) -> Result<String> {
        let target = self.object_path(bucket, path)?;

        if !upsert && fs::try_exists(&target).await.unwrap_or(false) {
            return Err(GatewayError::Conflict(format!("object {}/{} exists", bucket, path)));
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| GatewayError::Storage(e.to_string()))?;
        }
        fs::write(&target, bytes)
            .await
            .map_err(|e| GatewayError::Storage(e.to_string()))?;

        info!("Stored object {}/{} ({} bytes)", bucket, path, bytes.len());
        Ok(self.public_url(bucket, path))
    }

    pub async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.object_path(bucket, path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GatewayError::NotFound),
            Err(e) => Err(GatewayError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(name: &str) -> ObjectStore {
        let dir = std::env::temp_dir().join(format!("vortex_objects_{}_{}", name, uuid::Uuid::new_v4()));
        ObjectStore::new(dir, "http://localhost:3000/storage/").await.unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = store("put").await;
        let url = store.put("avatars", "u1/avatar.png", b"png", false).await.unwrap();
        assert_eq!(url, "http://localhost:3000/storage/avatars/u1/avatar.png");
        assert_eq!(store.get("avatars", "u1/avatar.png").await.unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_upsert_controls_overwrite() {
        let store = store("upsert").await;
        store.put("avatars", "a.png", b"1", false).await.unwrap();
        assert!(matches!(
            store.put("avatars", "a.png", b"2", false).await,
            Err(GatewayError::Conflict(_))
        ));
        store.put("avatars", "a.png", b"2", true).await.unwrap();
        assert_eq!(store.get("avatars", "a.png").await.unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let store = store("traversal").await;
        assert!(store.object_path("avatars", "../secrets").is_err());
        assert!(store.object_path("avatars", "/etc/passwd").is_err());
        assert!(store.object_path("", "a.png").is_err());
        assert!(matches!(store.get("avatars", "missing.png").await, Err(GatewayError::NotFound)));
    }
}
