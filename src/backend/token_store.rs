//! Bearer token cache stored in a local JSON file.

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, io::ErrorKind, path::PathBuf};
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};

/// Token obtained from the login endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default = "bearer")]
    pub token_type: String,
    /// Unix seconds at login time.
    #[serde(default)]
    pub obtained_at: i64,
}

fn bearer() -> String {
    "bearer".into()
}

/// Stores tokens in a JSON map (token.json) keyed by backend.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    /// Location of the token cache on disk.
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stable hash of the backend base URL (trailing slash insensitive).
    fn backend_key(base_url: &str) -> String {
        let normalized = base_url.trim().trim_end_matches('/').to_ascii_lowercase();
        let hash = Sha256::digest(normalized.as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }

    fn entry_key(base_url: &str) -> String {
        format!("bearer:{}", Self::backend_key(base_url))
    }

    async fn load_map(&self) -> Result<HashMap<String, StoredToken>> {
        match fs::read(&self.path).await {
            Ok(data) => {
                if data.is_empty() {
                    return Ok(HashMap::new());
                }
                serde_json::from_slice(&data)
                    .with_context(|| format!("corrupt token cache {}", self.path.display()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the token map to disk, creating directories if needed.
    async fn save_map(&self, map: &HashMap<String, StoredToken>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(map)?;
        let file = fs::File::create(&self.path).await?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Cached token for the backend, if any. A corrupt cache reads as empty.
    pub async fn get(&self, base_url: &str) -> Option<StoredToken> {
        let mut map = match self.load_map().await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("token cache unreadable: {e:#}");
                return None;
            }
        };
        map.remove(&Self::entry_key(base_url))
    }

    /// Store or replace the token for the backend.
    pub async fn set(&self, base_url: &str, token: StoredToken) -> Result<()> {
        let mut map = self.load_map().await.unwrap_or_default();
        map.insert(Self::entry_key(base_url), token);
        self.save_map(&map).await
    }

    /// Forget the backend's token, e.g. after it was rejected.
    pub async fn remove(&self, base_url: &str) -> Result<()> {
        let mut map = self.load_map().await.unwrap_or_default();
        if map.remove(&Self::entry_key(base_url)).is_some() {
            self.save_map(&map).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: &str) -> StoredToken {
        StoredToken {
            access_token: value.into(),
            token_type: "bearer".into(),
            obtained_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/token.json"));

        assert_eq!(store.get("http://localhost:8000").await, None);
        store.set("http://localhost:8000", token("abc")).await.unwrap();
        store.set("https://prod.example", token("xyz")).await.unwrap();

        assert_eq!(
            store.get("http://localhost:8000/").await.map(|t| t.access_token),
            Some("abc".to_string())
        );
        store.remove("http://localhost:8000").await.unwrap();
        assert_eq!(store.get("http://localhost:8000").await, None);
        assert_eq!(
            store.get("https://prod.example").await.map(|t| t.access_token),
            Some("xyz".to_string())
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileTokenStore::new(&path);

        assert_eq!(store.get("http://localhost:8000").await, None);
        store.set("http://localhost:8000", token("fresh")).await.unwrap();
        assert!(store.get("http://localhost:8000").await.is_some());
    }
}
