//! Bearer token provider backed by the login endpoint and the token cache.

use tokio::sync::Mutex;

use super::token_store::{FileTokenStore, StoredToken};

/// Login form kept in memory so a rejected token can be replaced once.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    token: Option<StoredToken>,
    /// Set once the cache has been consulted.
    loaded: bool,
    credentials: Option<Credentials>,
}

/// Session for one backend base URL.
#[derive(Debug)]
pub struct Session {
    base_url: String,
    store: FileTokenStore,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(base_url: impl Into<String>, store: FileTokenStore) -> Self {
        Self {
            base_url: base_url.into(),
            store,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Current access token, reading the cache on first use.
    pub async fn bearer(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.token = self.store.get(&self.base_url).await;
            state.loaded = true;
            if state.token.is_some() {
                tracing::info!("using cached token for {}", self.base_url);
            }
        }
        state.token.as_ref().map(|t| t.access_token.clone())
    }

    /// Store a fresh token and the credentials that produced it.
    pub async fn remember(&self, credentials: Credentials, token: StoredToken) {
        if let Err(e) = self.store.set(&self.base_url, token.clone()).await {
            tracing::warn!("token cache write failed: {e:#}");
        }
        let mut state = self.state.lock().await;
        state.token = Some(token);
        state.loaded = true;
        state.credentials = Some(credentials);
    }

    /// Drop a rejected token. Returns the credentials for a re-login, if known.
    pub async fn invalidate(&self) -> Option<Credentials> {
        let mut state = self.state.lock().await;
        state.token = None;
        state.loaded = true;
        if let Err(e) = self.store.remove(&self.base_url).await {
            tracing::warn!("token cache cleanup failed: {e:#}");
        }
        state.credentials.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "analyst".into(),
            password: "secret".into(),
        }
    }

    fn token(value: &str) -> StoredToken {
        StoredToken {
            access_token: value.into(),
            token_type: "bearer".into(),
            obtained_at: 0,
        }
    }

    #[tokio::test]
    async fn test_bearer_reads_cache_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.set("http://api", token("cached")).await.unwrap();

        let session = Session::new("http://api", store.clone());
        assert_eq!(session.bearer().await.as_deref(), Some("cached"));

        // Later cache edits do not leak into a live session.
        store.set("http://api", token("other")).await.unwrap();
        assert_eq!(session.bearer().await.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn test_invalidate_returns_credentials_and_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        let session = Session::new("http://api", store.clone());

        assert!(session.invalidate().await.is_none());
        session.remember(creds(), token("t1")).await;
        assert_eq!(session.bearer().await.as_deref(), Some("t1"));

        let again = session.invalidate().await.unwrap();
        assert_eq!(again.username, "analyst");
        assert_eq!(session.bearer().await, None);
        assert_eq!(store.get("http://api").await, None);
    }

    #[test]
    fn test_debug_hides_password() {
        let shown = format!("{:?}", creds());
        assert!(shown.contains("analyst"));
        assert!(!shown.contains("secret"));
    }
}
