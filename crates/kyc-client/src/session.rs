use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("token store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Bearer credentials returned by login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// JSON file holding the access and refresh tokens between runs.
///
/// Written atomically (temp file + rename) with mode 0600 on Unix.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read stored tokens. A missing file is not an error.
    pub fn load(&self) -> Result<Option<AuthTokens>, TokenStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_err(source)),
        };
        let tokens = serde_json::from_slice(&bytes).map_err(|source| TokenStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(tokens))
    }

    pub fn save(&self, tokens: &AuthTokens) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_err(source))?;
        }
        let json = serde_json::to_vec_pretty(tokens).map_err(|source| TokenStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp_path = self.path.with_extension("json.part");
        write_private(&tmp_path, &json).map_err(|source| self.io_err(source))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| self.io_err(source))?;

        tracing::debug!(path = %self.path.display(), "tokens saved");
        Ok(())
    }

    pub fn remove(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "tokens removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_err(source)),
        }
    }

    fn io_err(&self, source: std::io::Error) -> TokenStoreError {
        TokenStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(bytes)?;
    f.flush()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

/// Credentials for the current user, shared explicitly with whoever needs
/// them instead of living in ambient global storage.
#[derive(Debug)]
pub struct SessionContext {
    store: Option<TokenStore>,
    tokens: RwLock<Option<AuthTokens>>,
}

impl SessionContext {
    /// Context backed by a token file; existing tokens are loaded.
    pub fn with_store(store: TokenStore) -> Result<Self, TokenStoreError> {
        let tokens = store.load()?;
        tracing::debug!(
            path = %store.path().display(),
            logged_in = tokens.is_some(),
            "session context opened"
        );
        Ok(Self {
            store: Some(store),
            tokens: RwLock::new(tokens),
        })
    }

    /// Context that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            store: None,
            tokens: RwLock::new(None),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|t| t.access.clone())
    }

    pub fn tokens(&self) -> Option<AuthTokens> {
        self.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Replace the tokens in memory and persist them.
    pub fn set_tokens(&self, tokens: AuthTokens) -> Result<(), TokenStoreError> {
        if let Some(store) = &self.store {
            store.save(&tokens)?;
        }
        *self.write() = Some(tokens);
        Ok(())
    }

    /// Forget the tokens in memory and on disk.
    pub fn clear(&self) -> Result<(), TokenStoreError> {
        *self.write() = None;
        if let Some(store) = &self.store {
            store.remove()?;
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<AuthTokens>> {
        self.tokens.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<AuthTokens>> {
        self.tokens.write().unwrap_or_else(|e| e.into_inner())
    }
}
