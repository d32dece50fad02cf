use std::{
    env,
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::*;
use pos_common::Secret;

use crate::PosApiError;

/// Where the bearer token comes from. Implementations are consulted on every request and must not cache the token
/// on behalf of the client.
pub trait TokenStore: Send + Sync {
    fn load_token(&self) -> Result<Option<Secret<String>>, PosApiError>;
}

//--------------------------------------    FileTokenStore     ---------------------------------------------------------
/// The persisted session token. The file is re-read on every call so that a token written by another process (a login,
/// a refresh) is picked up on the very next request.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `~/.pos/session_token`, unless overridden by `POS_TOKEN_FILE`.
    pub fn default_path() -> io::Result<PathBuf> {
        if let Ok(p) = env::var("POS_TOKEN_FILE") {
            return Ok(PathBuf::from(p));
        }
        let home = dirs::home_dir().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Home directory not found"))?;
        Ok(home.join(".pos").join("session_token"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_token(&self, token: &Secret<String>) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                set_permissions(dir, 0o700)?;
            }
        }
        fs::write(&self.path, token.reveal().trim())?;
        set_permissions(&self.path, 0o600)?;
        info!("🔑️ Session token saved to {}", self.path.display());
        Ok(())
    }

    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load_token(&self) -> Result<Option<Secret<String>>, PosApiError> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(Secret::new(s.trim().to_string()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PosApiError::TokenStore(format!("{}: {e}", self.path.display()))),
        }
    }
}

fn set_permissions(path: &Path, perms: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(perms);
        fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = (path, perms);
    Ok(())
}

//--------------------------------------   StaticTokenStore    ---------------------------------------------------------
/// An in-memory token. Rotating it with [`StaticTokenStore::set_token`] affects the next request.
#[derive(Debug, Default)]
pub struct StaticTokenStore {
    token: std::sync::RwLock<Option<Secret<String>>>,
}

impl StaticTokenStore {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: std::sync::RwLock::new(Some(Secret::new(token.into()))) }
    }

    pub fn set_token<S: Into<String>>(&self, token: S) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Secret::new(token.into()));
    }

    pub fn clear(&self) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }
}

impl TokenStore for StaticTokenStore {
    fn load_token(&self) -> Result<Option<Secret<String>>, PosApiError> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.clone())
    }
}

/// `POS_ACCESS_TOKEN` wins when it is set (handy for CI), otherwise the persisted session token file is used.
pub fn token_store_from_env() -> Result<Arc<dyn TokenStore>, PosApiError> {
    match env::var("POS_ACCESS_TOKEN") {
        Ok(token) if !token.trim().is_empty() => {
            debug!("🔑️ Using the access token from POS_ACCESS_TOKEN");
            Ok(Arc::new(StaticTokenStore::new(token.trim())))
        },
        _ => {
            let path = FileTokenStore::default_path().map_err(|e| PosApiError::TokenStore(e.to_string()))?;
            debug!("🔑️ Using the session token file at {}", path.display());
            Ok(Arc::new(FileTokenStore::new(path)))
        },
    }
}
