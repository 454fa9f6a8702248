use crate::error::{Error, Result};

use std::fs;
use std::path::Path;

use rand::RngCore;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Resolve the bearer token securing the API.
///
/// A configured token wins and is persisted; otherwise a previously
/// persisted token is reused; otherwise a random one is generated and
/// persisted with owner-only permissions. The token itself is never logged,
/// only its file path.
pub fn load_or_generate(path: &Path, configured: Option<&str>) -> Result<String> {
    if let Some(token) = configured {
        persist(path, token)?;
        return Ok(token.to_string());
    }

    if path.exists() {
        let token = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("failed to read token file {path:?}"), e))?;
        return Ok(token.trim().to_string());
    }

    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    persist(path, &token)?;
    tracing::info!(msg = "generated new authentication token", path = %path.display());
    Ok(token)
}

fn persist(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::IoError(format!("failed to create {parent:?}"), e))?;
    }
    fs::write(path, token)
        .map_err(|e| Error::IoError(format!("failed to write token file {path:?}"), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::IoError(format!("failed to chmod token file {path:?}"), e))?;
    }
    Ok(())
}

/// SHA-256 digest used to compare presented tokens without retaining the
/// plain text beyond startup.
pub fn digest(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}
