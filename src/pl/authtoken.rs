use crate::pl::config;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TOKEN_LEN: usize = 24;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("unable to read token from '{}': {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no token specified on command line and could not read {}", describe_defaults(.user, .system))]
    NotFound {
        user: Option<PathBuf>,
        system: PathBuf,
    },
}

fn describe_defaults(user: &Option<PathBuf>, system: &Path) -> String {
    match user {
        Some(u) => format!("'{}' or '{}'", u.display(), system.display()),
        None => format!("'{}'", system.display()),
    }
}

/// Where a control client looks for its token, in order.
#[derive(Debug, Clone, Default)]
pub struct TokenSources {
    pub literal: Option<String>,
    pub file: Option<PathBuf>,
    pub user: Option<PathBuf>,
    pub system: PathBuf,
}

impl TokenSources {
    pub fn standard(literal: Option<String>, file: Option<PathBuf>) -> Self {
        Self {
            literal,
            file,
            user: config::user_token_path(),
            system: config::system_token_path(),
        }
    }

    /// First non-empty token among: literal, explicit file, user file, system file.
    ///
    /// An explicit file that cannot be read is fatal; the default locations are tried quietly.
    pub fn resolve(&self) -> Result<String, TokenError> {
        if let Some(t) = self.literal.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(t.to_string());
        }
        if let Some(path) = &self.file {
            let raw = fs::read_to_string(path).map_err(|source| TokenError::Unreadable {
                path: path.clone(),
                source,
            })?;
            if let Some(t) = non_empty(&raw) {
                return Ok(t);
            }
        }
        for path in self.user.iter().chain(std::iter::once(&self.system)) {
            match fs::read_to_string(path) {
                Ok(raw) => {
                    if let Some(t) = non_empty(&raw) {
                        log::debug!(target: "control", "using token from {}", path.display());
                        return Ok(t);
                    }
                }
                Err(e) => log::debug!(target: "control", "token {} unavailable: {e}", path.display()),
            }
        }
        Err(TokenError::NotFound {
            user: self.user.clone(),
            system: self.system.clone(),
        })
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

pub fn generate_token() -> io::Result<String> {
    let mut out = String::with_capacity(TOKEN_LEN);
    let mut buf = [0u8; 64];
    // 248 = 4 * 62: rejecting larger bytes keeps the alphabet uniform.
    while out.len() < TOKEN_LEN {
        getrandom::getrandom(&mut buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        for b in buf.iter().copied().filter(|b| *b < 248) {
            if out.len() == TOKEN_LEN {
                break;
            }
            out.push(TOKEN_ALPHABET[(b as usize) % TOKEN_ALPHABET.len()] as char);
        }
    }
    Ok(out)
}

/// Read the service token at `path`, creating it (owner-only on unix) when missing or empty.
pub fn load_or_generate(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            if let Some(t) = non_empty(&raw) {
                return Ok(t);
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let token = generate_token()?;
    write_secret(path, token.as_bytes())?;
    log::info!(target: "control", "generated new auth token {}", path.display());
    Ok(token)
}

/// Write a file readable by its owner only (unix); plain write elsewhere.
pub fn write_secret(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
