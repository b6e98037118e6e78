use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 9993;
pub const DEFAULT_CONTROL_PORT: u16 = 39393;
pub const SERVICE_CONFIG_FILE: &str = "service.yaml";
pub const AUTH_TOKEN_FILE: &str = "authtoken.secret";
pub const IDENTITY_SECRET_FILE: &str = "identity.secret";
pub const IDENTITY_PUBLIC_FILE: &str = "identity.public";
pub const USER_TOKEN_FILE: &str = ".peerlinkAuthToken";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Usage(String),
}

/// Effective settings for the service role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub home: PathBuf,
    /// UDP port for network I/O.
    pub port: u16,
    /// Loopback TCP port for control requests.
    pub control_port: u16,
}

impl ServiceConfig {
    pub fn with_defaults(home: PathBuf) -> Self {
        Self {
            home,
            port: DEFAULT_PORT,
            control_port: DEFAULT_CONTROL_PORT,
        }
    }

    pub fn auth_token_path(&self) -> PathBuf {
        self.home.join(AUTH_TOKEN_FILE)
    }
}

// -------- YAML file schema (all keys optional; strict) --------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    control_port: Option<u16>,
}

/// Build the service config for `home`.
///
/// Precedence per setting: non-zero CLI value, then `<home>/service.yaml`, then the built-in default.
/// A missing file is not an error; an unreadable or malformed one is.
pub fn load_service_config(
    home: &Path,
    cli_port: Option<u16>,
    cli_control_port: Option<u16>,
) -> Result<ServiceConfig, ConfigError> {
    let mut cfg = ServiceConfig::with_defaults(home.to_path_buf());

    let path = home.join(SERVICE_CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            // An empty document deserializes as unit, not as an empty map.
            let file_cfg: ServiceConfigFile = if raw.trim().is_empty() {
                ServiceConfigFile::default()
            } else {
                serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?
            };
            if let Some(p) = file_cfg.port.filter(|p| *p != 0) {
                cfg.port = p;
            }
            if let Some(p) = file_cfg.control_port.filter(|p| *p != 0) {
                cfg.control_port = p;
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(ConfigError::Read { path, source }),
    }

    if let Some(p) = cli_port.filter(|p| *p != 0) {
        cfg.port = p;
    }
    if let Some(p) = cli_control_port.filter(|p| *p != 0) {
        cfg.control_port = p;
    }

    Ok(cfg)
}

pub fn default_home() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Library/Application Support/PeerLink")
    } else if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\PeerLink")
    } else {
        PathBuf::from("/var/lib/peerlink")
    }
}

/// Token file of the invoking user (`~/.peerlinkAuthToken`).
pub fn user_token_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(USER_TOKEN_FILE))
}

/// Token file written by the service in its default home.
pub fn system_token_path() -> PathBuf {
    default_home().join(AUTH_TOKEN_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_switches() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_service_config(dir.path(), None, None).unwrap();
        assert_eq!(cfg, ServiceConfig::with_defaults(dir.path().to_path_buf()));
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SERVICE_CONFIG_FILE),
            "port: 10000\ncontrol_port: 40000\n",
        )
        .unwrap();

        let cfg = load_service_config(dir.path(), None, None).unwrap();
        assert_eq!((cfg.port, cfg.control_port), (10000, 40000));

        let cfg = load_service_config(dir.path(), Some(12345), Some(0)).unwrap();
        assert_eq!((cfg.port, cfg.control_port), (12345, 40000));
    }

    #[test]
    fn zero_means_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_service_config(dir.path(), Some(0), Some(0)).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.control_port, DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn empty_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVICE_CONFIG_FILE), "\n").unwrap();
        assert!(load_service_config(dir.path(), None, None).is_ok());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVICE_CONFIG_FILE), "prot: 1\n").unwrap();
        let err = load_service_config(dir.path(), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn out_of_range_port_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVICE_CONFIG_FILE), "port: 70000\n").unwrap();
        assert!(load_service_config(dir.path(), None, None).is_err());
    }

    #[test]
    fn token_paths() {
        assert!(system_token_path().ends_with(AUTH_TOKEN_FILE));
        if let Some(p) = user_token_path() {
            assert!(p.ends_with(USER_TOKEN_FILE));
        }
    }
}
