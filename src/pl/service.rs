//! The service engine behind the supervisor.
//!
//! [`Service`] is the seam the supervisor drives; [`Node`] is the engine this
//! crate ships. It owns the node identity, the UDP network socket and the
//! loopback control listener, and records its outcome in the shared
//! [`TerminationState`].

use crate::pl::authtoken;
use crate::pl::build_info;
use crate::pl::config::{ServiceConfig, IDENTITY_PUBLIC_FILE, IDENTITY_SECRET_FILE};
use crate::pl::identity::{Identity, IdentityError};
use crate::pl::rpc::{self, ControlError};
use crate::pl::termination::{TerminationReason, TerminationState};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unable to load identity {}: {source}", .path.display())]
    IdentityIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity {} is invalid: {source}", .path.display())]
    IdentityInvalid {
        path: PathBuf,
        #[source]
        source: IdentityError,
    },
    #[error("unable to load auth token {}: {source}", .path.display())]
    AuthToken {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to bind {what} port {port}: {source}")]
    Bind {
        what: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// A long-running engine the supervisor can start and wait on.
pub trait Service {
    /// Block until the engine reaches a terminal reason and return it.
    ///
    /// Failures inside the engine are reported as
    /// [`TerminationReason::UnrecoverableError`], never as a panic or `Running`.
    fn start_and_wait(&mut self) -> TerminationReason;
}

/// What a control command asks the node to do once its reply has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub then: Option<TerminationReason>,
}

impl Reply {
    fn text(lines: Vec<String>) -> Self {
        Self { lines, then: None }
    }
}

#[derive(Debug)]
struct NodeShared {
    identity: Identity,
    auth_token: String,
    port: u16,
    started: Instant,
    datagrams: AtomicU64,
    termination: Arc<TerminationState>,
}

#[derive(Debug)]
pub struct Node {
    cfg: ServiceConfig,
    shared: Arc<NodeShared>,
}

impl Node {
    pub fn new(cfg: &ServiceConfig, termination: Arc<TerminationState>) -> Result<Self, ServiceError> {
        let identity = load_or_create_identity(&cfg.home)?;
        let token_path = cfg.auth_token_path();
        let auth_token = authtoken::load_or_generate(&token_path).map_err(|source| {
            ServiceError::AuthToken {
                path: token_path.clone(),
                source,
            }
        })?;
        log::info!(target: "node", "identity address={}", identity.address());
        Ok(Self {
            cfg: cfg.clone(),
            shared: Arc::new(NodeShared {
                identity,
                auth_token,
                port: cfg.port,
                started: Instant::now(),
                datagrams: AtomicU64::new(0),
                termination,
            }),
        })
    }

    pub fn address(&self) -> String {
        self.shared.identity.address()
    }

    async fn run(&self) -> Result<(), ServiceError> {
        let udp = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.cfg.port)))
            .await
            .map_err(|source| ServiceError::Bind {
                what: "network",
                port: self.cfg.port,
                source,
            })?;
        let control = TcpListener::bind(rpc::loopback(self.cfg.control_port))
            .await
            .map_err(|source| ServiceError::Bind {
                what: "control",
                port: self.cfg.control_port,
                source,
            })?;
        log::info!(
            target: "node",
            "online port={} control={}",
            self.cfg.port,
            rpc::loopback(self.cfg.control_port)
        );

        let termination = Arc::clone(&self.shared.termination);
        let mut packet = vec![0u8; 2048];
        loop {
            tokio::select! {
                reason = termination.wait() => {
                    log::info!(target: "node", "stopping: {reason}");
                    return Ok(());
                }
                r = control.accept() => match r {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_control(shared, stream).await {
                                log::warn!(target: "control", "peer={peer} {e}");
                            }
                        });
                    }
                    Err(e) => {
                        log::warn!(target: "control", "accept error: {e}");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                },
                r = udp.recv_from(&mut packet) => match r {
                    Ok((n, from)) => {
                        self.shared.datagrams.fetch_add(1, Ordering::Relaxed);
                        log::trace!(target: "node", "datagram bytes={n} from={from}");
                    }
                    // ICMP-driven errors on UDP sockets are transient.
                    Err(e) => log::debug!(target: "node", "udp receive error: {e}"),
                },
            }
        }
    }
}

impl Service for Node {
    fn start_and_wait(&mut self) -> TerminationReason {
        let termination = Arc::clone(&self.shared.termination);
        let result = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(ServiceError::Runtime)
            .and_then(|rt| {
                let r = rt.block_on(self.run());
                rt.shutdown_timeout(SHUTDOWN_GRACE);
                r
            });
        if let Err(e) = result {
            termination.terminate(TerminationReason::UnrecoverableError(e.to_string()));
        }
        termination.current()
    }
}

fn load_or_create_identity(home: &Path) -> Result<Identity, ServiceError> {
    let secret_path = home.join(IDENTITY_SECRET_FILE);
    match std::fs::read_to_string(&secret_path) {
        Ok(raw) => {
            let id: Identity = raw.parse().map_err(|source| ServiceError::IdentityInvalid {
                path: secret_path.clone(),
                source,
            })?;
            if !id.has_private() || !id.locally_validate() {
                return Err(ServiceError::IdentityInvalid {
                    path: secret_path,
                    source: IdentityError::Parse("failed local validation".into()),
                });
            }
            Ok(id)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = Identity::generate().map_err(|source| ServiceError::IdentityInvalid {
                path: secret_path.clone(),
                source,
            })?;
            let io_err = |path: &Path| {
                let path = path.to_path_buf();
                move |source| ServiceError::IdentityIo { path, source }
            };
            authtoken::write_secret(&secret_path, id.to_string_with(true).as_bytes())
                .map_err(io_err(&secret_path))?;
            let public_path = home.join(IDENTITY_PUBLIC_FILE);
            std::fs::write(&public_path, id.to_string_with(false)).map_err(io_err(&public_path))?;
            log::info!(target: "node", "generated identity {}", secret_path.display());
            Ok(id)
        }
        Err(source) => Err(ServiceError::IdentityIo {
            path: secret_path,
            source,
        }),
    }
}

async fn handle_control(shared: Arc<NodeShared>, stream: TcpStream) -> Result<(), ControlError> {
    let mut reader = BufReader::new(stream);
    let req = tokio::time::timeout(CONTROL_READ_TIMEOUT, rpc::read_request(&mut reader))
        .await
        .map_err(|_| ControlError::Request("timed out waiting for request".into()))??;

    let authorized: bool = req
        .auth
        .trim()
        .as_bytes()
        .ct_eq(shared.auth_token.as_bytes())
        .into();
    let reply = if authorized {
        log::debug!(target: "control", "command={:?}", req.command);
        dispatch(&shared, &req.command)
    } else {
        log::warn!(target: "control", "rejected request with bad auth token");
        Reply::text(vec!["401 unauthorized".to_string()])
    };

    rpc::write_response(reader.get_mut(), &reply.lines).await?;
    if let Some(reason) = reply.then {
        shared.termination.terminate(reason);
    }
    Ok(())
}

fn dispatch(shared: &NodeShared, command: &str) -> Reply {
    let mut words = command.split_whitespace();
    let Some(verb) = words.next() else {
        return Reply::text(vec!["400 empty command".to_string()]);
    };
    match verb.to_ascii_lowercase().as_str() {
        "help" => Reply::text(vec![
            "200 help help".to_string(),
            "200 help info".to_string(),
            "200 help version".to_string(),
            "200 help terminate".to_string(),
            "200 help upgrade <path>".to_string(),
        ]),
        "info" => Reply::text(vec![format!(
            "200 info {} {} {} {} {}",
            shared.identity.address(),
            build_info::version(),
            shared.port,
            shared.started.elapsed().as_secs(),
            shared.datagrams.load(Ordering::Relaxed)
        )]),
        "version" => Reply::text(vec![format!("200 version {}", build_info::version())]),
        "terminate" => Reply {
            lines: vec!["200 terminate OK".to_string()],
            then: Some(TerminationReason::NormalTermination),
        },
        "upgrade" => {
            let path: Vec<&str> = words.collect();
            if path.is_empty() {
                return Reply::text(vec!["400 upgrade requires a path".to_string()]);
            }
            let path = PathBuf::from(path.join(" "));
            Reply {
                lines: vec![format!("200 upgrade {}", path.display())],
                then: Some(TerminationReason::RestartForUpgrade(path)),
            }
        }
        _ => Reply::text(vec![format!("400 unknown command: {verb}")]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> NodeShared {
        NodeShared {
            identity: Identity::generate().unwrap(),
            auth_token: "tok".into(),
            port: 9993,
            started: Instant::now(),
            datagrams: AtomicU64::new(0),
            termination: TerminationState::new(),
        }
    }

    #[test]
    fn info_reports_address_and_version() {
        let s = shared();
        let reply = dispatch(&s, "info");
        assert!(reply.then.is_none());
        assert_eq!(reply.lines.len(), 1);
        assert!(reply.lines[0].starts_with(&format!("200 info {} ", s.identity.address())));
        assert!(reply.lines[0].contains(build_info::version()));
    }

    #[test]
    fn terminate_and_upgrade_defer_their_effect() {
        let s = shared();
        let r = dispatch(&s, "terminate");
        assert_eq!(r.then, Some(TerminationReason::NormalTermination));
        let r = dispatch(&s, "upgrade /opt/peerlink-new");
        assert_eq!(
            r.then,
            Some(TerminationReason::RestartForUpgrade("/opt/peerlink-new".into()))
        );
        assert!(!s.termination.is_terminated());
    }

    #[test]
    fn unknown_and_empty_commands() {
        let s = shared();
        assert_eq!(dispatch(&s, "frobnicate").lines, vec!["400 unknown command: frobnicate"]);
        assert_eq!(dispatch(&s, "   ").lines, vec!["400 empty command"]);
        assert!(dispatch(&s, "upgrade").then.is_none());
    }

    #[test]
    fn identity_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = load_or_create_identity(dir.path()).unwrap();
        let b = load_or_create_identity(dir.path()).unwrap();
        assert_eq!(a.address(), b.address());
        assert!(dir.path().join(IDENTITY_PUBLIC_FILE).exists());
    }

    #[test]
    fn corrupt_identity_is_a_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IDENTITY_SECRET_FILE), "garbage").unwrap();
        let cfg = ServiceConfig::with_defaults(dir.path().to_path_buf());
        let err = Node::new(&cfg, TerminationState::new()).unwrap_err();
        assert!(matches!(err, ServiceError::IdentityInvalid { .. }));
    }
}
