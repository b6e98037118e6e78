use crate::pl::authtoken;
use crate::pl::identity::{Identity, IdentityError, ADDRESS_HEX_LENGTH, ADDRESS_LENGTH};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = -1;

#[derive(Debug, Parser)]
#[command(
    name = "peerlink-idtool",
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
pub struct IdToolArgs {
    #[command(subcommand)]
    pub cmd: IdCmd,
}

#[derive(Debug, Subcommand)]
pub enum IdCmd {
    /// Create a new identity; print it, or write secret (and public) files
    Generate {
        secret: Option<PathBuf>,
        public: Option<PathBuf>,
    },
    /// Check that an identity is internally consistent
    Validate { identity: String },
    /// Print the public half of an identity
    Getpublic { identity: String },
    /// Print the hex signature of a file
    Sign { identity: String, file: PathBuf },
    /// Check a hex signature over a file
    Verify {
        identity: String,
        file: PathBuf,
        signature: String,
    },
}

#[derive(Debug, Error)]
pub enum IdToolError {
    #[error("Error writing to {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Identity argument invalid or file unreadable: {0}")]
    BadIdentity(String),
    #[error("{0} FAILED validation.")]
    FailedValidation(String),
    #[error("{0} does not contain a private key (must use private to sign)")]
    NoPrivate(String),
    #[error("{} is not readable", .0.display())]
    Unreadable(PathBuf),
    #[error("{} signature check FAILED", .0.display())]
    SignatureFailed(PathBuf),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Output(#[from] io::Error),
}

pub fn write_help<W: Write>(out: &mut W, program: &str) -> io::Result<()> {
    writeln!(out, "Usage: {program} <command> [<args>]")?;
    writeln!(out)?;
    writeln!(out, "Commands:")?;
    writeln!(out, "  generate [<identity.secret>] [<identity.public>]")?;
    writeln!(out, "  validate <identity.secret/public>")?;
    writeln!(out, "  getpublic <identity.secret>")?;
    writeln!(out, "  sign <identity.secret> <file>")?;
    writeln!(out, "  verify <identity.secret/public> <file> <signature>")?;
    Ok(())
}

/// An identity given on the command line: a literal when it looks like one, else a file path.
pub fn identity_from_arg(arg: &str) -> Option<Identity> {
    let literal = arg.len() > 32 && arg.as_bytes().get(ADDRESS_HEX_LENGTH) == Some(&b':');
    let text = if literal {
        arg.to_string()
    } else {
        fs::read_to_string(arg).ok()?
    };
    text.parse().ok()
}

fn load(arg: &str) -> Result<Identity, IdToolError> {
    identity_from_arg(arg).ok_or_else(|| IdToolError::BadIdentity(arg.to_string()))
}

fn read_input(path: &Path) -> Result<Vec<u8>, IdToolError> {
    fs::read(path).map_err(|_| IdToolError::Unreadable(path.to_path_buf()))
}

pub fn execute<W: Write>(cmd: IdCmd, out: &mut W) -> Result<(), IdToolError> {
    match cmd {
        IdCmd::Generate { secret, public } => {
            let id = Identity::generate()?;
            let Some(secret_path) = secret else {
                writeln!(out, "{}", id.to_string_with(true))?;
                return Ok(());
            };
            authtoken::write_secret(&secret_path, id.to_string_with(true).as_bytes()).map_err(
                |source| IdToolError::Write {
                    path: secret_path.clone(),
                    source,
                },
            )?;
            writeln!(out, "{} written", secret_path.display())?;
            if let Some(public_path) = public {
                fs::write(&public_path, id.to_string_with(false)).map_err(|source| {
                    IdToolError::Write {
                        path: public_path.clone(),
                        source,
                    }
                })?;
                writeln!(out, "{} written", public_path.display())?;
            }
            Ok(())
        }
        IdCmd::Validate { identity } => {
            let id = load(&identity)?;
            if !id.locally_validate() {
                return Err(IdToolError::FailedValidation(identity));
            }
            writeln!(out, "{identity} is a valid identity")?;
            Ok(())
        }
        IdCmd::Getpublic { identity } => {
            let id = load(&identity)?;
            writeln!(out, "{}", id.to_string_with(false))?;
            Ok(())
        }
        IdCmd::Sign { identity, file } => {
            let id = load(&identity)?;
            if !id.has_private() {
                return Err(IdToolError::NoPrivate(identity));
            }
            let data = read_input(&file)?;
            let sig = id.sign(&data)?;
            writeln!(out, "{}", hex::encode(sig.to_bytes()))?;
            Ok(())
        }
        IdCmd::Verify {
            identity,
            file,
            signature,
        } => {
            let id = load(&identity)?;
            let data = read_input(&file)?;
            let sig = hex::decode(signature.trim()).unwrap_or_default();
            if sig.len() > ADDRESS_LENGTH && id.verify(&data, &sig) {
                writeln!(out, "{} signature valid", file.display())?;
                Ok(())
            } else {
                Err(IdToolError::SignatureFailed(file))
            }
        }
    }
}

/// Identity-tool entry point; returns the process exit code.
pub fn run(args: Vec<String>) -> i32 {
    run_with(args, &mut io::stdout().lock())
}

pub fn run_with<W: Write>(args: Vec<String>, out: &mut W) -> i32 {
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "peerlink-idtool".to_string());
    let parsed = match IdToolArgs::try_parse_from(&args) {
        Ok(a) => a,
        Err(e) => {
            log::debug!(target: "idtool", "usage: {}", e.to_string().trim_end());
            let _ = write_help(&mut io::stderr().lock(), &program);
            return EXIT_ERROR;
        }
    };
    match execute(parsed.cmd, out) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("{e}");
            EXIT_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn run_capture(v: &[&str]) -> (i32, String) {
        let mut out = Vec::new();
        let code = run_with(argv(v), &mut out);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn generate_to_stdout_parses_back() {
        let (code, text) = run_capture(&["peerlink-idtool", "generate"]);
        assert_eq!(code, EXIT_OK);
        let id: Identity = text.trim().parse().unwrap();
        assert!(id.has_private());
        assert!(id.locally_validate());
    }

    #[test]
    fn generate_sign_verify_via_files() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("identity.secret");
        let public = dir.path().join("identity.public");
        let (code, text) = run_capture(&[
            "peerlink-idtool",
            "generate",
            secret.to_str().unwrap(),
            public.to_str().unwrap(),
        ]);
        assert_eq!(code, EXIT_OK);
        assert_eq!(text.lines().count(), 2);

        let msg = dir.path().join("msg.txt");
        fs::write(&msg, b"hello peers").unwrap();
        let (code, sig) = run_capture(&[
            "peerlink-idtool",
            "sign",
            secret.to_str().unwrap(),
            msg.to_str().unwrap(),
        ]);
        assert_eq!(code, EXIT_OK);
        let sig = sig.trim().to_string();
        assert_eq!(sig.len(), 128);

        let (code, text) = run_capture(&[
            "peerlink-idtool",
            "verify",
            public.to_str().unwrap(),
            msg.to_str().unwrap(),
            &sig,
        ]);
        assert_eq!(code, EXIT_OK);
        assert!(text.ends_with("signature valid\n"));

        fs::write(&msg, b"tampered").unwrap();
        let (code, _) = run_capture(&[
            "peerlink-idtool",
            "verify",
            public.to_str().unwrap(),
            msg.to_str().unwrap(),
            &sig,
        ]);
        assert_eq!(code, EXIT_ERROR);
    }

    #[test]
    fn sign_requires_private_half() {
        let dir = tempfile::tempdir().unwrap();
        let id = Identity::generate().unwrap();
        let public_literal = id.to_string_with(false);
        let msg = dir.path().join("m");
        fs::write(&msg, b"x").unwrap();
        let err = execute(
            IdCmd::Sign {
                identity: public_literal,
                file: msg,
            },
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, IdToolError::NoPrivate(_)));
    }

    #[test]
    fn literal_and_file_identities() {
        let dir = tempfile::tempdir().unwrap();
        let id = Identity::generate().unwrap();
        let literal = id.to_string_with(true);
        assert_eq!(identity_from_arg(&literal).unwrap().address(), id.address());

        let path = dir.path().join("id");
        fs::write(&path, &literal).unwrap();
        assert_eq!(
            identity_from_arg(path.to_str().unwrap()).unwrap().address(),
            id.address()
        );
        assert!(identity_from_arg("short-and-missing").is_none());
    }

    #[test]
    fn getpublic_strips_secret() {
        let id = Identity::generate().unwrap();
        let mut out = Vec::new();
        execute(
            IdCmd::Getpublic {
                identity: id.to_string_with(true),
            },
            &mut out,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.trim(), id.to_string_with(false));
    }

    #[test]
    fn short_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let msg = dir.path().join("m");
        fs::write(&msg, b"x").unwrap();
        let id = Identity::generate().unwrap();
        let err = execute(
            IdCmd::Verify {
                identity: id.to_string_with(false),
                file: msg,
                signature: "abcd".into(),
            },
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, IdToolError::SignatureFailed(_)));
    }

    #[test]
    fn usage_errors() {
        assert_eq!(run_capture(&["peerlink-idtool"]).0, EXIT_ERROR);
        assert_eq!(run_capture(&["peerlink-idtool", "bogus"]).0, EXIT_ERROR);
        assert_eq!(run_capture(&["peerlink-idtool", "validate"]).0, EXIT_ERROR);
        assert_eq!(
            run_capture(&["peerlink-idtool", "validate", "/nonexistent/identity"]).0,
            EXIT_ERROR
        );
    }
}
