use crate::pl::authtoken::TokenSources;
use crate::pl::config;
use crate::pl::rpc::{self, ControlError, Request};
use clap::{ArgAction, Parser};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = -1;
pub const EXIT_TOKEN: i32 = -2;

#[derive(Debug, Parser)]
#[command(
    name = "peerlink-cli",
    about = "PeerLink control client",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct CtlArgs {
    /// Communicate with the service over this local port
    #[arg(short = 'c', value_name = "port")]
    pub control_port: Option<u16>,

    /// Token on the command line
    #[arg(short = 't', value_name = "token")]
    pub token: Option<String>,

    /// Read token from file
    #[arg(short = 'T', value_name = "file")]
    pub token_file: Option<PathBuf>,

    /// No-op; selects this role from the service binary
    #[arg(short = 'q', action = ArgAction::SetTrue, hide = true)]
    pub query: bool,

    #[arg(short = 'h', action = ArgAction::SetTrue)]
    pub help: bool,

    /// Command words, joined with single spaces
    #[arg(trailing_var_arg = true, num_args = 0..)]
    pub command: Vec<String>,
}

impl CtlArgs {
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

pub fn write_help<W: Write>(out: &mut W, program: &str) -> io::Result<()> {
    writeln!(out, "Usage: {program} [-switches] <command>")?;
    writeln!(out)?;
    writeln!(out, "Available switches:")?;
    writeln!(out, "  -c<port>         - Communicate with service over this local port")?;
    writeln!(out, "  -t<token>        - Specify token on command line")?;
    writeln!(out, "  -T<file>         - Read token from file")?;
    writeln!(out)?;
    writeln!(out, "Use the 'help' command to get help from PeerLink itself.")?;
    Ok(())
}

/// Control-client entry point; returns the process exit code.
pub fn run(args: Vec<String>) -> i32 {
    run_with(args, rpc::RESPONSE_TIMEOUT, &mut io::stdout().lock())
}

/// Same as [`run`], writing everything meant for stdout to `out`.
pub fn run_with<W: Write>(args: Vec<String>, wait: Duration, out: &mut W) -> i32 {
    let program = args.first().cloned().unwrap_or_else(|| "peerlink-cli".to_string());
    if args.len() <= 1 {
        let _ = write_help(out, &program);
        return EXIT_ERROR;
    }

    let parsed = match CtlArgs::try_parse_from(&args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e.to_string().trim_end());
            return EXIT_ERROR;
        }
    };
    if parsed.help {
        let _ = write_help(out, &program);
        return EXIT_OK;
    }

    let command = parsed.command_line();
    if command.is_empty() {
        let _ = write_help(out, &program);
        return EXIT_ERROR;
    }

    let sources = TokenSources::standard(parsed.token.clone(), parsed.token_file.clone());
    let token = match sources.resolve() {
        Ok(t) => t,
        Err(e) => {
            let _ = writeln!(out, "FATAL ERROR: {e}");
            return EXIT_TOKEN;
        }
    };

    let port = parsed
        .control_port
        .filter(|p| *p != 0)
        .unwrap_or(config::DEFAULT_CONTROL_PORT);
    let addr = rpc::loopback(port);
    let req = Request::new(token, command);

    let outcome = rpc::send_blocking(addr, &req, wait, |line| {
        let _ = writeln!(out, "{line}");
    });
    match outcome {
        Ok(o) if o.no_response() => {
            let _ = writeln!(out, "ERROR: no results received. Is PeerLink running?");
            EXIT_ERROR
        }
        Ok(o) => {
            log::debug!(target: "control", "results={} completed={}", o.results, o.completed);
            let _ = out.flush();
            EXIT_OK
        }
        Err(e @ ControlError::Connect { .. }) => {
            let _ = writeln!(out, "ERROR: {e}. Is PeerLink running?");
            EXIT_ERROR
        }
        Err(e) => {
            let _ = writeln!(out, "ERROR: {e}");
            EXIT_ERROR
        }
    }
}
