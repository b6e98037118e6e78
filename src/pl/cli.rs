use crate::pl::config::{self, ConfigError};
use crate::pl::service::Node;
use crate::pl::supervisor::{Supervisor, EXIT_CONFIG, EXIT_NORMAL};
use crate::pl::{build_info, role};
use clap::{ArgAction, Parser};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "peerlink",
    about = "PeerLink network service",
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Args {
    /// Bind to this port for network I/O (0 = default)
    #[arg(short = 'p', value_name = "port")]
    pub port: Option<u16>,

    /// Bind to this port for local control requests (0 = default)
    #[arg(short = 'c', value_name = "port")]
    pub control_port: Option<u16>,

    /// Show version
    #[arg(short = 'v', action = ArgAction::SetTrue)]
    pub version: bool,

    /// Display help
    #[arg(short = 'h', short_alias = '?', action = ArgAction::SetTrue)]
    pub help: bool,

    /// Home directory (defaults to the platform location)
    pub home: Option<PathBuf>,
}

pub fn write_help<W: Write>(out: &mut W, program: &str) -> io::Result<()> {
    writeln!(out, "{}", build_info::version_line())?;
    writeln!(out, "Licensed under the GNU General Public License v3")?;
    writeln!(out)?;
    writeln!(out, "Usage: {program} [-switches] [home directory]")?;
    writeln!(out)?;
    writeln!(out, "Available switches:")?;
    writeln!(out, "  -h                - Display this help")?;
    writeln!(out, "  -v                - Show version")?;
    writeln!(out, "  -p<port>          - Bind to this port for network I/O")?;
    writeln!(out, "  -c<port>          - Bind to this port for local control requests")?;
    writeln!(
        out,
        "  -q                - Send a query to a running service ({})",
        role::CONTROL_CLIENT_MARKER
    )?;
    writeln!(
        out,
        "  -i                - Run idtool command ({})",
        role::IDENTITY_TOOL_MARKER
    )?;
    Ok(())
}

/// Print usage and `err` to `out`; returns the configuration-error exit code.
pub fn report_usage_error<W: Write>(out: &mut W, program: &str, err: &ConfigError) -> i32 {
    let _ = write_help(out, program);
    let _ = writeln!(out);
    let _ = writeln!(out, "{err}");
    EXIT_CONFIG
}

/// Parse the service-role arguments. Usage problems surface as `ConfigError::Usage`.
pub fn parse(args: &[String]) -> Result<Args, ConfigError> {
    Args::try_parse_from(args).map_err(|e| ConfigError::Usage(e.to_string().trim_end().to_string()))
}

/// Service role entry point; returns the process exit code.
pub fn run(args: Vec<String>) -> i32 {
    let program = args.first().cloned().unwrap_or_else(|| "peerlink".to_string());

    let parsed = match parse(&args) {
        Ok(a) => a,
        Err(e) => return report_usage_error(&mut io::stderr().lock(), &program, &e),
    };

    if parsed.help {
        let _ = write_help(&mut io::stdout().lock(), &program);
        return EXIT_NORMAL;
    }
    if parsed.version {
        println!("{}", build_info::version_line());
        println!("{}", build_info::banner());
        return EXIT_NORMAL;
    }

    let home = parsed.home.unwrap_or_else(config::default_home);
    let cfg = match config::load_service_config(&home, parsed.port, parsed.control_port) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{program}: {e}");
            return EXIT_CONFIG;
        }
    };
    log::info!(
        target: "boot",
        "{} home={} port={} control_port={}",
        build_info::version_line(),
        cfg.home.display(),
        cfg.port,
        cfg.control_port
    );

    Supervisor::new(program, cfg).run(|cfg, termination| Ok(Node::new(cfg, termination)?))
}
