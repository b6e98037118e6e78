pub mod authtoken;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod ctl_cli;
pub mod identity;
pub mod idtool;
pub mod logging;
pub mod pidfile;
pub mod privilege;
pub mod role;
pub mod rpc;
pub mod service;
pub mod signals;
pub mod supervisor;
pub mod termination;
pub mod upgrade;

use log::LevelFilter;

/// Process entry point shared by all three roles; returns the exit code.
pub fn main() -> i32 {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    run(args)
}

pub fn run(args: Vec<String>) -> i32 {
    let program = args.first().cloned().unwrap_or_else(|| "peerlink".to_string());
    let dispatch = match role::select(args) {
        Ok(d) => d,
        Err(e) => return cli::report_usage_error(&mut std::io::stderr().lock(), &program, &e),
    };

    match dispatch.role {
        role::Role::Service => {
            logging::init(LevelFilter::Info);
            cli::run(dispatch.args)
        }
        role::Role::ControlClient => {
            logging::init(LevelFilter::Warn);
            ctl_cli::run(dispatch.args)
        }
        role::Role::IdentityTool => {
            logging::init(LevelFilter::Warn);
            idtool::run(dispatch.args)
        }
    }
}
