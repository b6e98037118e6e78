use std::env;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// First line of a tool's stdout, if it ran and printed something.
fn probe(cmd: &str, args: &[&str]) -> Option<String> {
    let out = Command::new(cmd).args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).lines().next().unwrap_or("").trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let epoch = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });

    let host = env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| probe("hostname", &[]))
        .unwrap_or_else(|| "unknown".to_string());

    let commit = probe("git", &["rev-parse", "--short=10", "HEAD"]).unwrap_or_default();

    println!("cargo:rustc-env=PEERLINK_BUILD_TIME=epoch:{epoch}");
    println!("cargo:rustc-env=PEERLINK_BUILD_HOST={host}");
    println!("cargo:rustc-env=PEERLINK_BUILD_COMMIT={commit}");
}
