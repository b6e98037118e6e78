//! Daemon log lines in the `<timestamp> [<component>] <message>` shape.
//!
//! Components are carried as the `log` target, so call sites read
//! `log::info!(target: "pid", "...")`.

use chrono::Local;
use log::LevelFilter;
use std::io::Write;

pub const TS_FORMAT: &str = "%Y-%m-%d_%H:%M:%S%.3f";

/// Install the stderr logger. `RUST_LOG` overrides `default_level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level)
        .parse_default_env()
        .format(|buf, record| {
            let ts = Local::now().format(TS_FORMAT);
            match record.level() {
                log::Level::Error | log::Level::Warn => writeln!(
                    buf,
                    "{ts} [{}] {}: {}",
                    record.target(),
                    record.level().as_str().to_ascii_lowercase(),
                    record.args()
                ),
                _ => writeln!(buf, "{ts} [{}] {}", record.target(), record.args()),
            }
        });
    let _ = builder.try_init();
}
