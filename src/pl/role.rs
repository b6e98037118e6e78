use crate::pl::config::ConfigError;

pub const CONTROL_CLIENT_MARKER: &str = "peerlink-cli";
pub const IDENTITY_TOOL_MARKER: &str = "peerlink-idtool";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Service,
    ControlClient,
    IdentityTool,
}

/// The selected role and the argument vector it should parse (program name first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub role: Role,
    pub args: Vec<String>,
}

/// Select the role for `args` (`args[0]` is the invocation name).
///
/// The invocation name wins over switches. Otherwise the leading switches are
/// checked left to right: a bad one is fatal, `-v`/`-h`/`-?` go to the
/// service role without whatever follows them, and `-q`/`-i` hand everything
/// after them to that role.
pub fn select(args: Vec<String>) -> Result<Dispatch, ConfigError> {
    let invoked = args.first().map(|s| s.to_lowercase()).unwrap_or_default();
    if invoked.contains(CONTROL_CLIENT_MARKER) {
        return Ok(Dispatch {
            role: Role::ControlClient,
            args,
        });
    }
    if invoked.contains(IDENTITY_TOOL_MARKER) {
        return Ok(Dispatch {
            role: Role::IdentityTool,
            args,
        });
    }

    let mut i = 1;
    while i < args.len() {
        let a = args[i].as_str();
        if a == "--" || !a.starts_with('-') || a.len() < 2 {
            break;
        }
        let rest = a.get(2..).unwrap_or("");
        match a.as_bytes()[1] {
            b'q' | b'i' if !rest.is_empty() => {
                return Err(ConfigError::Usage(format!("unknown switch: {a}")));
            }
            b'q' | b'i' => {
                let role = if a == "-q" {
                    Role::ControlClient
                } else {
                    Role::IdentityTool
                };
                let mut handed = Vec::with_capacity(args.len() - i);
                handed.push(args[0].clone());
                handed.extend(args[i + 1..].iter().cloned());
                return Ok(Dispatch { role, args: handed });
            }
            b'p' | b'c' => {
                let value = if rest.is_empty() {
                    i += 1;
                    args.get(i).map(String::as_str)
                } else {
                    Some(rest)
                };
                check_port(a, value)?;
            }
            b'v' | b'h' | b'?' if rest.is_empty() => {
                // Printing help or the version ends the run; later arguments are never looked at.
                let mut args = args;
                args.truncate(i + 1);
                return Ok(Dispatch {
                    role: Role::Service,
                    args,
                });
            }
            _ => return Err(ConfigError::Usage(format!("unknown switch: {a}"))),
        }
        i += 1;
    }

    Ok(Dispatch {
        role: Role::Service,
        args,
    })
}

fn check_port(switch: &str, value: Option<&str>) -> Result<u16, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::Usage(format!("{switch} requires a port")))?;
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Usage(format!("invalid port for {switch}: {value}")))
}
