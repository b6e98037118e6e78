#[cfg(unix)]
pub const REQUIREMENT: &str = "must be run as root (uid==0)";
#[cfg(windows)]
pub const REQUIREMENT: &str = "must be run as a local administrator.";
#[cfg(not(any(unix, windows)))]
pub const REQUIREMENT: &str = "requires administrative privileges";

#[cfg(unix)]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(windows)]
pub fn is_privileged() -> bool {
    // SAFETY: IsUserAnAdmin takes no arguments and only inspects the calling thread's token.
    unsafe { winapi::um::shlobj::IsUserAnAdmin() != 0 }
}

#[cfg(not(any(unix, windows)))]
pub fn is_privileged() -> bool {
    false
}
