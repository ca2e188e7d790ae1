use crate::command::{CommandRunner, CommandSpec};
use localsite_core::Sysroot;
use std::path::{Path, PathBuf};
use tracing::debug;

/// FastCGI address used when no PHP-FPM socket is found.
pub const DEFAULT_FPM_ADDRESS: &str = "127.0.0.1:9000";

const VERSIONED_SOCKET_DIR: &str = "/run/php";
const FALLBACK_SOCKET: &str = "/run/php-fpm/www.sock";

/// `fastcgi_pass` target on Linux: the newest versioned socket under
/// `/run/php`, then the RHEL-style pool socket, then TCP.
#[must_use]
pub fn fpm_endpoint(sysroot: &Sysroot) -> String {
    if let Some(socket) = newest_versioned_socket(sysroot) {
        return format!("unix:{}", socket.display());
    }
    let fallback = Path::new(FALLBACK_SOCKET);
    if sysroot.resolve(fallback).exists() {
        return format!("unix:{FALLBACK_SOCKET}");
    }
    debug!("no PHP-FPM socket found, using {DEFAULT_FPM_ADDRESS}");
    DEFAULT_FPM_ADDRESS.to_string()
}

fn newest_versioned_socket(sysroot: &Sysroot) -> Option<PathBuf> {
    let dir = sysroot.resolve(Path::new(VERSIONED_SOCKET_DIR));
    let entries = std::fs::read_dir(dir).ok()?;

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let version = name.strip_prefix("php")?.strip_suffix("-fpm.sock")?;
            Some((version_key(version), name))
        })
        .max()
        .map(|(_, name)| Path::new(VERSIONED_SOCKET_DIR).join(name))
}

/// `8.10` sorts after `8.9`.
fn version_key(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

/// First line of `php -v`, or `None` when PHP is not installed.
pub fn cli_version(runner: &dyn CommandRunner) -> Option<String> {
    let output = runner.run(&CommandSpec::new("php").arg("-v")).ok()?;
    output.stdout.lines().next().map(str::to_string)
}
