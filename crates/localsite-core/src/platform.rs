//! Host description shared by every provisioning step.
//!
//! The profile is detected once per run (see `localsite_utils::platform`) and
//! is read-only afterwards. Nothing downstream looks at `cfg!(target_os)`; it
//! asks the profile instead, which keeps every OS decision testable with a
//! hand-built profile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    Linux,
    Darwin,
    Windows,
}

impl Os {
    /// Map a Rust target OS identifier. Unknown identifiers fall back to Linux.
    #[must_use]
    pub fn from_target(target: &str) -> Self {
        match target {
            "macos" | "darwin" => Self::Darwin,
            "windows" | "win32" => Self::Windows,
            _ => Self::Linux,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X64,
    Arm64,
    Arm,
}

impl Arch {
    #[must_use]
    pub fn from_target(target: &str) -> Self {
        match target {
            "aarch64" | "arm64" => Self::Arm64,
            "arm" | "armv7" => Self::Arm,
            _ => Self::X64,
        }
    }

    /// Architecture name used by release download URLs.
    #[must_use]
    pub const fn download_name(self) -> &'static str {
        match self {
            Self::X64 => "amd64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSystem {
    Systemd,
    Launchd,
    WindowsService,
    SysVinit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Pacman,
    Apk,
    Homebrew,
    Chocolatey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManager {
    pub kind: PackageManagerKind,
    pub command: String,
}

impl PackageManager {
    #[must_use]
    pub fn new(kind: PackageManagerKind) -> Self {
        let command = match kind {
            PackageManagerKind::Apt => "apt-get",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Pacman => "pacman",
            PackageManagerKind::Apk => "apk",
            PackageManagerKind::Homebrew => "brew",
            PackageManagerKind::Chocolatey => "choco",
        };
        Self {
            kind,
            command: command.to_string(),
        }
    }
}

/// Filesystem locations that differ per host and can be overridden through
/// the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHints {
    /// Homebrew installation prefix (macOS).
    pub homebrew_prefix: Option<PathBuf>,
    /// Apache installation root (`SERVERROOT`, Windows).
    pub apache_server_root: Option<PathBuf>,
    /// Nginx installation root (`NGINX_PATH`, Windows).
    pub nginx_root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub os: Os,
    pub arch: Arch,
    pub init_system: InitSystem,
    pub is_admin: bool,
    pub is_wsl: bool,
    /// Distribution-wide web server account (`www-data`) when the host has
    /// one. Server-specific fallbacks are applied by the platform strategy.
    pub web_server_user: Option<String>,
    pub package_manager: Option<PackageManager>,
    pub distribution: Option<String>,
    #[serde(default)]
    pub paths: PathHints,
}

impl PlatformProfile {
    /// A Debian-like Linux host running systemd. Mostly useful in tests and
    /// as the fallback for unrecognised systems.
    #[must_use]
    pub fn generic_linux() -> Self {
        Self {
            os: Os::Linux,
            arch: Arch::X64,
            init_system: InitSystem::Systemd,
            is_admin: false,
            is_wsl: false,
            web_server_user: Some("www-data".to_string()),
            package_manager: Some(PackageManager::new(PackageManagerKind::Apt)),
            distribution: Some("debian".to_string()),
            paths: PathHints::default(),
        }
    }

    #[must_use]
    pub const fn needs_elevation(&self) -> bool {
        !self.is_admin
    }

    /// The exact command an operator should run to retry with the rights the
    /// pipeline needs. Arguments are quoted for the platform's shell.
    #[must_use]
    pub fn elevation_command(&self, argv: &[String]) -> String {
        let current = argv
            .iter()
            .map(|arg| shell_quote(arg, self.os))
            .collect::<Vec<_>>()
            .join(" ");
        match self.os {
            Os::Windows => format!(
                "Run as Administrator: right-click PowerShell/CMD, select \"Run as Administrator\", then run: {current}"
            ),
            Os::Linux | Os::Darwin => format!("sudo {current}"),
        }
    }

    /// Homebrew prefix, defaulting by architecture when not detected.
    #[must_use]
    pub fn homebrew_prefix(&self) -> PathBuf {
        self.paths.homebrew_prefix.clone().unwrap_or_else(|| {
            if self.arch == Arch::Arm64 {
                PathBuf::from("/opt/homebrew")
            } else {
                PathBuf::from("/usr/local")
            }
        })
    }
}

fn shell_quote(arg: &str, os: Os) -> String {
    let safe = |c: char| {
        c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c) || (os == Os::Windows && c == '\\')
    };
    let plain = !arg.is_empty() && arg.chars().all(safe);
    if plain {
        return arg.to_string();
    }
    match os {
        Os::Windows => format!("\"{}\"", arg.replace('"', "\\\"")),
        Os::Linux | Os::Darwin => format!("'{}'", arg.replace('\'', r"'\''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_targets_fall_back_to_linux() {
        assert_eq!(Os::from_target("freebsd"), Os::Linux);
        assert_eq!(Os::from_target("macos"), Os::Darwin);
        assert_eq!(Os::from_target("windows"), Os::Windows);
    }

    #[test]
    fn elevation_command_reinvokes_argv() {
        let profile = PlatformProfile::generic_linux();
        let argv = vec!["localsite".to_string(), "add".to_string(), "a.test".to_string()];
        assert_eq!(profile.elevation_command(&argv), "sudo localsite add a.test");

        let windows = PlatformProfile {
            os: Os::Windows,
            ..PlatformProfile::generic_linux()
        };
        assert!(windows.elevation_command(&argv).contains("Run as Administrator"));
    }

    #[test]
    fn elevation_command_quotes_awkward_arguments() {
        let argv: Vec<String> = ["localsite", "add", "demo.test", "/srv/my site", "--ssl"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let profile = PlatformProfile::generic_linux();
        assert_eq!(
            profile.elevation_command(&argv),
            "sudo localsite add demo.test '/srv/my site' --ssl"
        );

        let quote = vec!["localsite".to_string(), "it's".to_string()];
        assert_eq!(profile.elevation_command(&quote), r"sudo localsite 'it'\''s'");

        let windows = PlatformProfile {
            os: Os::Windows,
            ..PlatformProfile::generic_linux()
        };
        let mut argv = argv;
        argv[3] = r"C:\Sites\my site".to_string();
        assert!(
            windows
                .elevation_command(&argv)
                .ends_with(r#"then run: localsite add demo.test "C:\Sites\my site" --ssl"#)
        );
    }

    #[test]
    fn homebrew_prefix_follows_arch() {
        let mut profile = PlatformProfile {
            os: Os::Darwin,
            arch: Arch::Arm64,
            ..PlatformProfile::generic_linux()
        };
        assert_eq!(profile.homebrew_prefix(), PathBuf::from("/opt/homebrew"));
        profile.arch = Arch::X64;
        assert_eq!(profile.homebrew_prefix(), PathBuf::from("/usr/local"));
    }
}
