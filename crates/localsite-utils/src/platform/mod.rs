//! Host detection.
//!
//! [`PlatformResolver::resolve`] builds the [`PlatformProfile`] once per run.
//! Detection never fails: anything it can't determine falls back to the
//! Debian-like defaults.

mod strategy;

pub use strategy::{ActivationStep, DarwinStrategy, LinuxStrategy, PlatformStrategy, WindowsStrategy, strategy_for};

use crate::command::{CommandRunner, CommandSpec};
use localsite_core::platform::{
    Arch, InitSystem, Os, PackageManager, PackageManagerKind, PathHints, PlatformProfile,
};
use localsite_core::Sysroot;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct PlatformResolver<'a> {
    runner: &'a dyn CommandRunner,
    os: Os,
    arch: Arch,
    env: HashMap<String, String>,
    sysroot: Sysroot,
    admin: Option<bool>,
}

impl<'a> PlatformResolver<'a> {
    /// Resolver for the machine this binary runs on.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            os: Os::from_target(std::env::consts::OS),
            arch: Arch::from_target(std::env::consts::ARCH),
            env: std::env::vars().collect(),
            sysroot: Sysroot::host(),
            admin: None,
        }
    }

    #[must_use]
    pub const fn with_os(mut self, os: Os, arch: Arch) -> Self {
        self.os = os;
        self.arch = arch;
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_sysroot(mut self, sysroot: Sysroot) -> Self {
        self.sysroot = sysroot;
        self
    }

    /// Skip the effective-uid check and report `admin` instead.
    #[must_use]
    pub const fn with_admin(mut self, admin: bool) -> Self {
        self.admin = Some(admin);
        self
    }

    #[must_use]
    pub fn resolve(&self) -> PlatformProfile {
        let is_wsl = self.is_wsl();
        let distribution = self.distribution();
        let profile = PlatformProfile {
            os: self.os,
            arch: self.arch,
            init_system: self.detect_init_system(is_wsl),
            is_admin: self.is_admin(),
            is_wsl,
            web_server_user: self.web_server_user(),
            package_manager: self.package_manager(distribution.as_deref()),
            distribution,
            paths: self.path_hints(),
        };
        debug!("resolved platform profile: {profile:?}");
        profile
    }

    fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn is_wsl(&self) -> bool {
        if self.os != Os::Linux {
            return false;
        }
        if self.env("WSL_DISTRO_NAME").is_some() || self.env("WSL_INTEROP").is_some() {
            return true;
        }
        self.runner
            .output(&CommandSpec::new("uname").arg("-r"))
            .map(|out| {
                let release = out.stdout.to_ascii_lowercase();
                release.contains("microsoft") || release.contains("wsl")
            })
            .unwrap_or(false)
    }

    /// WSL is checked first: it often ships `systemctl` without a running
    /// systemd.
    fn detect_init_system(&self, is_wsl: bool) -> InitSystem {
        match self.os {
            Os::Darwin => InitSystem::Launchd,
            Os::Windows => InitSystem::WindowsService,
            Os::Linux if is_wsl => InitSystem::None,
            Os::Linux => {
                if self.runner.succeeds(&CommandSpec::new("systemctl").arg("--version")) {
                    InitSystem::Systemd
                } else if self.runner.succeeds(&CommandSpec::new("service").arg("--version")) {
                    InitSystem::SysVinit
                } else {
                    InitSystem::None
                }
            }
        }
    }

    fn is_admin(&self) -> bool {
        if let Some(admin) = self.admin {
            return admin;
        }
        match self.os {
            Os::Windows => self.runner.succeeds(&CommandSpec::new("net").arg("session")),
            Os::Linux | Os::Darwin => effective_uid_is_root(),
        }
    }

    fn web_server_user(&self) -> Option<String> {
        match self.os {
            Os::Darwin => Some("_www".to_string()),
            Os::Windows => None,
            Os::Linux => self
                .runner
                .succeeds(&CommandSpec::new("id").args(["-u", "www-data"]))
                .then(|| "www-data".to_string()),
        }
    }

    fn distribution(&self) -> Option<String> {
        match self.os {
            Os::Darwin => Some("macos".to_string()),
            Os::Windows => Some("windows".to_string()),
            Os::Linux => self.linux_distribution(),
        }
    }

    fn linux_distribution(&self) -> Option<String> {
        let os_release = self.sysroot.resolve(Path::new("/etc/os-release"));
        if let Ok(content) = std::fs::read_to_string(&os_release) {
            if let Some(id) = os_release_field(&content, "ID") {
                return Some(id);
            }
        }

        [
            ("/etc/debian_version", "debian"),
            ("/etc/redhat-release", "rhel"),
            ("/etc/arch-release", "arch"),
            ("/etc/alpine-release", "alpine"),
        ]
        .iter()
        .find(|(file, _)| self.sysroot.resolve(Path::new(file)).exists())
        .map(|(_, id)| (*id).to_string())
    }

    fn package_manager(&self, distribution: Option<&str>) -> Option<PackageManager> {
        let kind = match self.os {
            Os::Darwin => PackageManagerKind::Homebrew,
            Os::Windows => PackageManagerKind::Chocolatey,
            Os::Linux => match distribution.unwrap_or_default() {
                "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => PackageManagerKind::Dnf,
                "arch" | "manjaro" | "endeavouros" => PackageManagerKind::Pacman,
                "alpine" => PackageManagerKind::Apk,
                _ => PackageManagerKind::Apt,
            },
        };
        Some(PackageManager::new(kind))
    }

    fn path_hints(&self) -> PathHints {
        let path = |key: &str| self.env(key).map(PathBuf::from);
        PathHints {
            homebrew_prefix: path("HOMEBREW_PREFIX"),
            apache_server_root: path("SERVERROOT"),
            nginx_root: path("NGINX_PATH"),
        }
    }
}

fn os_release_field(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key)
            .then(|| v.trim().trim_matches('"').trim_matches('\'').to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    })
}

#[cfg(unix)]
fn effective_uid_is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn effective_uid_is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RecordingRunner;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn wsl_forces_no_init_system() {
        let runner = RecordingRunner::new();
        let root = tempdir().unwrap();
        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Linux, Arch::X64)
            .with_env(env(&[("WSL_DISTRO_NAME", "Ubuntu")]))
            .with_sysroot(Sysroot::new(root.path()))
            .with_admin(true)
            .resolve();

        assert!(profile.is_wsl);
        assert_eq!(profile.init_system, InitSystem::None);
        assert!(runner.position("systemctl").is_none());
    }

    #[test]
    fn wsl_detected_from_kernel_release() {
        let runner = RecordingRunner::new().responding("uname -r", "5.15.90.1-microsoft-standard-WSL2\n");
        let root = tempdir().unwrap();
        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Linux, Arch::X64)
            .with_env(HashMap::new())
            .with_sysroot(Sysroot::new(root.path()))
            .with_admin(true)
            .resolve();
        assert!(profile.is_wsl);
    }

    #[test]
    fn systemd_detected_outside_wsl() {
        let runner = RecordingRunner::new().responding("uname -r", "6.8.0-45-generic\n");
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(root.path().join("etc/os-release"), "ID=ubuntu\nID_LIKE=debian\n").unwrap();

        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Linux, Arch::X64)
            .with_env(HashMap::new())
            .with_sysroot(Sysroot::new(root.path()))
            .with_admin(true)
            .resolve();

        assert!(!profile.is_wsl);
        assert_eq!(profile.init_system, InitSystem::Systemd);
        assert!(runner.position("systemctl --version").is_some());
        assert!(runner.position("service --version").is_none());
        assert_eq!(profile.web_server_user.as_deref(), Some("www-data"));
        assert_eq!(
            profile.package_manager.as_ref().map(|pm| pm.kind),
            Some(PackageManagerKind::Apt)
        );
    }

    #[test]
    fn sysvinit_fallback_and_distribution() {
        let runner = RecordingRunner::new()
            .failing("systemctl --version", "not found")
            .failing("id -u www-data", "no such user");
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("etc")).unwrap();
        std::fs::write(
            root.path().join("etc/os-release"),
            "NAME=\"Fedora Linux\"\nID=fedora\nVERSION_ID=40\n",
        )
        .unwrap();

        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Linux, Arch::Arm64)
            .with_env(HashMap::new())
            .with_sysroot(Sysroot::new(root.path()))
            .with_admin(false)
            .resolve();

        assert_eq!(profile.init_system, InitSystem::SysVinit);
        assert_eq!(profile.distribution.as_deref(), Some("fedora"));
        assert_eq!(
            profile.package_manager.as_ref().map(|pm| pm.kind),
            Some(PackageManagerKind::Dnf)
        );
        assert_eq!(profile.web_server_user, None);
        assert!(profile.needs_elevation());
    }

    #[test]
    fn windows_admin_check_and_paths() {
        let runner = RecordingRunner::new();
        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Windows, Arch::X64)
            .with_env(env(&[("SERVERROOT", r"D:\Apache24"), ("NGINX_PATH", "")]))
            .resolve();

        assert!(profile.is_admin);
        assert_eq!(profile.init_system, InitSystem::WindowsService);
        assert_eq!(profile.paths.apache_server_root, Some(PathBuf::from(r"D:\Apache24")));
        assert_eq!(profile.paths.nginx_root, None);
        assert!(runner.position("net session").is_some());

        let denied = RecordingRunner::new().failing("net session", "Access is denied.");
        let profile = PlatformResolver::new(&denied)
            .with_os(Os::Windows, Arch::X64)
            .with_env(HashMap::new())
            .resolve();
        assert!(!profile.is_admin);
    }

    #[test]
    fn darwin_profile() {
        let runner = RecordingRunner::new();
        let profile = PlatformResolver::new(&runner)
            .with_os(Os::Darwin, Arch::Arm64)
            .with_env(env(&[("HOMEBREW_PREFIX", "/opt/brew")]))
            .with_admin(true)
            .resolve();
        assert_eq!(profile.init_system, InitSystem::Launchd);
        assert_eq!(profile.web_server_user.as_deref(), Some("_www"));
        assert_eq!(profile.homebrew_prefix(), PathBuf::from("/opt/brew"));
        assert!(runner.calls().is_empty());
    }
}
