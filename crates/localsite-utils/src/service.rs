use crate::command::CommandRunner;
use crate::platform::{ActivationStep, PlatformStrategy};
use localsite_core::atomic;
use localsite_core::{ConfigDescriptor, Error, PlatformProfile, Result, Sysroot, WebServer};
use std::path::Path;
use tracing::{debug, info};

/// Enables and disables sites in the running web server.
pub struct ServiceActivator<'a> {
    runner: &'a dyn CommandRunner,
    strategy: &'a dyn PlatformStrategy,
    profile: &'a PlatformProfile,
    sysroot: &'a Sysroot,
}

impl<'a> ServiceActivator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        strategy: &'a dyn PlatformStrategy,
        profile: &'a PlatformProfile,
        sysroot: &'a Sysroot,
    ) -> Self {
        Self {
            runner,
            strategy,
            profile,
            sysroot,
        }
    }

    /// Enable the site described by `descriptor` and reload the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] naming the first step that failed. Later
    /// steps (including the reload) are not attempted.
    pub fn enable(
        &self,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        domain: &str,
        ssl: bool,
    ) -> Result<()> {
        let plan = self
            .strategy
            .activation_plan(self.profile, descriptor, server, domain, ssl);
        self.execute(&plan)?;
        info!("{server} site {domain} enabled");
        Ok(())
    }

    /// Disable the site, delete its configuration and reload the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Service`] naming the first step that failed.
    pub fn disable(&self, descriptor: &ConfigDescriptor, server: WebServer, domain: &str) -> Result<()> {
        let plan = self
            .strategy
            .deactivation_plan(self.profile, descriptor, server, domain);
        self.execute(&plan)?;
        info!("{server} site {domain} disabled");
        Ok(())
    }

    fn execute(&self, plan: &[ActivationStep]) -> Result<()> {
        for step in plan {
            debug!("{}", step.description());
            self.apply(step)
                .map_err(|message| Error::service(step.description(), message))?;
        }
        Ok(())
    }

    fn apply(&self, step: &ActivationStep) -> std::result::Result<(), String> {
        match step {
            ActivationStep::Run(step) => step.execute(self.runner).map_err(|e| e.to_string()),
            ActivationStep::Link { target, link } => {
                let link = self.sysroot.resolve(link);
                if link.exists() || link.is_symlink() {
                    debug!("{} already exists", link.display());
                    return Ok(());
                }
                if let Some(parent) = link.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                symlink(&self.sysroot.resolve(target), &link).map_err(|e| e.to_string())
            }
            ActivationStep::Unlink { link } => {
                let link = self.sysroot.resolve(link);
                if link.is_symlink() || link.exists() {
                    std::fs::remove_file(&link).map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            ActivationStep::Remove { path } => {
                let path = self.sysroot.resolve(path);
                if path.exists() {
                    std::fs::remove_file(&path).map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            ActivationStep::EnsureLine {
                file,
                line,
                replaces,
                after,
            } => {
                let path = self.sysroot.resolve(file);
                let content = std::fs::read_to_string(&path).map_err(|e| e.to_string())?;
                if let Some(updated) =
                    ensure_line(&content, line, replaces.as_deref(), after.as_deref())
                {
                    atomic::write(&path, updated).map_err(|e| e.to_string())?;
                }
                Ok(())
            }
        }
    }
}

/// `content` with `line` present, or `None` when it already is. A line equal
/// to `replaces` (usually the commented-out form) is rewritten in place.
/// Otherwise `line` is inserted, indented, below the first line equal to
/// `after`, or appended when there is no such line.
#[must_use]
pub fn ensure_line(
    content: &str,
    line: &str,
    replaces: Option<&str>,
    after: Option<&str>,
) -> Option<String> {
    if content.lines().any(|l| l.trim() == line) {
        return None;
    }

    if let Some(old) = replaces {
        if content.lines().any(|l| l.trim() == old) {
            let mut replaced = false;
            let mut out: Vec<&str> = Vec::new();
            for l in content.lines() {
                if !replaced && l.trim() == old {
                    out.push(line);
                    replaced = true;
                } else {
                    out.push(l);
                }
            }
            let mut updated = out.join("\n");
            updated.push('\n');
            return Some(updated);
        }
    }

    if let Some(anchor) = after {
        if let Some(index) = content.lines().position(|l| l.trim() == anchor) {
            let indented = format!("    {line}");
            let mut out: Vec<&str> = content.lines().collect();
            out.insert(index + 1, &indented);
            let mut updated = out.join("\n");
            updated.push('\n');
            return Some(updated);
        }
    }

    let mut updated = content.trim_end().to_string();
    if !updated.is_empty() {
        updated.push('\n');
    }
    updated.push_str(line);
    updated.push('\n');
    Some(updated)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
