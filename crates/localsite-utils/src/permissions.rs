use crate::command::CommandRunner;
use crate::identity::Identity;
use crate::platform::PlatformStrategy;
use localsite_core::{Error, PlatformProfile, Result, WebServer};
use std::path::Path;
use tracing::info;

/// Makes a document root readable and writable by both the invoking user and
/// the web server.
pub struct PermissionFixer<'a> {
    runner: &'a dyn CommandRunner,
    strategy: &'a dyn PlatformStrategy,
}

impl<'a> PermissionFixer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, strategy: &'a dyn PlatformStrategy) -> Self {
        Self { runner, strategy }
    }

    /// Apply ownership and ACLs to `path`. Every step converges, so re-running
    /// on an already fixed tree is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] for a missing directory or the first
    /// failing command.
    pub fn fix(
        &self,
        path: &Path,
        server: WebServer,
        owner: &Identity,
        profile: &PlatformProfile,
    ) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::permission(
                format!("fix permissions on {}", path.display()),
                "directory does not exist",
            ));
        }

        let group = self.strategy.web_group(profile, server);
        for step in self.strategy.permission_steps(path, owner, &group) {
            step.execute(self.runner)
                .map_err(|e| Error::permission(&step.description, e))?;
        }

        info!(
            "permissions set on {} for {}",
            path.display(),
            owner.owner_spec(&group)
        );
        Ok(())
    }
}
