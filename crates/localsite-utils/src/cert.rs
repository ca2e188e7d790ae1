use crate::command::{CommandRunner, CommandSpec};
use crate::identity::Identity;
use crate::platform::PlatformStrategy;
use localsite_core::{CertificateBundle, Error, PlatformProfile, Result, Sysroot};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Issues locally trusted certificates with mkcert.
///
/// mkcert keeps its CA in the invoking user's home, so both `-install` and
/// issuance run as that user. The issued files are then moved by the
/// elevated process into a per-domain directory the web server can read.
pub struct CertificateManager<'a> {
    runner: &'a dyn CommandRunner,
    strategy: &'a dyn PlatformStrategy,
    profile: &'a PlatformProfile,
    user: &'a Identity,
    sysroot: &'a Sysroot,
    cert_root: PathBuf,
}

impl<'a> CertificateManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        strategy: &'a dyn PlatformStrategy,
        profile: &'a PlatformProfile,
        user: &'a Identity,
        sysroot: &'a Sysroot,
    ) -> Self {
        Self {
            runner,
            strategy,
            profile,
            user,
            sysroot,
            cert_root: strategy.cert_root(profile),
        }
    }

    /// Store certificates under `root` instead of the platform default.
    #[must_use]
    pub fn with_cert_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cert_root = root.into();
        self
    }

    #[must_use]
    pub fn cert_dir(&self, domain: &str) -> PathBuf {
        self.cert_root.join(domain)
    }

    /// Make sure mkcert is available and its CA is installed for the invoking
    /// user. Returns the mkcert binary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when mkcert is missing and can't be
    /// installed.
    pub fn ensure_ca(&self) -> Result<PathBuf> {
        let mkcert = match self.runner.locate("mkcert") {
            Some(path) => path,
            None => {
                info!("mkcert not found, installing it");
                for step in self.strategy.mkcert_install_steps(self.profile, self.user) {
                    step.execute(self.runner)
                        .map_err(|e| Error::certificate(&step.description, e))?;
                }
                self.runner.locate("mkcert").ok_or_else(|| {
                    Error::certificate(
                        "locate mkcert",
                        "mkcert is still not on PATH after installation",
                    )
                })?
            }
        };

        let install = CommandSpec::new(mkcert.to_string_lossy())
            .arg("-install")
            .as_user(self.user);
        if let Err(e) = self.runner.run(&install) {
            warn!("mkcert -install failed, the CA may already be installed: {e}");
        }
        Ok(mkcert)
    }

    /// Issue a certificate for `domain` and `www.<domain>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] when issuance fails or the files are
    /// missing or empty afterwards.
    pub fn issue(&self, mkcert: &Path, domain: &str) -> Result<CertificateBundle> {
        let staging = self.staging_dir(domain)?;
        let cert_name = format!("{domain}.pem");
        let key_name = format!("{domain}-key.pem");

        let command = CommandSpec::new(mkcert.to_string_lossy())
            .arg("-cert-file")
            .path_arg(&staging.join(&cert_name))
            .arg("-key-file")
            .path_arg(&staging.join(&key_name))
            .arg(domain)
            .arg(format!("www.{domain}"))
            .as_user(self.user)
            .current_dir(&staging);
        self.runner
            .run(&command)
            .map_err(|e| Error::certificate(format!("issue certificate for {domain}"), e))?;

        let dir = self.cert_dir(domain);
        let resolved = self.sysroot.resolve(&dir);
        std::fs::create_dir_all(&resolved)
            .map_err(|e| Error::certificate(format!("create {}", dir.display()), e))?;

        for name in [&cert_name, &key_name] {
            relocate(&staging.join(name), &resolved.join(name))
                .map_err(|e| Error::certificate(format!("move {name} into {}", dir.display()), e))?;
        }
        restrict_key(&resolved.join(&key_name));

        let bundle = CertificateBundle {
            cert_file: dir.join(&cert_name),
            key_file: dir.join(&key_name),
        };
        bundle
            .verify(self.sysroot)
            .map_err(|e| Error::certificate("verify issued certificate", e))?;

        info!("certificate for {domain} stored in {}", dir.display());
        Ok(bundle)
    }

    /// `<home>/.localsite/staging/<domain>`, created and owned by the invoking
    /// user so mkcert can write into it.
    fn staging_dir(&self, domain: &str) -> Result<PathBuf> {
        let state = localsite_core::config::state_dir(&self.user.home);
        let staging_root = state.join("staging");
        let staging = staging_root.join(domain);
        std::fs::create_dir_all(&staging)
            .map_err(|e| Error::certificate(format!("create {}", staging.display()), e))?;

        for dir in [&state, &staging_root, &staging] {
            self.user
                .hand_over(dir)
                .map_err(|e| Error::certificate(format!("hand {} to {}", dir.display(), self.user.name), e))?;
        }
        debug!("staging certificates in {}", staging.display());
        Ok(staging)
    }
}

/// Copy then delete, so moves across filesystems work.
fn relocate(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)
}

#[cfg(unix)]
fn restrict_key(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("could not restrict {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_key(_path: &Path) {}
