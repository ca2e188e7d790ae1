//! The provisioning state machine.
//!
//! `add` walks `Validating → PrivilegeCheck → PermissionFix →
//! [CertificateIssue] → ConfigGenerate → HostsRegister → ServiceEnable →
//! RegistrySave`, `remove` walks `Validating → Lookup → PrivilegeCheck →
//! ServiceDisable → HostsUnregister → RegistryRemove`. The first failing
//! stage ends the run; whatever earlier stages changed on the host stays in
//! place and is listed in the [`Failure`].

use localsite_core::config::state_dir;
use localsite_core::hosts::HostsOutcome;
use localsite_core::render::descriptor_for;
use localsite_core::site::validate_domain;
use localsite_core::{
    CertificateBundle, ConfigDescriptor, ConfigGenerator, ConfigLayout, Error, HostsFile,
    LocalsiteConfig, Os, PlatformProfile, SiteOptions, SiteRecord, SiteRegistry, Sysroot,
    TemplateSet,
};
use localsite_utils::cert::CertificateManager;
use localsite_utils::command::CommandRunner;
use localsite_utils::identity::Identity;
use localsite_utils::permissions::PermissionFixer;
use localsite_utils::platform::PlatformStrategy;
use localsite_utils::service::ServiceActivator;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error as ThisError;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Lookup,
    PrivilegeCheck,
    PermissionFix,
    CertificateIssue,
    ConfigGenerate,
    HostsRegister,
    ServiceEnable,
    RegistrySave,
    ServiceDisable,
    HostsUnregister,
    RegistryRemove,
}

impl Stage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Validating => "validating input",
            Self::Lookup => "looking up site",
            Self::PrivilegeCheck => "checking privileges",
            Self::PermissionFix => "fixing permissions",
            Self::CertificateIssue => "issuing certificate",
            Self::ConfigGenerate => "generating server config",
            Self::HostsRegister => "updating hosts file",
            Self::ServiceEnable => "enabling site",
            Self::RegistrySave => "saving site registry",
            Self::ServiceDisable => "disabling site",
            Self::HostsUnregister => "removing hosts entry",
            Self::RegistryRemove => "updating site registry",
        }
    }

    /// Whether the stage changes the host.
    #[must_use]
    pub const fn mutates(self) -> bool {
        !matches!(self, Self::Validating | Self::Lookup | Self::PrivilegeCheck)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal failure of a run.
#[derive(Debug, ThisError)]
#[error("{stage}: {error}")]
pub struct Failure {
    pub stage: Stage,
    pub error: Error,
    /// Mutating stages that completed before `stage` failed.
    pub applied: Vec<Stage>,
}

/// Raw input for `add`, validated in the first stage.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    pub domain: String,
    pub path: PathBuf,
    pub server: String,
    pub ssl: bool,
}

#[derive(Debug)]
pub struct Provisioned {
    pub options: SiteOptions,
    pub config_path: PathBuf,
    pub certs: Option<CertificateBundle>,
    pub hosts: HostsOutcome,
    pub applied: Vec<Stage>,
}

#[derive(Debug)]
pub struct Removed {
    pub record: SiteRecord,
    pub hosts_entry_removed: bool,
    pub applied: Vec<Stage>,
}

/// Tracks progress through the stages of one run.
struct Run<'o> {
    applied: Vec<Stage>,
    observer: Option<&'o dyn Fn(Stage)>,
}

impl Run<'_> {
    fn stage<T>(&mut self, stage: Stage, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Failure> {
        if let Some(observer) = self.observer {
            observer(stage);
        }
        info!("stage: {stage}");
        match f() {
            Ok(value) => {
                if stage.mutates() {
                    self.applied.push(stage);
                }
                Ok(value)
            }
            Err(error) => Err(Failure {
                stage,
                error,
                applied: std::mem::take(&mut self.applied),
            }),
        }
    }
}

/// Everything a run needs from the host, injected so tests can substitute a
/// recording runner and a sysroot.
pub struct Provisioner<'a> {
    runner: &'a dyn CommandRunner,
    strategy: &'a dyn PlatformStrategy,
    profile: &'a PlatformProfile,
    user: &'a Identity,
    sysroot: &'a Sysroot,
    config: &'a LocalsiteConfig,
    templates: TemplateSet,
    registry: SiteRegistry,
    hosts: HostsFile,
    argv: Vec<String>,
    observer: Option<&'a dyn Fn(Stage)>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        strategy: &'a dyn PlatformStrategy,
        profile: &'a PlatformProfile,
        user: &'a Identity,
        sysroot: &'a Sysroot,
        config: &'a LocalsiteConfig,
    ) -> Self {
        let templates = config
            .templates_dir
            .as_ref()
            .map_or_else(TemplateSet::builtin, TemplateSet::with_dir);
        let registry = SiteRegistry::with_path(config.registry_path(&state_dir(&user.home)));
        let hosts = HostsFile::with_path(sysroot.resolve(&strategy.hosts_path()));

        Self {
            runner,
            strategy,
            profile,
            user,
            sysroot,
            config,
            templates,
            registry,
            hosts,
            argv: std::env::args().collect(),
            observer: None,
        }
    }

    /// Command line echoed back in the privilege error.
    #[cfg(test)]
    #[must_use]
    pub fn with_argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    /// Called as each stage starts.
    #[must_use]
    pub fn with_observer(mut self, observer: &'a dyn Fn(Stage)) -> Self {
        self.observer = Some(observer);
        self
    }

    #[cfg(test)]
    pub const fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    /// Provision a site.
    ///
    /// # Errors
    ///
    /// Returns the [`Failure`] of the first stage that failed.
    pub fn provision(&self, request: &SiteRequest) -> Result<Provisioned, Failure> {
        let mut run = self.start();

        let options = run.stage(Stage::Validating, || {
            self.check_layout()?;
            SiteOptions::new(&request.domain, &request.path, &request.server, request.ssl)
        })?;
        run.stage(Stage::PrivilegeCheck, || self.check_privilege())?;
        run.stage(Stage::PermissionFix, || {
            PermissionFixer::new(self.runner, self.strategy).fix(
                &options.path,
                options.server,
                self.user,
                self.profile,
            )
        })?;

        let certs = if options.ssl {
            Some(run.stage(Stage::CertificateIssue, || self.issue_certificate(&options.domain))?)
        } else {
            None
        };

        let generator = ConfigGenerator::new(&self.templates, self.sysroot, self.config.layout);
        let descriptor = generator.descriptor(&options, self.profile);
        let config_path = run.stage(Stage::ConfigGenerate, || {
            let fastcgi_pass = self.strategy.php_fpm_endpoint(self.sysroot);
            generator.generate(&options, self.profile, certs.as_ref(), &fastcgi_pass)
        })?;

        let hosts = run.stage(Stage::HostsRegister, || self.hosts.add_entry(&options.domain))?;
        info!("{}", hosts.message(&options.domain));

        run.stage(Stage::ServiceEnable, || {
            self.activator()
                .enable(&descriptor, options.server, &options.domain, options.ssl)
        })?;

        run.stage(Stage::RegistrySave, || {
            self.registry.save(SiteRecord::from_options(&options))?;
            self.hand_over_registry();
            Ok(())
        })?;

        Ok(Provisioned {
            options,
            config_path,
            certs,
            hosts,
            applied: run.applied,
        })
    }

    /// Tear down a provisioned site. Certificates and document root
    /// permissions are left alone.
    ///
    /// # Errors
    ///
    /// Returns the [`Failure`] of the first stage that failed.
    pub fn remove(&self, domain: &str) -> Result<Removed, Failure> {
        let mut run = self.start();

        let domain = run.stage(Stage::Validating, || {
            let domain = domain.trim();
            validate_domain(domain).map_err(|e| Error::Validation(vec![e]))?;
            Ok(domain.to_ascii_lowercase())
        })?;
        let record = run.stage(Stage::Lookup, || {
            self.registry
                .get(&domain)?
                .ok_or_else(|| Error::NotFound(domain.clone()))
        })?;
        run.stage(Stage::PrivilegeCheck, || self.check_privilege())?;

        let descriptor = self.descriptor_for_record(&record);
        run.stage(Stage::ServiceDisable, || {
            self.activator().disable(&descriptor, record.server, &record.domain)
        })?;
        let hosts_entry_removed =
            run.stage(Stage::HostsUnregister, || self.hosts.remove_entry(&record.domain))?;
        let record = run.stage(Stage::RegistryRemove, || self.registry.remove(&record.domain))?;

        Ok(Removed {
            record,
            hosts_entry_removed,
            applied: run.applied,
        })
    }

    fn start(&self) -> Run<'a> {
        Run {
            applied: Vec::new(),
            observer: self.observer,
        }
    }

    /// Legacy paths are Debian-style; only Linux servers include them.
    fn check_layout(&self) -> Result<(), Error> {
        if self.config.layout == ConfigLayout::Legacy && self.profile.os != Os::Linux {
            return Err(Error::validation(format!(
                "layout = \"legacy\" is only supported on linux, not {}",
                self.profile.os
            )));
        }
        Ok(())
    }

    fn check_privilege(&self) -> Result<(), Error> {
        if self.profile.needs_elevation() {
            return Err(Error::Privilege {
                command: self.profile.elevation_command(&self.argv),
            });
        }
        Ok(())
    }

    fn issue_certificate(&self, domain: &str) -> Result<CertificateBundle, Error> {
        let mut manager =
            CertificateManager::new(self.runner, self.strategy, self.profile, self.user, self.sysroot);
        if let Some(root) = &self.config.cert_dir {
            manager = manager.with_cert_root(root);
        }
        let mkcert = manager.ensure_ca()?;
        manager.issue(&mkcert, domain)
    }

    fn activator(&self) -> ServiceActivator<'_> {
        ServiceActivator::new(self.runner, self.strategy, self.profile, self.sysroot)
    }

    fn descriptor_for_record(&self, record: &SiteRecord) -> ConfigDescriptor {
        descriptor_for(record.server, record.ssl, &record.domain, self.profile, self.config.layout)
    }

    /// The registry lives in the invoking user's home; keep it theirs.
    fn hand_over_registry(&self) {
        let path = self.registry.path();
        for target in [path.parent(), Some(path)].into_iter().flatten() {
            if let Err(e) = self.user.hand_over(target) {
                warn!("could not hand {} to {}: {e}", target.display(), self.user.name);
            }
        }
    }
}
