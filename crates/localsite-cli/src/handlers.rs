use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;
use localsite_core::config::state_dir;
use localsite_core::{HostsOutcome, LocalsiteConfig, PlatformProfile, SiteRegistry, Sysroot};
use localsite_utils::command::SystemRunner;
use localsite_utils::identity::Identity;
use localsite_utils::php;
use localsite_utils::platform::{PlatformResolver, strategy_for};
use std::path::PathBuf;
use tracing::debug;

use crate::cli::{Cli, Commands, LegacyArgs};
use crate::provision::{Failure, Provisioned, Provisioner, SiteRequest, Stage};
use crate::style;

/// Invoking user and their configuration, loaded once per command.
struct Session {
    user: Identity,
    config: LocalsiteConfig,
}

impl Session {
    fn load() -> Result<Self> {
        let user = Identity::invoking();
        let path = std::env::var_os("LOCALSITE_CONFIG")
            .map_or_else(|| state_dir(&user.home).join("config.toml"), PathBuf::from);
        let config = LocalsiteConfig::load_from_path(&path)?;
        Ok(Self { user, config })
    }

    fn registry(&self) -> SiteRegistry {
        SiteRegistry::with_path(self.config.registry_path(&state_dir(&self.user.home)))
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let session = Session::load()?;

    match cli.command {
        Some(Commands::Add {
            domain,
            path,
            server,
            ssl,
            no_ssl,
        }) => {
            let request = SiteRequest {
                domain,
                path,
                server: server.unwrap_or_else(|| session.config.default_server.to_string()),
                ssl: Commands::resolve_ssl(ssl, no_ssl, session.config.ssl_default),
            };
            add(&session, &request)
        }
        Some(Commands::List { json }) => list(&session, json),
        Some(Commands::Remove { domain }) => remove(&session, &domain),
        Some(Commands::Php) => php_info(),
        None => {
            let request = legacy_request(cli.legacy)?;
            add(&session, &request)
        }
    }
}

fn legacy_request(args: LegacyArgs) -> Result<SiteRequest> {
    let LegacyArgs {
        domain,
        path,
        server,
        ssl,
        no_ssl,
    } = args;
    match (domain, path, server) {
        (Some(domain), Some(path), Some(server)) => Ok(SiteRequest {
            domain,
            path,
            server,
            ssl: Commands::resolve_ssl(ssl, no_ssl, false),
        }),
        (domain, path, server) => {
            let missing: Vec<&str> = [
                domain.is_none().then_some("--domain"),
                path.is_none().then_some("--path"),
                server.is_none().then_some("--server"),
            ]
            .into_iter()
            .flatten()
            .collect();
            bail!(
                "missing required arguments: {} (or use `localsite add <domain> <path>`; see --help)",
                missing.join(", ")
            )
        }
    }
}

fn host() -> (SystemRunner, PlatformProfile) {
    let runner = SystemRunner;
    let profile = PlatformResolver::new(&runner).resolve();
    (runner, profile)
}

fn report_stage(stage: Stage) {
    println!("  {} {}", style::DOT, stage.label().dim());
}

fn add(session: &Session, request: &SiteRequest) -> Result<()> {
    let (runner, profile) = host();
    let strategy = strategy_for(&profile);
    let sysroot = Sysroot::host();

    println!(
        "{} Setting up {} ({}, {})",
        style::ROCKET,
        request.domain.as_str().bold(),
        request.server,
        if request.ssl { "ssl" } else { "no ssl" }
    );

    let observer = report_stage;
    let provisioner = Provisioner::new(
        &runner,
        strategy.as_ref(),
        &profile,
        &session.user,
        &sysroot,
        &session.config,
    )
    .with_observer(&observer);

    let done = provisioner.provision(request).map_err(explain)?;
    print_provisioned(&done);
    Ok(())
}

fn print_provisioned(done: &Provisioned) {
    debug!("applied stages: {:?}", done.applied);
    if done.hosts == HostsOutcome::AlreadyPresent {
        println!("  {} {}", style::DOT, done.hosts.message(&done.options.domain));
    }
    if let Some(certs) = &done.certs {
        println!("  {} Certificate: {}", style::LOCK, certs.cert_file.display());
    }
    println!("  {} Config: {}", style::DOT, done.config_path.display());
    println!("{} Site setup completed successfully!", style::CHECK);
    println!("{} Visit: {}", style::GLOBE, done.options.url().cyan());
}

fn remove(session: &Session, domain: &str) -> Result<()> {
    let (runner, profile) = host();
    let strategy = strategy_for(&profile);
    let sysroot = Sysroot::host();

    let observer = report_stage;
    let provisioner = Provisioner::new(
        &runner,
        strategy.as_ref(),
        &profile,
        &session.user,
        &sysroot,
        &session.config,
    )
    .with_observer(&observer);

    let removed = provisioner.remove(domain).map_err(explain)?;
    debug!("applied stages: {:?}", removed.applied);
    if !removed.hosts_entry_removed {
        println!("  {} No hosts entry for {} was present", style::WARN, removed.record.domain);
    }
    println!("{} Removed {}", style::CHECK, removed.record.domain.as_str().bold());
    Ok(())
}

/// Point out the stages that already changed the host, since nothing is
/// rolled back.
fn explain(failure: Failure) -> anyhow::Error {
    if !failure.applied.is_empty() {
        let applied: Vec<&str> = failure.applied.iter().map(|s| s.label()).collect();
        eprintln!(
            "{} Already applied, not rolled back: {}",
            style::WARN,
            applied.join(", ")
        );
    }
    failure.into()
}

fn list(session: &Session, json: bool) -> Result<()> {
    let registry = session.registry();
    let sites = registry
        .list()
        .with_context(|| format!("Failed to read {}", registry.path().display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sites)?);
        return Ok(());
    }

    if sites.is_empty() {
        println!("No sites registered.");
        return Ok(());
    }

    let width = sites.iter().map(|s| s.domain.len()).max().unwrap_or(0);
    for site in &sites {
        let scheme = if site.ssl { "https" } else { "http" };
        println!(
            "{} {:<width$}  {:<6}  {}://{}  {}",
            style::DOT,
            site.domain,
            site.server.as_str(),
            scheme,
            site.domain,
            site.path.display().to_string().dim(),
        );
    }
    Ok(())
}

fn php_info() -> Result<()> {
    let (runner, profile) = host();
    let strategy = strategy_for(&profile);

    match php::cli_version(&runner) {
        Some(version) => println!("{} {version}", style::CHECK),
        None => println!("{} PHP CLI not found on PATH", style::WARN),
    }
    println!(
        "{} FastCGI endpoint: {}",
        style::DOT,
        strategy.php_fpm_endpoint(&Sysroot::host())
    );
    Ok(())
}
