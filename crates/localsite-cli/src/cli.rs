use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "localsite", version)]
#[command(about = "Provision local development virtual hosts for Apache and Nginx", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Show debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub legacy: LegacyArgs,
}

/// Flag-only form accepted when no subcommand is given:
/// `localsite --domain D --path P --server S [--ssl | --no-ssl]`. SSL stays
/// off unless asked for.
#[derive(Args, Debug, Default)]
pub struct LegacyArgs {
    /// Domain name (e.g. example.test)
    #[arg(long, short = 'd')]
    pub domain: Option<String>,
    /// Document root
    #[arg(long, short = 'p')]
    pub path: Option<PathBuf>,
    /// Server type: apache or nginx
    #[arg(long, short = 's')]
    pub server: Option<String>,
    /// Enable SSL with mkcert
    #[arg(long, overrides_with = "no_ssl")]
    pub ssl: bool,
    /// Serve over plain HTTP
    #[arg(long, overrides_with = "ssl")]
    pub no_ssl: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a site: permissions, certificate, server config, hosts entry
    Add {
        /// Domain name (e.g. myapp.test)
        domain: String,
        /// Document root
        path: PathBuf,
        /// apache or nginx (default from config, nginx otherwise)
        #[arg(long, short)]
        server: Option<String>,
        /// Issue a certificate and serve over HTTPS
        #[arg(long, overrides_with = "no_ssl")]
        ssl: bool,
        /// Serve over plain HTTP
        #[arg(long, overrides_with = "ssl")]
        no_ssl: bool,
    },
    /// List provisioned sites
    List {
        /// Print the registry as JSON
        #[arg(long)]
        json: bool,
    },
    /// Disable a site and remove its config and hosts entry
    Remove {
        /// Domain of a provisioned site
        domain: String,
    },
    /// Show the PHP version and the PHP-FPM endpoint configs will use
    Php,
}

impl Commands {
    /// `--ssl`/`--no-ssl` if given, else `default`.
    #[must_use]
    pub const fn resolve_ssl(ssl: bool, no_ssl: bool, default: bool) -> bool {
        if ssl {
            true
        } else if no_ssl {
            false
        } else {
            default
        }
    }
}
