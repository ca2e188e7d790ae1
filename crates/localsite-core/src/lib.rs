//! Core data model for localsite.
//!
//! Everything in this crate is free of external commands: validation, the
//! platform profile types, hosts-file editing, the site registry, user
//! configuration and server-config rendering. Shelling out lives in
//! `localsite-utils`.

pub mod atomic;
pub mod config;
pub use config::{ConfigLayout, LocalsiteConfig};
pub mod error;
pub use error::{Error, Result};
pub mod hosts;
pub use hosts::{HostsFile, HostsOutcome};
pub mod platform;
pub use platform::{Arch, InitSystem, Os, PlatformProfile};
pub mod registry;
pub use registry::{SiteRecord, SiteRegistry};
pub mod render;
pub use render::{CertificateBundle, ConfigDescriptor, ConfigGenerator, TemplateSet};
pub mod site;
pub use site::{SiteOptions, WebServer};
pub mod sysroot;
pub use sysroot::Sysroot;
