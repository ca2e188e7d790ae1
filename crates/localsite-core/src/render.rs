//! Server configuration rendering.
//!
//! A [`ConfigDescriptor`] is looked up from a `(server, os)` table, the
//! matching template is loaded (platform variant first), and `{{KEY}}`
//! placeholders are replaced literally. Values are not escaped; callers pass
//! a validated [`SiteOptions`].

use crate::config::ConfigLayout;
use crate::error::{Error, Result};
use crate::platform::{Os, PlatformProfile};
use crate::site::{SiteOptions, WebServer};
use crate::sysroot::Sysroot;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("apache.conf", include_str!("../templates/apache.conf")),
    ("apache-ssl.conf", include_str!("../templates/apache-ssl.conf")),
    ("nginx.conf", include_str!("../templates/nginx.conf")),
    ("nginx-ssl.conf", include_str!("../templates/nginx-ssl.conf")),
    ("darwin/apache.conf", include_str!("../templates/darwin/apache.conf")),
    ("darwin/apache-ssl.conf", include_str!("../templates/darwin/apache-ssl.conf")),
    ("darwin/nginx.conf", include_str!("../templates/darwin/nginx.conf")),
    ("darwin/nginx-ssl.conf", include_str!("../templates/darwin/nginx-ssl.conf")),
    ("windows/apache.conf", include_str!("../templates/windows/apache.conf")),
    ("windows/apache-ssl.conf", include_str!("../templates/windows/apache-ssl.conf")),
    ("windows/nginx.conf", include_str!("../templates/windows/nginx.conf")),
    ("windows/nginx-ssl.conf", include_str!("../templates/windows/nginx-ssl.conf")),
];

const DEFAULT_APACHE_ROOT_WINDOWS: &str = r"C:\Apache24";
const DEFAULT_NGINX_ROOT_WINDOWS: &str = r"C:\nginx";

/// Where a site's configuration lives and which template produces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub template_name: String,
    pub config_path: PathBuf,
    pub server_root: PathBuf,
}

/// Certificate and key issued for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl CertificateBundle {
    /// Check that both files exist and are non-empty.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or empty file.
    pub fn verify(&self, sysroot: &Sysroot) -> std::result::Result<(), String> {
        for (label, path) in [("certificate", &self.cert_file), ("key", &self.key_file)] {
            match std::fs::metadata(sysroot.resolve(path)) {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {}
                Ok(_) => return Err(format!("{label} file is empty: {}", path.display())),
                Err(_) => return Err(format!("{label} file not found: {}", path.display())),
            }
        }
        Ok(())
    }
}

#[must_use]
pub fn template_name(server: WebServer, ssl: bool) -> String {
    if ssl {
        format!("{server}-ssl.conf")
    } else {
        format!("{server}.conf")
    }
}

/// Resolve the descriptor for `(server, ssl)` on the profile's platform.
#[must_use]
pub fn descriptor_for(
    server: WebServer,
    ssl: bool,
    domain: &str,
    profile: &PlatformProfile,
    layout: ConfigLayout,
) -> ConfigDescriptor {
    let template_name = template_name(server, ssl);
    let os = match layout {
        ConfigLayout::Legacy => Os::Linux,
        ConfigLayout::Platform => profile.os,
    };

    let (config_path, server_root) = match (server, os) {
        (WebServer::Apache, Os::Linux) => (
            PathBuf::from(format!("/etc/apache2/sites-available/{domain}.conf")),
            PathBuf::from("/etc/apache2"),
        ),
        (WebServer::Nginx, Os::Linux) => (
            PathBuf::from(format!("/etc/nginx/sites-available/{domain}")),
            PathBuf::from("/etc/nginx"),
        ),
        (WebServer::Apache, Os::Darwin) => {
            let root = profile.homebrew_prefix().join("etc/httpd");
            (root.join(format!("extra/vhosts/{domain}.conf")), root)
        }
        (WebServer::Nginx, Os::Darwin) => {
            let root = profile.homebrew_prefix().join("etc/nginx");
            (root.join(format!("servers/{domain}.conf")), root)
        }
        (WebServer::Apache, Os::Windows) => {
            let root = windows_root(
                profile.paths.apache_server_root.as_deref(),
                DEFAULT_APACHE_ROOT_WINDOWS,
            );
            (
                PathBuf::from(format!(r"{root}\conf\extra\vhosts\{domain}.conf")),
                PathBuf::from(root),
            )
        }
        (WebServer::Nginx, Os::Windows) => {
            let root = windows_root(profile.paths.nginx_root.as_deref(), DEFAULT_NGINX_ROOT_WINDOWS);
            (
                PathBuf::from(format!(r"{root}\conf\sites-enabled\{domain}.conf")),
                PathBuf::from(root),
            )
        }
    };

    ConfigDescriptor {
        template_name,
        config_path,
        server_root,
    }
}

fn windows_root(over: Option<&Path>, default: &str) -> String {
    over.map_or_else(
        || default.to_string(),
        |p| p.to_string_lossy().trim_end_matches(['\\', '/']).to_string(),
    )
}

/// Built-in templates plus an optional on-disk override directory.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    dir: Option<PathBuf>,
}

impl TemplateSet {
    #[must_use]
    pub const fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Load `name`, preferring the `<os>/` variant over the generic one and
    /// the override directory over the built-in set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no variant exists or a file can't be read.
    pub fn load(&self, os: Os, name: &str) -> Result<String> {
        let variant = format!("{os}/{name}");

        if let Some(dir) = &self.dir {
            for candidate in [dir.join(&variant), dir.join(name)] {
                if candidate.is_file() {
                    debug!("using template {}", candidate.display());
                    return std::fs::read_to_string(&candidate).map_err(|e| {
                        Error::config(format!("load template {}", candidate.display()), e)
                    });
                }
            }
        }

        [variant.as_str(), name]
            .iter()
            .find_map(|key| {
                BUILTIN_TEMPLATES
                    .iter()
                    .find(|(builtin, _)| builtin == key)
                    .map(|(_, body)| (*body).to_string())
            })
            .ok_or_else(|| Error::config(format!("load template {name}"), "template not found"))
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderVars {
    pub domain: String,
    pub path: String,
    pub public_path: String,
    pub ssl_cert: String,
    pub ssl_key: String,
    pub server_root: String,
    pub fastcgi_pass: String,
}

impl RenderVars {
    fn pairs(&self) -> [(&'static str, String); 9] {
        [
            ("DOMAIN", self.domain.clone()),
            ("PATH", self.path.clone()),
            ("PUBLIC_PATH", self.public_path.clone()),
            ("SSL_CERT", self.ssl_cert.clone()),
            ("SSL_KEY", self.ssl_key.clone()),
            ("SERVER_NAME", self.domain.clone()),
            ("SERVER_ALIAS", format!("www.{}", self.domain)),
            ("SERVERROOT", self.server_root.clone()),
            ("FASTCGI_PASS", self.fastcgi_pass.clone()),
        ]
    }
}

/// Replace every `{{KEY}}` with its value. Unknown placeholders are left
/// untouched and keys absent from the template are no-ops.
#[must_use]
pub fn render(template: &str, vars: &RenderVars) -> String {
    vars.pairs()
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{{{key}}}}}"), value)
        })
}

/// Writes rendered server configuration files.
#[derive(Debug, Clone)]
pub struct ConfigGenerator<'a> {
    templates: &'a TemplateSet,
    sysroot: &'a Sysroot,
    layout: ConfigLayout,
}

impl<'a> ConfigGenerator<'a> {
    #[must_use]
    pub const fn new(templates: &'a TemplateSet, sysroot: &'a Sysroot, layout: ConfigLayout) -> Self {
        Self {
            templates,
            sysroot,
            layout,
        }
    }

    #[must_use]
    pub fn descriptor(&self, options: &SiteOptions, profile: &PlatformProfile) -> ConfigDescriptor {
        descriptor_for(options.server, options.ssl, &options.domain, profile, self.layout)
    }

    /// Render and write the configuration for `options`, returning the
    /// absolute config path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a missing template, missing certificates
    /// (SSL only) or an unwritable destination. Nothing is written in those
    /// cases.
    pub fn generate(
        &self,
        options: &SiteOptions,
        profile: &PlatformProfile,
        certs: Option<&CertificateBundle>,
        fastcgi_pass: &str,
    ) -> Result<PathBuf> {
        let descriptor = self.descriptor(options, profile);

        let (ssl_cert, ssl_key) = if options.ssl {
            let bundle = certs.ok_or_else(|| {
                Error::config("render SSL configuration", "no certificate bundle was issued")
            })?;
            bundle
                .verify(self.sysroot)
                .map_err(|e| Error::config("render SSL configuration", e))?;
            (
                bundle.cert_file.display().to_string(),
                bundle.key_file.display().to_string(),
            )
        } else {
            (String::new(), String::new())
        };

        let os = match self.layout {
            ConfigLayout::Legacy => Os::Linux,
            ConfigLayout::Platform => profile.os,
        };
        let template = self.templates.load(os, &descriptor.template_name)?;

        let vars = RenderVars {
            domain: options.domain.clone(),
            path: options.path.display().to_string(),
            public_path: options.path.join("public").display().to_string(),
            ssl_cert,
            ssl_key,
            server_root: descriptor.server_root.display().to_string(),
            fastcgi_pass: fastcgi_pass.to_string(),
        };
        let rendered = render(&template, &vars);

        let target = self.sysroot.resolve(&descriptor.config_path);
        let dir = target.parent().ok_or_else(|| {
            Error::config(
                "resolve config directory",
                format!("{} has no parent", descriptor.config_path.display()),
            )
        })?;

        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("create {}", dir.display()), e))?;
        ensure_writable(dir)?;

        std::fs::write(&target, rendered)
            .map_err(|e| Error::config(format!("write {}", target.display()), e))?;
        info!("configuration written to {}", descriptor.config_path.display());

        Ok(descriptor.config_path)
    }
}

#[cfg(unix)]
fn ensure_writable(dir: &Path) -> Result<()> {
    use nix::unistd::{AccessFlags, access};

    access(dir, AccessFlags::W_OK).map_err(|e| {
        Error::config(
            format!("write to {}", dir.display()),
            format!("directory is not writable: {e}"),
        )
    })
}

#[cfg(not(unix))]
fn ensure_writable(dir: &Path) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .map_err(|e| Error::config(format!("inspect {}", dir.display()), e))?;
    if meta.permissions().readonly() {
        return Err(Error::config(
            format!("write to {}", dir.display()),
            "directory is read-only",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, PathHints};
    use tempfile::{TempDir, tempdir};

    fn demo_options(ssl: bool) -> (TempDir, SiteOptions) {
        let docroot = tempdir().unwrap();
        let options = SiteOptions::new("demo.test", docroot.path(), "nginx", ssl).unwrap();
        (docroot, options)
    }

    fn vars() -> RenderVars {
        RenderVars {
            domain: "demo.test".into(),
            path: "/srv/demo".into(),
            public_path: "/srv/demo/public".into(),
            ssl_cert: String::new(),
            ssl_key: String::new(),
            server_root: "/etc/nginx".into(),
            fastcgi_pass: "127.0.0.1:9000".into(),
        }
    }

    #[test]
    fn render_is_literal() {
        let out = render(
            "server_name {{SERVER_NAME}} {{SERVER_ALIAS}}; root {{PUBLIC_PATH}}; {{UNKNOWN}}",
            &vars(),
        );
        assert_eq!(
            out,
            "server_name demo.test www.demo.test; root /srv/demo/public; {{UNKNOWN}}"
        );
    }

    #[test]
    fn linux_descriptors() {
        let profile = PlatformProfile::generic_linux();
        let nginx = descriptor_for(WebServer::Nginx, false, "demo.test", &profile, ConfigLayout::Platform);
        assert_eq!(nginx.config_path, PathBuf::from("/etc/nginx/sites-available/demo.test"));
        assert_eq!(nginx.template_name, "nginx.conf");

        let apache = descriptor_for(WebServer::Apache, true, "demo.test", &profile, ConfigLayout::Platform);
        assert_eq!(
            apache.config_path,
            PathBuf::from("/etc/apache2/sites-available/demo.test.conf")
        );
        assert_eq!(apache.template_name, "apache-ssl.conf");
    }

    #[test]
    fn darwin_and_windows_descriptors() {
        let darwin = PlatformProfile {
            os: Os::Darwin,
            arch: Arch::Arm64,
            ..PlatformProfile::generic_linux()
        };
        let d = descriptor_for(WebServer::Nginx, false, "a.test", &darwin, ConfigLayout::Platform);
        assert_eq!(d.config_path, PathBuf::from("/opt/homebrew/etc/nginx/servers/a.test.conf"));

        let legacy = descriptor_for(WebServer::Nginx, false, "a.test", &darwin, ConfigLayout::Legacy);
        assert_eq!(legacy.config_path, PathBuf::from("/etc/nginx/sites-available/a.test"));

        let windows = PlatformProfile {
            os: Os::Windows,
            paths: PathHints {
                apache_server_root: Some(PathBuf::from(r"D:\Apache\")),
                ..PathHints::default()
            },
            ..PlatformProfile::generic_linux()
        };
        let w = descriptor_for(WebServer::Apache, false, "a.test", &windows, ConfigLayout::Platform);
        assert_eq!(
            w.config_path,
            PathBuf::from(r"D:\Apache\conf\extra\vhosts\a.test.conf")
        );
        let n = descriptor_for(WebServer::Nginx, false, "a.test", &windows, ConfigLayout::Platform);
        assert_eq!(n.server_root, PathBuf::from(r"C:\nginx"));
    }

    #[test]
    fn platform_variant_takes_precedence() {
        let templates = TemplateSet::builtin();
        let darwin = templates.load(Os::Darwin, "apache.conf").unwrap();
        let generic = templates.load(Os::Linux, "apache.conf").unwrap();
        assert!(darwin.contains("var/log/httpd"));
        assert!(generic.contains("APACHE_LOG_DIR"));
    }

    #[test]
    fn override_dir_wins() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("linux")).unwrap();
        std::fs::write(dir.path().join("linux/nginx.conf"), "custom {{DOMAIN}}\n").unwrap();
        let templates = TemplateSet::with_dir(dir.path());
        assert_eq!(templates.load(Os::Linux, "nginx.conf").unwrap(), "custom {{DOMAIN}}\n");
        // Falls through to the built-in set for names it doesn't override.
        assert!(templates.load(Os::Linux, "apache.conf").unwrap().contains("VirtualHost"));
        assert!(templates.load(Os::Linux, "iis.conf").is_err());
    }

    #[test]
    fn generate_demo_site_on_linux() {
        let root = tempdir().unwrap();
        let sysroot = Sysroot::new(root.path());
        let templates = TemplateSet::builtin();
        let generator = ConfigGenerator::new(&templates, &sysroot, ConfigLayout::Platform);
        let (_docroot, options) = demo_options(false);

        let path = generator
            .generate(&options, &PlatformProfile::generic_linux(), None, "127.0.0.1:9000")
            .unwrap();
        assert_eq!(path, PathBuf::from("/etc/nginx/sites-available/demo.test"));

        let written = std::fs::read_to_string(sysroot.resolve(&path)).unwrap();
        assert!(written.contains("server_name demo.test www.demo.test;"));
        assert!(written.contains(&format!("root \"{}/public\";", options.path.display())));
        assert!(!written.contains("{{"));
    }

    #[test]
    fn generate_is_deterministic() {
        let root = tempdir().unwrap();
        let sysroot = Sysroot::new(root.path());
        let templates = TemplateSet::builtin();
        let generator = ConfigGenerator::new(&templates, &sysroot, ConfigLayout::Platform);
        let (_docroot, options) = demo_options(false);
        let profile = PlatformProfile::generic_linux();

        let path = generator.generate(&options, &profile, None, "unix:/run/php/php8.3-fpm.sock").unwrap();
        let first = std::fs::read(sysroot.resolve(&path)).unwrap();
        generator.generate(&options, &profile, None, "unix:/run/php/php8.3-fpm.sock").unwrap();
        let second = std::fs::read(sysroot.resolve(&path)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ssl_without_certificates_writes_nothing() {
        let root = tempdir().unwrap();
        let sysroot = Sysroot::new(root.path());
        let templates = TemplateSet::builtin();
        let generator = ConfigGenerator::new(&templates, &sysroot, ConfigLayout::Platform);
        let (_docroot, options) = demo_options(true);
        let profile = PlatformProfile::generic_linux();

        let missing = CertificateBundle {
            cert_file: PathBuf::from("/etc/ssl/demo.test/demo.test.pem"),
            key_file: PathBuf::from("/etc/ssl/demo.test/demo.test-key.pem"),
        };
        for certs in [None, Some(&missing)] {
            let err = generator.generate(&options, &profile, certs, "127.0.0.1:9000").unwrap_err();
            assert_eq!(err.kind(), "config");
        }

        let target = sysroot.resolve(Path::new("/etc/nginx/sites-available/demo.test"));
        assert!(!target.exists());
    }

    #[test]
    fn ssl_with_certificates_renders_paths() {
        let root = tempdir().unwrap();
        let sysroot = Sysroot::new(root.path());
        let certs = CertificateBundle {
            cert_file: PathBuf::from("/etc/ssl/demo.test/demo.test.pem"),
            key_file: PathBuf::from("/etc/ssl/demo.test/demo.test-key.pem"),
        };
        let cert_dir = sysroot.resolve(Path::new("/etc/ssl/demo.test"));
        std::fs::create_dir_all(&cert_dir).unwrap();
        std::fs::write(cert_dir.join("demo.test.pem"), "CERT").unwrap();
        std::fs::write(cert_dir.join("demo.test-key.pem"), "KEY").unwrap();

        let templates = TemplateSet::builtin();
        let generator = ConfigGenerator::new(&templates, &sysroot, ConfigLayout::Platform);
        let (_docroot, options) = demo_options(true);

        let path = generator
            .generate(&options, &PlatformProfile::generic_linux(), Some(&certs), "127.0.0.1:9000")
            .unwrap();
        let written = std::fs::read_to_string(sysroot.resolve(&path)).unwrap();
        assert!(written.contains("ssl_certificate \"/etc/ssl/demo.test/demo.test.pem\";"));
        assert!(written.contains("listen 443 ssl;"));
    }
}
