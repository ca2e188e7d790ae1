use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

// Constant patterns; every validation test compiles them.
#[allow(clippy::expect_used)]
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*(\.[A-Za-z0-9][A-Za-z0-9-]*)+$")
        .expect("domain pattern compiles")
});

/// Characters allowed in a document root. Anything else could break out of
/// a quoted directive in the rendered server configuration.
#[allow(clippy::expect_used)]
static SAFE_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 /._\-~+@:\\]+$").expect("path pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebServer {
    Apache,
    Nginx,
}

impl WebServer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apache => "apache",
            Self::Nginx => "nginx",
        }
    }
}

impl fmt::Display for WebServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebServer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "apache" | "apache2" | "httpd" => Ok(Self::Apache),
            "nginx" => Ok(Self::Nginx),
            other => Err(Error::validation(format!(
                "server must be either 'apache' or 'nginx', got: '{other}'"
            ))),
        }
    }
}

/// Input to a single provisioning run.
///
/// Construct it with [`SiteOptions::new`], which enforces the domain grammar,
/// the path allow-list and that the document root is an existing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOptions {
    pub domain: String,
    pub path: PathBuf,
    pub server: WebServer,
    pub ssl: bool,
}

impl SiteOptions {
    /// Validate raw input and build the options. All problems are reported at
    /// once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] listing every rejected field.
    pub fn new(domain: &str, path: &Path, server: &str, ssl: bool) -> Result<Self> {
        let mut problems = Vec::new();

        let domain = domain.trim();
        if let Err(e) = validate_domain(domain) {
            problems.push(e);
        }

        let path = match resolve_document_root(path) {
            Ok(path) => Some(path),
            Err(e) => {
                problems.push(e);
                None
            }
        };

        let server = match server.parse::<WebServer>() {
            Ok(server) => Some(server),
            Err(Error::Validation(mut msgs)) => {
                problems.append(&mut msgs);
                None
            }
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        match (path, server) {
            (Some(path), Some(server)) if problems.is_empty() => Ok(Self {
                domain: domain.to_ascii_lowercase(),
                path,
                server,
                ssl,
            }),
            _ => Err(Error::Validation(problems)),
        }
    }

    /// `http` or `https`, depending on the TLS flag.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.ssl { "https" } else { "http" }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme(), self.domain)
    }
}

/// Check a domain against the `label(.label)+` grammar.
///
/// # Errors
///
/// Returns a human-readable reason when the domain is rejected.
pub fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    if domain.is_empty() {
        return Err("domain is required and must be a non-empty string".to_string());
    }
    if domain.len() > 253 {
        return Err(format!("domain is longer than 253 characters: '{domain}'"));
    }
    if !DOMAIN_RE.is_match(domain) {
        return Err(format!(
            "'{domain}' is not a valid domain (expected labels like 'myapp.test')"
        ));
    }
    Ok(())
}

/// Check that a path only uses characters that are safe to substitute into
/// a server configuration.
///
/// # Errors
///
/// Returns a human-readable reason when the path is rejected.
pub fn validate_path_chars(path: &Path) -> std::result::Result<(), String> {
    let raw = path.to_string_lossy();
    if !SAFE_PATH_RE.is_match(&raw) {
        return Err(format!(
            "path contains characters that are not allowed in a server config: '{raw}'"
        ));
    }
    Ok(())
}

fn resolve_document_root(path: &Path) -> std::result::Result<PathBuf, String> {
    if path.as_os_str().is_empty() {
        return Err("path is required and must be a non-empty string".to_string());
    }

    validate_path_chars(path)?;

    let absolute = std::path::absolute(path)
        .map_err(|e| format!("could not resolve path '{}': {e}", path.display()))?;

    if !absolute.exists() {
        return Err(format!("path does not exist: {}", absolute.display()));
    }
    if !absolute.is_dir() {
        return Err(format!("path is not a directory: {}", absolute.display()));
    }

    validate_path_chars(&absolute)?;
    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn accepts_well_formed_domains() {
        for domain in ["demo.test", "my-app.local", "a.b.c.dev", "X1.test"] {
            assert!(validate_domain(domain).is_ok(), "{domain} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_domains() {
        for domain in [
            "",
            "localhost",
            "-bad.test",
            "bad..test",
            "bad.test.",
            ".bad.test",
            "under_score.test",
            "demo.test;",
            "demo.test\n",
            "demo.{{PATH}}",
            "a.-b",
        ] {
            assert!(validate_domain(domain).is_err(), "{domain:?} should be rejected");
        }
    }

    #[test]
    fn rejects_template_breaking_paths() {
        for path in ["/srv/a\"b", "/srv/{{DOMAIN}}", "/srv/a;b", "/srv/a\nb", "/srv/$HOME"] {
            assert!(
                validate_path_chars(Path::new(path)).is_err(),
                "{path:?} should be rejected"
            );
        }
        assert!(validate_path_chars(Path::new("/srv/my app/v1.2_x-y")).is_ok());
    }

    #[test]
    fn options_collect_all_problems() {
        let err = SiteOptions::new("not a domain", Path::new("/definitely/missing"), "iis", true)
            .unwrap_err();
        match err {
            Error::Validation(problems) => assert_eq!(problems.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn options_resolve_to_absolute_directory() {
        let dir = tempdir().unwrap();
        let opts = SiteOptions::new("Demo.Test", dir.path(), "NGINX", false).unwrap();
        assert_eq!(opts.domain, "demo.test");
        assert_eq!(opts.server, WebServer::Nginx);
        assert!(opts.path.is_absolute());
        assert_eq!(opts.url(), "http://demo.test");
    }

    #[test]
    fn options_reject_files() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("index.php");
        std::fs::write(&file, "<?php").unwrap();
        assert!(SiteOptions::new("demo.test", &file, "apache", false).is_err());
    }
}
