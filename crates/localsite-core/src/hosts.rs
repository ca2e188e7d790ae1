use crate::atomic;
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

pub const LOOPBACK: &str = "127.0.0.1";

/// A loopback line naming exactly one host, captured in group 1.
#[allow(clippy::expect_used)]
static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^127\.0\.0\.1[ \t]+(\S+)[ \t]*\r?$").expect("hosts pattern compiles")
});

fn is_entry_for(line: &str, domain: &str) -> bool {
    ENTRY_RE
        .captures(line)
        .is_some_and(|caps| caps.get(1).is_some_and(|host| host.as_str() == domain))
}

/// What [`HostsFile::add_entry`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostsOutcome {
    Added,
    AlreadyPresent,
}

impl HostsOutcome {
    #[must_use]
    pub fn message(&self, domain: &str) -> String {
        match self {
            Self::Added => format!("Added {domain} to hosts file"),
            Self::AlreadyPresent => format!("Entry for {domain} already exists in hosts file"),
        }
    }
}

/// Loopback mappings in the system hosts file.
///
/// Only lines of the exact form `127.0.0.1 <domain>` are ever added or
/// removed; unrelated lines are preserved.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map `domain` to the loopback address unless an identical mapping is
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hosts`] when the file cannot be read or written.
    pub fn add_entry(&self, domain: &str) -> Result<HostsOutcome> {
        let current = self.read()?;

        if has_entry(&current, domain) {
            debug!("hosts entry for {domain} already present");
            return Ok(HostsOutcome::AlreadyPresent);
        }

        let updated = append_entry(&current, domain);
        atomic::write(&self.path, updated)
            .map_err(|e| Error::hosts(format!("write {}", self.path.display()), e))?;
        info!("added {LOOPBACK} {domain} to {}", self.path.display());
        Ok(HostsOutcome::Added)
    }

    /// Remove every loopback mapping for `domain`. Returns whether anything
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Hosts`] when the file cannot be read or written.
    pub fn remove_entry(&self, domain: &str) -> Result<bool> {
        let current = self.read()?;
        let Some(updated) = remove_entry(&current, domain) else {
            return Ok(false);
        };

        atomic::write(&self.path, updated)
            .map_err(|e| Error::hosts(format!("write {}", self.path.display()), e))?;
        info!("removed {domain} from {}", self.path.display());
        Ok(true)
    }

    fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .map_err(|e| Error::hosts(format!("read {}", self.path.display()), e))
    }
}

/// Whether `content` already maps `domain` to the loopback address.
#[must_use]
pub fn has_entry(content: &str, domain: &str) -> bool {
    content.lines().any(|line| is_entry_for(line, domain))
}

/// `content` with a new loopback line for `domain` appended.
#[must_use]
pub fn append_entry(content: &str, domain: &str) -> String {
    let mut output = content.trim_end().to_string();
    if !output.is_empty() {
        output.push('\n');
    }
    output.push_str(LOOPBACK);
    output.push(' ');
    output.push_str(domain);
    output.push('\n');
    output
}

/// `content` without the loopback lines for `domain`, or `None` when there
/// were none.
#[must_use]
pub fn remove_entry(content: &str, domain: &str) -> Option<String> {
    let mut removed = false;
    let mut output = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        let bare = line.trim_end_matches('\n');
        if is_entry_for(bare, domain) {
            removed = true;
            continue;
        }
        output.push_str(line);
    }

    removed.then_some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_preserves_existing_lines() {
        let content = "127.0.0.1 localhost\n::1 localhost\n\n\n";
        let updated = append_entry(content, "app.test");
        assert_eq!(
            updated,
            "127.0.0.1 localhost\n::1 localhost\n127.0.0.1 app.test\n"
        );
    }

    #[test]
    fn append_to_empty_file() {
        assert_eq!(append_entry("", "app.test"), "127.0.0.1 app.test\n");
    }

    #[test]
    fn match_is_anchored() {
        let content = "127.0.0.1 app.test.other\n# 127.0.0.1 app.test\n127.0.0.10 app.test\n";
        assert!(!has_entry(content, "app.test"));
        assert!(has_entry("127.0.0.1\tapp.test  \n", "app.test"));
        assert!(has_entry("127.0.0.1 app.test\r\n", "app.test"));
        // The dot in the domain is literal.
        assert!(!has_entry("127.0.0.1 appxtest\n", "app.test"));
    }

    #[test]
    fn add_entry_twice_keeps_one_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();
        let hosts = HostsFile::with_path(&path);

        assert_eq!(hosts.add_entry("x.test").unwrap(), HostsOutcome::Added);
        let second = hosts.add_entry("x.test").unwrap();
        assert_eq!(second, HostsOutcome::AlreadyPresent);
        assert!(second.message("x.test").contains("already exists"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("127.0.0.1 x.test").count(), 1);
        assert!(content.starts_with("127.0.0.1 localhost\n"));
        // Rewritten through a temp file that is renamed away.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn remove_entry_only_touches_domain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(
            &path,
            "127.0.0.1 localhost\n127.0.0.1 x.test\n127.0.0.1 x.test.other\n",
        )
        .unwrap();
        let hosts = HostsFile::with_path(&path);

        assert!(hosts.remove_entry("x.test").unwrap());
        assert!(!hosts.remove_entry("x.test").unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n127.0.0.1 x.test.other\n"
        );
    }

    #[test]
    fn missing_hosts_file_is_an_error() {
        let dir = tempdir().unwrap();
        let hosts = HostsFile::with_path(dir.path().join("missing"));
        let err = hosts.add_entry("x.test").unwrap_err();
        assert_eq!(err.kind(), "hosts");
    }
}
