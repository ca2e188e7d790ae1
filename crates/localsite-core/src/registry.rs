use crate::error::{Error, Result};
use crate::site::{SiteOptions, WebServer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub domain: String,
    pub path: PathBuf,
    pub server: WebServer,
    pub ssl: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SiteRecord {
    #[must_use]
    pub fn from_options(options: &SiteOptions) -> Self {
        Self {
            domain: options.domain.clone(),
            path: options.path.clone(),
            server: options.server,
            ssl: options.ssl,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    sites: BTreeMap<String, SiteRecord>,
}

/// Durable record of provisioned sites, keyed by domain.
///
/// Backed by a JSON file. Every mutation loads the file, applies the change
/// and writes it back; there is no locking between concurrent invocations.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    path: PathBuf,
}

impl SiteRegistry {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `record.domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if the registry cannot be read or written.
    pub fn save(&self, record: SiteRecord) -> Result<()> {
        let mut file = self.load()?;
        debug!("saving registry record for {}", record.domain);
        file.sites.insert(record.domain.clone(), record);
        self.store(&file)
    }

    /// All records, ordered by domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registry`] if the registry exists but cannot be parsed.
    pub fn list(&self) -> Result<Vec<SiteRecord>> {
        Ok(self.load()?.sites.into_values().collect())
    }

    /// # Errors
    ///
    /// Returns [`Error::Registry`] if the registry exists but cannot be parsed.
    pub fn get(&self, domain: &str) -> Result<Option<SiteRecord>> {
        Ok(self.load()?.sites.remove(domain))
    }

    /// Delete the record for `domain` and return it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no record exists for `domain`.
    pub fn remove(&self, domain: &str) -> Result<SiteRecord> {
        let mut file = self.load()?;
        let record = file
            .sites
            .remove(domain)
            .ok_or_else(|| Error::NotFound(domain.to_string()))?;
        self.store(&file)?;
        Ok(record)
    }

    fn load(&self) -> Result<RegistryFile> {
        if !self.path.exists() {
            return Ok(RegistryFile::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::registry(format!("read {}", self.path.display()), e))?;
        if content.trim().is_empty() {
            return Ok(RegistryFile::default());
        }

        serde_json::from_str(&content)
            .map_err(|e| Error::registry(format!("parse {}", self.path.display()), e))
    }

    fn store(&self, file: &RegistryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::registry(format!("create {}", parent.display()), e))?;
        }
        let content = serde_json::to_string_pretty(file)
            .map_err(|e| Error::registry("serialize site registry", e))?;
        crate::atomic::write(&self.path, content)
            .map_err(|e| Error::registry(format!("write {}", self.path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(domain: &str, path: &str) -> SiteRecord {
        SiteRecord {
            domain: domain.to_string(),
            path: PathBuf::from(path),
            server: WebServer::Nginx,
            ssl: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn save_upserts_by_domain() {
        let dir = tempdir().unwrap();
        let registry = SiteRegistry::with_path(dir.path().join("sites.json"));

        registry.save(record("a.test", "/srv/a")).unwrap();
        registry.save(record("a.test", "/other")).unwrap();

        let sites = registry.list().unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].path, PathBuf::from("/other"));
    }

    #[test]
    fn list_is_ordered_and_persistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/sites.json");

        let registry = SiteRegistry::with_path(&path);
        registry.save(record("zeta.test", "/srv/z")).unwrap();
        registry.save(record("alpha.test", "/srv/a")).unwrap();

        let reopened = SiteRegistry::with_path(&path);
        let domains: Vec<_> = reopened
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.domain)
            .collect();
        assert_eq!(domains, vec!["alpha.test", "zeta.test"]);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let registry = SiteRegistry::with_path(dir.path().join("sites.json"));
        registry.save(record("a.test", "/srv/a")).unwrap();

        assert!(matches!(
            registry.remove("b.test"),
            Err(Error::NotFound(domain)) if domain == "b.test"
        ));
        assert_eq!(registry.remove("a.test").unwrap().domain, "a.test");
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn empty_file_is_empty_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sites.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(SiteRegistry::with_path(&path).list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sites.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = SiteRegistry::with_path(&path).list().unwrap_err();
        assert_eq!(err.kind(), "registry");
    }
}
