use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The human user localsite acts on behalf of.
///
/// Under `sudo` this is `SUDO_USER`, not root: the document root, the
/// certificate staging directory and the registry all belong to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub home: PathBuf,
}

impl Identity {
    /// Identify the invoking user from the process environment.
    #[must_use]
    pub fn invoking() -> Self {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_env(&env)
    }

    /// Identify the invoking user from an environment snapshot.
    #[must_use]
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();

        if let Some(name) = get("SUDO_USER").filter(|name| name != "root") {
            let account = lookup_user(&name);
            let uid = get("SUDO_UID")
                .and_then(|v| v.parse().ok())
                .or_else(|| account.as_ref().and_then(|a| a.uid));
            let gid = get("SUDO_GID")
                .and_then(|v| v.parse().ok())
                .or_else(|| account.as_ref().and_then(|a| a.gid));
            let home = account.map_or_else(|| default_home(&name), |a| a.home);
            debug!("acting for sudo user {name} ({})", home.display());
            return Self {
                name,
                uid,
                gid,
                home,
            };
        }

        let current = current_user();
        let name = get("USER")
            .or_else(|| get("USERNAME"))
            .or_else(|| current.as_ref().map(|c| c.name.clone()))
            .unwrap_or_else(|| "root".to_string());
        let home = get("HOME")
            .or_else(|| get("USERPROFILE"))
            .map(PathBuf::from)
            .or_else(|| current.as_ref().map(|c| c.home.clone()))
            .unwrap_or_else(localsite_core::config::fallback_home);

        Self {
            name,
            uid: current.as_ref().and_then(|c| c.uid),
            gid: current.as_ref().and_then(|c| c.gid),
            home,
        }
    }

    /// `owner:group` argument for `chown`.
    #[must_use]
    pub fn owner_spec(&self, group: &str) -> String {
        format!("{}:{group}", self.name)
    }

    /// Give `path` to this user. A no-op unless running as root with a known
    /// uid/gid.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `chown`.
    #[cfg(unix)]
    pub fn hand_over(&self, path: &Path) -> std::io::Result<()> {
        use nix::unistd::{Gid, Uid, chown, geteuid};

        if !geteuid().is_root() {
            return Ok(());
        }
        let (Some(uid), Some(gid)) = (self.uid, self.gid) else {
            return Ok(());
        };
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn hand_over(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

/// Passwd entry for `name`.
#[cfg(unix)]
fn lookup_user(name: &str) -> Option<Identity> {
    let user = nix::unistd::User::from_name(name).ok().flatten()?;
    Some(Identity {
        name: user.name,
        uid: Some(user.uid.as_raw()),
        gid: Some(user.gid.as_raw()),
        home: user.dir,
    })
}

#[cfg(not(unix))]
fn lookup_user(_name: &str) -> Option<Identity> {
    None
}

fn default_home(name: &str) -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Users").join(name)
    } else {
        PathBuf::from("/home").join(name)
    }
}

#[cfg(unix)]
fn current_user() -> Option<Identity> {
    use nix::unistd::{User, getuid};

    let user = User::from_uid(getuid()).ok().flatten()?;
    Some(Identity {
        name: user.name,
        uid: Some(user.uid.as_raw()),
        gid: Some(user.gid.as_raw()),
        home: user.dir,
    })
}

#[cfg(not(unix))]
fn current_user() -> Option<Identity> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn sudo_user_wins() {
        let identity = Identity::from_env(&env(&[
            ("SUDO_USER", "localsite-nobody"),
            ("SUDO_UID", "1234"),
            ("SUDO_GID", "5678"),
            ("USER", "root"),
            ("HOME", "/root"),
        ]));
        assert_eq!(identity.name, "localsite-nobody");
        assert_eq!(identity.uid, Some(1234));
        assert_eq!(identity.gid, Some(5678));
        assert!(identity.home.ends_with("localsite-nobody"));
        assert_eq!(identity.owner_spec("www-data"), "localsite-nobody:www-data");
    }

    #[test]
    fn sudo_root_is_ignored() {
        let identity = Identity::from_env(&env(&[
            ("SUDO_USER", "root"),
            ("USER", "dev"),
            ("HOME", "/home/dev"),
        ]));
        assert_eq!(identity.name, "dev");
        assert_eq!(identity.home, PathBuf::from("/home/dev"));
    }

    #[test]
    fn hand_over_without_ids_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Identity {
            name: "dev".into(),
            uid: None,
            gid: None,
            home: dir.path().to_path_buf(),
        };
        identity.hand_over(dir.path()).unwrap();
    }
}
