use std::path::{Component, Path, PathBuf};

/// Prefix applied to every system path localsite reads or writes.
///
/// Production runs use `/`, which maps paths to themselves. Tests point it at
/// a temporary directory so `/etc/nginx/...` lands inside the fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sysroot {
    root: Option<PathBuf>,
}

impl Sysroot {
    #[must_use]
    pub const fn host() -> Self {
        Self { root: None }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Map a logical system path onto the filesystem.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let Some(root) = &self.root else {
            return path.to_path_buf();
        };

        let mut out = root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::ParentDir => {
                    if out != *root {
                        out.pop();
                    }
                }
                Component::Prefix(prefix) => {
                    // `C:` becomes a plain directory inside the root.
                    let drive = prefix.as_os_str().to_string_lossy().replace(':', "");
                    out.push(drive);
                }
                Component::RootDir | Component::CurDir => {}
            }
        }
        out
    }
}
