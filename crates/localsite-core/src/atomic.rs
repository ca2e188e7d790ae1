//! Replace files so readers never see a half-written one.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write `contents` to a sibling temp file, then rename it over `path`.
///
/// An existing file's permissions carry over. Bind-mounted files (container
/// `/etc/hosts`) cannot be renamed over; those are written in place.
///
/// # Errors
///
/// Returns the I/O error from writing the temp file or the final write.
pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let contents = contents.as_ref();
    let temp = temp_path(path)?;

    fs::write(&temp, contents)?;
    if let Ok(meta) = fs::metadata(path) {
        if let Err(e) = fs::set_permissions(&temp, meta.permissions()) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
    }

    if let Err(e) = fs::rename(&temp, path) {
        debug!("rename onto {} failed ({e}), writing in place", path.display());
        let _ = fs::remove_file(&temp);
        return fs::write(path, contents);
    }
    Ok(())
}

fn temp_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut temp = OsString::from(".");
    temp.push(name);
    temp.push(".localsite-tmp");
    Ok(path.with_file_name(temp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replaces_content_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost\n").unwrap();

        write(&path, "127.0.0.1 localhost\n127.0.0.1 a.test\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n127.0.0.1 a.test\n"
        );
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("hosts")]);
    }

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sites.json");
        write(&path, "{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[cfg(unix)]
    #[test]
    fn keeps_existing_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "old\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write(&path, "new\n").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
