//! Owner-only file writes for secrets and identity material

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Mode for files the client rewrites (configuration, contacts, keys)
pub const OWNER_READ_WRITE: u32 = 0o600;

/// Mode for the issued identity certificate
pub const OWNER_READ_ONLY: u32 = 0o400;

/// Replace `path` with `contents`, creating it with `mode`.
///
/// Any existing file is removed first so a read-only file can be replaced
/// and so the new permissions always apply.
pub fn write_restricted(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replaces_read_only_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.crt");

        write_restricted(&path, b"first", OWNER_READ_ONLY).unwrap();
        write_restricted(&path, b"second", OWNER_READ_ONLY).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_restricted(&path, b"{}", OWNER_READ_WRITE).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
