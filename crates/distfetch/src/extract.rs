//! Single-entry extraction from release archives.
//!
//! Only the requested binary is read out of the archive; no other member is
//! written to disk.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tar::Archive;
use tracing::{debug, trace};
use zip::ZipArchive;

use crate::platform::ArchiveFormat;
use crate::{Error, Result};

/// Whether an archive entry is the wanted binary.
///
/// Accepts the binary at the archive root or one level below a directory
/// named after the distribution, with or without a leading `./`.
#[must_use]
pub fn entry_matches(entry_name: &str, dist: &str, binary: &str) -> bool {
    let name = entry_name.trim_start_matches("./");
    name == binary
        || name
            .strip_prefix(dist)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| rest == binary)
}

/// Extract `binary` from the archive at `archive` into the file `dest`.
///
/// `dest` is created only once the entry has been found.
pub fn extract_binary(
    archive: &Path,
    format: ArchiveFormat,
    dist: &str,
    binary: &str,
    dest: &Path,
) -> Result<()> {
    debug!(?archive, %format, %binary, ?dest, "Extracting binary");

    let file = File::open(archive).map_err(|e| Error::io("open", archive, e))?;
    let found = match format {
        ArchiveFormat::TarGz => extract_from_tar_gz(file, dist, binary, dest)?,
        ArchiveFormat::Zip => extract_from_zip(file, dist, binary, dest)?,
    };

    if found {
        debug!(?dest, "Extracted binary");
        Ok(())
    } else {
        Err(Error::extract(binary, "no binary found in downloaded archive"))
    }
}

fn extract_from_tar_gz(file: File, dist: &str, binary: &str, dest: &Path) -> Result<bool> {
    let mut archive = Archive::new(GzDecoder::new(file));
    let corrupt = |e: io::Error| Error::extract(binary, format!("failed to read tar: {e}"));

    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let matched = {
            let path = entry.path().map_err(corrupt)?;
            let name = path.to_string_lossy();
            trace!(entry = %name, "Checking tar entry");
            entry_matches(&name, dist, binary)
        };
        if matched {
            write_entry(entry, binary, dest)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn extract_from_zip(file: File, dist: &str, binary: &str, dest: &Path) -> Result<bool> {
    let mut archive = ZipArchive::new(file)
        .map_err(|e| Error::extract(binary, format!("failed to open zip: {e}")))?;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::extract(binary, format!("failed to read zip entry: {e}")))?;
        if !entry.is_file() {
            continue;
        }

        trace!(entry = %entry.name(), "Checking zip entry");
        if entry_matches(entry.name(), dist, binary) {
            write_entry(entry, binary, dest)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn write_entry(mut entry: impl Read, binary: &str, dest: &Path) -> Result<()> {
    let mut out = File::create(dest).map_err(|e| Error::io("create", dest, e))?;
    if let Err(e) = io::copy(&mut entry, &mut out) {
        drop(out);
        let _ = std::fs::remove_file(dest);
        return Err(Error::extract(binary, format!("failed to read archive entry: {e}")));
    }
    out.sync_all().map_err(|e| Error::io("sync", dest, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{tar_gz_bytes, zip_bytes};
    use tempfile::TempDir;

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_entry_matches() {
        assert!(entry_matches("ipfs", "go-ipfs", "ipfs"));
        assert!(entry_matches("go-ipfs/ipfs", "go-ipfs", "ipfs"));
        assert!(entry_matches("./go-ipfs/ipfs", "go-ipfs", "ipfs"));
        assert!(!entry_matches("go-ipfs/ipfs-helper", "go-ipfs", "ipfs"));
        assert!(!entry_matches("other/ipfs", "go-ipfs", "ipfs"));
        assert!(!entry_matches("go-ipfs/bin/ipfs", "go-ipfs", "ipfs"));
        assert!(!entry_matches("go-ipfsx/ipfs", "go-ipfs", "ipfs"));
    }

    #[test]
    fn test_extract_nested_tar_entry() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(
            temp.path(),
            "a.tar.gz",
            &tar_gz_bytes(&[
                ("go-ipfs/README.md", b"readme"),
                ("go-ipfs/ipfs", b"#!binary"),
                ("go-ipfs/LICENSE", b"license"),
            ]),
        );
        let dest = temp.path().join("ipfs");

        extract_binary(&archive, ArchiveFormat::TarGz, "go-ipfs", "ipfs", &dest).unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"#!binary");
        assert!(!temp.path().join("README.md").exists());
        assert!(!temp.path().join("go-ipfs").exists());
    }

    #[test]
    fn test_extract_zip_entry() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(
            temp.path(),
            "a.zip",
            &zip_bytes(&[
                ("go-ipfs/install.bat", b"@echo off"),
                ("go-ipfs/ipfs.exe", b"MZ"),
            ]),
        );
        let dest = temp.path().join("ipfs.exe");

        extract_binary(&archive, ArchiveFormat::Zip, "go-ipfs", "ipfs.exe", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"MZ");
    }

    #[test]
    fn test_missing_entry_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(
            temp.path(),
            "a.tar.gz",
            &tar_gz_bytes(&[("go-ipfs/other", b"x")]),
        );
        let dest = temp.path().join("ipfs");

        let err =
            extract_binary(&archive, ArchiveFormat::TarGz, "go-ipfs", "ipfs", &dest).unwrap_err();

        assert!(matches!(err, Error::Extract { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_corrupt_archive_is_extract_error() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(temp.path(), "a.tar.gz", b"definitely not gzip");
        let dest = temp.path().join("ipfs");

        let err =
            extract_binary(&archive, ArchiveFormat::TarGz, "go-ipfs", "ipfs", &dest).unwrap_err();
        assert!(matches!(err, Error::Extract { .. }));

        let err =
            extract_binary(&archive, ArchiveFormat::Zip, "go-ipfs", "ipfs", &dest).unwrap_err();
        assert!(matches!(err, Error::Extract { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_missing_archive_is_io_error() {
        let temp = TempDir::new().unwrap();
        let err = extract_binary(
            &temp.path().join("nope.tar.gz"),
            ArchiveFormat::TarGz,
            "go-ipfs",
            "ipfs",
            &temp.path().join("ipfs"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io { operation: "open", .. }));
    }
}
