//! Size-capped log file for `--log`.
//!
//! When a write would take the file past `max_bytes`, `knxcal.log` becomes
//! `knxcal.log.1`, older backups shift up by one, and the oldest beyond `backups`
//! is dropped. A single record larger than `max_bytes` is still written whole.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BYTES: u64 = 1_000_000;
pub const DEFAULT_BACKUPS: usize = 4;

#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open `path` for appending; existing content counts towards the cap.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            backups,
            file,
            written,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups > 0 {
            for n in (1..self.backups).rev() {
                let from = backup_path(&self.path, n);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, n + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `knxcal.log` -> `knxcal.log.3`
pub fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_and_keeps_bounded_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.log");
        let mut log = RotatingFile::open(&path, 10, 2).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            log.write_all(line.as_bytes()).unwrap();
        }
        log.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "bbbbbbbb\n");
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn existing_content_counts_towards_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.log");
        fs::write(&path, "old line\n").unwrap();

        let mut log = RotatingFile::open(&path, 12, 1).unwrap();
        log.write_all(b"new line\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new line\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "old line\n");
    }

    #[test]
    fn zero_backups_truncates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gw.log");
        let mut log = RotatingFile::open(&path, 4, 0).unwrap();
        log.write_all(b"first\n").unwrap();
        log.write_all(b"second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
        assert!(!backup_path(&path, 1).exists());
    }
}
