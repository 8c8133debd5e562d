//! Daemon log rotation
//!
//! On daemon start the previous live log is archived under a
//! timestamp-prefixed name, a fresh empty live log is created, and archives
//! older than the retention window are removed.

use chrono::Utc;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Live log file name inside the logs directory
pub const LIVE_LOG: &str = "stigmer.log";

/// Rotated archives older than this are deleted
pub const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Rotate logs and return the live log path.
pub fn rotate(logs_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(logs_dir)?;
    let live = logs_dir.join(LIVE_LOG);

    if live.is_file() {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let archived = logs_dir.join(format!("{stamp}-{LIVE_LOG}"));
        fs::rename(&live, &archived)?;
        tracing::debug!(archive = %archived.display(), "previous log archived");
    }

    fs::write(&live, b"")?;
    clean_archives(logs_dir)?;
    Ok(live)
}

/// Remove rotated files older than [`RETENTION`]. The live log is never
/// touched.
fn clean_archives(logs_dir: &Path) -> io::Result<()> {
    let cutoff = SystemTime::now() - RETENTION;
    for entry in fs::read_dir(logs_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == LIVE_LOG || !name.ends_with(LIVE_LOG) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < cutoff {
            fs::remove_file(entry.path())?;
            tracing::debug!(archive = %name, "expired archive removed");
        }
    }
    Ok(())
}

/// Last `n` lines of the file; `n == 0` means all lines.
pub fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let lines: Vec<String> = io::BufReader::new(file).lines().collect::<Result<_, _>>()?;
    if n == 0 || lines.len() <= n {
        return Ok(lines);
    }
    Ok(lines[lines.len() - n..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn rotation_archives_and_resets_the_live_log() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join(LIVE_LOG);
        fs::write(&live, "old contents\n").unwrap();

        let rotated_live = rotate(dir.path()).unwrap();
        assert_eq!(rotated_live, live);

        // live log exists and is empty
        assert_eq!(fs::read_to_string(&live).unwrap(), "");

        // exactly one timestamped archive holds the old contents
        let archives: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy() != LIVE_LOG)
            .collect();
        assert_eq!(archives.len(), 1);
        assert_eq!(
            fs::read_to_string(archives[0].path()).unwrap(),
            "old contents\n"
        );
    }

    #[test]
    fn expired_archives_are_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("20200101-000000-{LIVE_LOG}"));
        File::create(&stale).unwrap();
        let old_time = SystemTime::now() - RETENTION - Duration::from_secs(3600);
        let file = File::options().write(true).open(&stale).unwrap();
        file.set_modified(old_time).unwrap();
        drop(file);

        rotate(dir.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn tail_zero_means_all_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(tail_lines(&path, 0).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["b", "c"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 3);
    }
}
