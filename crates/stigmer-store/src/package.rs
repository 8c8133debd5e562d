//! Deterministic Skill directory packaging
//!
//! A Skill directory is recognized by the presence of `SKILL.md`. Packaging
//! walks the tree in sorted order, skips the deny list, and writes zip
//! entries with fixed timestamps, so two functionally identical directories
//! always produce the same archive bytes, and therefore the same digest.

use std::io::{Cursor, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::kv::{StoreError, StoreResult};

/// Manifest file every Skill directory must contain
pub const SKILL_MANIFEST: &str = "SKILL.md";

/// Directories never packaged: VCS state, dependency caches, build outputs,
/// IDE state.
const DENY_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Dotfiles never packaged
const DENY_DOTFILES: &[&str] = &[".DS_Store", ".env", ".envrc", ".gitignore", ".gitattributes"];

/// True when `dir` is a packagable Skill directory
pub fn is_skill_dir(dir: &Path) -> bool {
    dir.is_dir() && dir.join(SKILL_MANIFEST).is_file()
}

fn denied(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        DENY_DIRS.contains(&name.as_ref())
    } else {
        DENY_DOTFILES.contains(&name.as_ref())
    }
}

/// Package a Skill directory into deterministic zip bytes.
///
/// Fails `Io` when the directory is missing its `SKILL.md`.
pub fn package_skill_dir(dir: &Path) -> StoreResult<Vec<u8>> {
    if !is_skill_dir(dir) {
        return Err(StoreError::Io(format!(
            "{} is not a skill directory (missing {SKILL_MANIFEST})",
            dir.display()
        )));
    }

    // Fixed timestamp keeps the archive independent of mtime churn.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    // sort_by_file_name makes the walk order, and so the entry order,
    // independent of the filesystem.
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !denied(e));

    for entry in walker {
        let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer
            .start_file(name, options)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let contents = std::fs::read(entry.path()).map_err(|e| StoreError::Io(e.to_string()))?;
        writer
            .write_all(&contents)
            .map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let cursor = writer.finish().map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::digest_bytes;
    use std::fs;

    fn write_skill_dir(root: &Path, body: &str) {
        fs::create_dir_all(root.join("references")).unwrap();
        fs::write(root.join(SKILL_MANIFEST), body).unwrap();
        fs::write(root.join("references/notes.md"), "supporting file").unwrap();
    }

    #[test]
    fn identical_directories_produce_identical_digests() {
        let tmp = tempfile::tempdir().unwrap();
        let d1 = tmp.path().join("one");
        let d2 = tmp.path().join("two");
        write_skill_dir(&d1, "# analysis");
        write_skill_dir(&d2, "# analysis");

        let z1 = package_skill_dir(&d1).unwrap();
        let z2 = package_skill_dir(&d2).unwrap();
        assert_eq!(digest_bytes(&z1), digest_bytes(&z2));
    }

    #[test]
    fn changing_one_file_changes_the_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("skill");
        write_skill_dir(&dir, "# v1");
        let z1 = package_skill_dir(&dir).unwrap();

        fs::write(dir.join("references/notes.md"), "changed").unwrap();
        let z2 = package_skill_dir(&dir).unwrap();
        assert_ne!(digest_bytes(&z1), digest_bytes(&z2));
    }

    #[test]
    fn deny_list_is_excluded_from_the_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("skill");
        write_skill_dir(&dir, "# body");
        let baseline = package_skill_dir(&dir).unwrap();

        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::write(dir.join(".git/HEAD"), "ref: main").unwrap();
        fs::create_dir_all(dir.join("node_modules/pkg")).unwrap();
        fs::write(dir.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(dir.join(".DS_Store"), "junk").unwrap();

        let with_junk = package_skill_dir(&dir).unwrap();
        assert_eq!(digest_bytes(&baseline), digest_bytes(&with_junk));
    }

    #[test]
    fn missing_manifest_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("not-a-skill");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("README.md"), "nope").unwrap();
        assert!(package_skill_dir(&dir).is_err());
        assert!(!is_skill_dir(&dir));
    }
}
