//! File-based JSON persistence.
//!
//! Every entity lives in its own JSON file under the store root:
//!
//! ```text
//! {root}/{project}/{version}/info.json
//! {root}/{project}/{version}/steps/{step_id}/info.json
//! {root}/{project}/{version}/recordings/{recording_id}/info.json
//! {root}/_tasks/{task_id}.json
//! ```
//!
//! Writes go to a `.tmp` sibling and are renamed into place, so a reader
//! never observes a half-written record. Directories are created on first
//! write and nothing is ever deleted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{flog_debug, flog_warn, Error, Result};

const TASKS_DIR: &str = "_tasks";
const INFO_FILE: &str = "info.json";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("static identifier pattern")
    })
}

/// Reject project/version identifiers that could escape the store root.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.len() > 128 || !name_pattern().is_match(name) || name.contains("..") {
        return Err(Error::Validation(format!(
            "{} identifier '{}' must be 1-128 characters of letters, digits, '_', '-' or '.'",
            kind, name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, project: &str, version: &str) -> PathBuf {
        self.root.join(project).join(version)
    }

    pub fn version_info_path(&self, project: &str, version: &str) -> PathBuf {
        self.version_dir(project, version).join(INFO_FILE)
    }

    pub fn steps_dir(&self, project: &str, version: &str) -> PathBuf {
        self.version_dir(project, version).join("steps")
    }

    pub fn step_path(&self, project: &str, version: &str, step_id: &str) -> PathBuf {
        self.steps_dir(project, version).join(step_id).join(INFO_FILE)
    }

    pub fn recordings_dir(&self, project: &str, version: &str) -> PathBuf {
        self.version_dir(project, version).join("recordings")
    }

    pub fn recording_dir(&self, project: &str, version: &str, recording_id: &str) -> PathBuf {
        self.recordings_dir(project, version).join(recording_id)
    }

    pub fn recording_path(&self, project: &str, version: &str, recording_id: &str) -> PathBuf {
        self.recording_dir(project, version, recording_id).join(INFO_FILE)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_DIR)
    }

    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", task_id))
    }

    /// Atomically overwrite `path` with the pretty JSON form of `value`.
    pub fn write<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                flog_debug!("Store: creating directory {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(value)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, path)?;
        flog_debug!("Store: wrote {}", path.display());
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Read every `{dir}/{child}/info.json` record. Missing `dir` yields
    /// nothing; child directories without an info file are skipped.
    pub fn read_children<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut records = Vec::new();
        if !dir.is_dir() {
            return Ok(records);
        }
        for entry in sorted_entries(dir)? {
            if !entry.is_dir() {
                continue;
            }
            let info = entry.join(INFO_FILE);
            if !info.is_file() {
                flog_warn!("Store: {} has no {}, skipping", entry.display(), INFO_FILE);
                continue;
            }
            records.push(self.read(&info)?);
        }
        Ok(records)
    }

    /// Read every `*.json` file directly inside `dir`.
    pub fn read_files<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut records = Vec::new();
        if !dir.is_dir() {
            return Ok(records);
        }
        for entry in sorted_entries(dir)? {
            if entry.is_file() && entry.extension().is_some_and(|ext| ext == "json") {
                records.push(self.read(&entry)?);
            }
        }
        Ok(records)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}
