//! Append-only incident log.
//!
//! One JSON object per line so an interrupted write can corrupt at most the
//! final line and appends stay O(1) in history length.

use anyhow::Result;
use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Init,
    Created,
    Modified,
    Moved,
    Deleted,
    Recovery,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp: String,
    pub risk: RiskLevel,
    pub details: String,
}

pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one incident. The caller gates this on the `save_logs` setting.
    pub fn log_incident(&self, details: &str, risk: RiskLevel) -> Result<()> {
        let incident = Incident {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            risk,
            details: details.to_string(),
        };
        let line = serde_json::to_string(&incident)?;
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Read back every incident, skipping blank lines.
    pub fn read_all(&self) -> Result<Vec<Incident>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut incidents = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            incidents.push(serde_json::from_str(&line)?);
        }
        Ok(incidents)
    }

    /// Remove the log file entirely.
    pub fn clear(&self) -> bool {
        let _guard = self.write_lock.lock();
        if self.path.exists() {
            fs::remove_file(&self.path).is_ok()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn incidents_append_in_order() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("security_audit.json"));
        log.log_incident("File under protection: /data/a", RiskLevel::Init).unwrap();
        log.log_incident("Restored: /data/a", RiskLevel::Recovery).unwrap();

        let incidents = log.read_all().unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].risk, RiskLevel::Init);
        assert_eq!(incidents[1].risk, RiskLevel::Recovery);
        assert!(incidents[1].details.contains("/data/a"));
    }

    #[test]
    fn risk_levels_serialize_screaming() {
        let json = serde_json::to_string(&RiskLevel::Recovery).unwrap();
        assert_eq!(json, "\"RECOVERY\"");
        let json = serde_json::to_string(&RiskLevel::Init).unwrap();
        assert_eq!(json, "\"INIT\"");
    }

    #[test]
    fn clear_removes_log() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("security_audit.json"));
        log.log_incident("x", RiskLevel::Warning).unwrap();
        assert!(log.clear());
        assert!(log.read_all().unwrap().is_empty());
        // clearing an absent log is fine too
        assert!(log.clear());
    }
}
