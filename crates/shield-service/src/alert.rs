//! Operator alerting seam.
//!
//! The delivery transport (SMTP relay, webhook, …) is an external
//! collaborator; the monitor owns recipient validation, message formatting
//! and fire-and-forget dispatch.

use chrono::Local;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Alert {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Alert {
    /// Build the operator alert for a hostile change on `path`.
    pub fn for_threat(recipient: &str, path: &Path, threat: &str) -> Self {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            recipient: recipient.to_string(),
            subject: format!("ТРИВОГА: {basename}"),
            body: format!(
                "ЗАГРОЗА: {threat}\nФайл: {}\nЧас: {}",
                path.display(),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
            ),
        }
    }
}

/// Implementations must be cheap to call from any task; slow transports
/// should queue internally. Failures are logged by the engine, never
/// propagated into the responder.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: Alert) -> anyhow::Result<()>;
}

/// Default sink: surface the alert in the service log.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn dispatch(&self, alert: Alert) -> anyhow::Result<()> {
        warn!(to = %alert.recipient, subject = %alert.subject, "operator alert");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_names_the_basename() {
        let alert = Alert::for_threat("ops@example.com", Path::new("/data/notes.txt"), "Ransomware");
        assert_eq!(alert.subject, "ТРИВОГА: notes.txt");
        assert!(alert.body.contains("/data/notes.txt"));
        assert!(alert.body.contains("Ransomware"));
    }
}
