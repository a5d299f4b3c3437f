use serde::{Deserialize, Serialize};

/// Runtime options the host may change while monitoring runs. UI-only
/// fields of the external configuration blob are not represented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Gate for the incident audit log.
    pub save_logs: bool,
    /// Delivery address for operator alerts.
    pub alert_email: String,
    /// Roll hostile changes back automatically instead of only warning.
    pub auto_restore: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            save_logs: true,
            alert_email: String::new(),
            auto_restore: true,
        }
    }
}

impl MonitorSettings {
    /// An address without `@` is treated as unset.
    pub fn alert_recipient(&self) -> Option<&str> {
        if self.alert_email.contains('@') {
            Some(&self.alert_email)
        } else {
            None
        }
    }
}
