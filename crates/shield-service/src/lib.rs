//! Real-time file integrity monitor with ransomware-style attack detection
//! and automatic rollback.
//!
//! The engine fuses recursive directory notifications with per-file
//! handle-based rename tracking, classifies each observed change as
//! legitimate or hostile (hash comparison, magic-number signatures,
//! Shannon entropy), and restores hostile changes from local shadow
//! copies while alerting an operator.

pub mod alert;
pub mod classifier;
pub mod engine;
pub mod restore;
pub mod tracker;
pub mod watcher;
