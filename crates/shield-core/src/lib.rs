//! Core primitives for the integrity shield.
//!
//! This crate holds everything the monitor needs that is independent of the
//! event pipeline: content analysis (streaming SHA-256, Shannon entropy,
//! magic-number checks), the encrypted baseline store, gzip shadow copies,
//! the append-only incident log and the runtime settings type.
//!
//! # Security Properties
//!
//! **Detects:** silent content changes, wholesale replacement of media
//! containers by encrypted blobs, high-entropy rewrites typical of
//! ransomware output.
//!
//! **Cannot prevent (requires OS-level access):** an attacker with write
//! access to the shadow directory or the key material, or with the ability
//! to stop the monitor process.

pub mod analysis;
pub mod audit;
pub mod baseline;
pub mod crypto;
pub mod settings;
pub mod shadow;

pub use audit::{AuditLog, Incident, RiskLevel};
pub use baseline::{BaselineStore, StoreError};
pub use settings::MonitorSettings;
pub use shadow::ShadowStore;
