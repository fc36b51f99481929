//! Shared type definitions for hymie.
//!
//! The app definition schema mirrors the `hymie.yaml` authoring format, while
//! the record types describe what the file storage hands back to the engine
//! and to the admin views.

pub mod records;
pub mod schema;
pub mod timestamp;

pub use records::{IndexEntry, StateOrigin, StateRecord, StoredEntry, UserSummary};
pub use schema::{
    Action, AdminLink, AppDefinition, Config, ConditionalNextState, Destination, EmailAction, EmailAddress, EmailConfig,
    EmailFormAction, Endpoint, FormAction, LinkKind, Metadata, SecretConfig, ServerConfig, StorageConfig, validate_email,
};
pub use timestamp::{TIMESTAMP_FORMAT, Timestamp, TimestampParseError};
