//! # hymie engine
//!
//! Runs hymie apps: users register with an e-mail address, receive an access
//! link and walk a state machine described in `hymie.yaml`. Each endpoint may
//! show a form, send e-mails and move the user to a new state. Administrators
//! follow links that act on behalf of the user.
//!
//! ## Architecture
//!
//! - **`storage`**: per-user dated JSON files, state transitions and uploads
//! - **`workflow`**: the [`Hymie`] engine, views, actions and registration
//! - **`integrity`**: checks the app definition before serving
//! - **`admin`**: data behind the administrator pages
//! - **`mailer`**: SMTP, console and in-memory mail transports
//! - **`links`**: absolute URLs handed to users and administrators

pub mod admin;
pub mod context;
pub mod error;
pub mod integrity;
pub mod links;
pub mod mailer;
pub mod storage;
pub mod workflow;

pub use admin::{AdminEntry, AdminLinkView, AdminSummary, HistoryRow};
pub use error::{EngineError, EngineResult};
pub use integrity::IntegrityReport;
pub use links::Links;
pub use mailer::{ConsoleMailer, MailError, Mailer, MemoryMailer, OutgoingEmail, SmtpMailer};
pub use storage::{PendingTransition, Storage, StorageError, StorageResult};
pub use workflow::{AccessDenied, FormPage, Hymie, RegisterOutcome, START_PAGE, ViewOutcome, WELCOME_EMAIL};
