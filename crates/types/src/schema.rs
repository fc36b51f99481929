//! Strongly typed schema for the `hymie.yaml` app definition.
//!
//! An app is a set of named endpoints. Each endpoint may show a form, may
//! store what was submitted, triggers e-mail actions and moves the user to a
//! next state. Endpoint order is preserved (via `IndexMap`) so listings and
//! integrity reports follow the authoring order.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub mod validation;

pub use validation::{AddressError, Destination, EmailAddress, validate_email};

/// Root of the app definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppDefinition {
    pub metadata: Metadata,
    pub config: Config,
    pub endpoints: IndexMap<String, Endpoint>,
}

impl AppDefinition {
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }
}

/// Descriptive data about the app, injected into every rendered template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub maintainer: String,
    pub maintainer_email: EmailAddress,
    /// State assigned to every newly registered user.
    pub first_endpoint: String,
    /// Template (for example `{{ intro.last_name | upper }}`) used to label users in the admin list.
    #[serde(default)]
    pub friendly_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub email: EmailConfig,
    pub secret: SecretConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Outgoing mail settings.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmailConfig {
    /// Sender address, also what `self` resolves to.
    pub address: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub user: String,
    pub password: String,
    /// Connection timeout in seconds.
    pub timeout: u64,
    /// Prefix prepended to every subject.
    pub subject: String,
    /// When true messages are logged instead of sent.
    #[serde(default)]
    pub debug: bool,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EmailConfig")
            .field("address", &self.address)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("use_ssl", &self.use_ssl)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("subject", &self.subject)
            .field("debug", &self.debug)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// Key used to sign form tokens.
    pub key: String,
    /// Password accepted for the `admin` user when no `.htpasswd` entry matches.
    pub admin_password: String,
}

impl std::fmt::Debug for SecretConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SecretConfig")
            .field("key", &"<redacted>")
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

pub const DEFAULT_HASH_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Root folder of the storage. Relative paths are resolved against the app folder.
    pub path: PathBuf,
    /// Salt for the e-mail hash that identifies users.
    pub salt: String,
    #[serde(default = "default_hash_iterations")]
    pub hash_iterations: u32,
}

fn default_hash_iterations() -> u32 {
    DEFAULT_HASH_ITERATIONS
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Public base URL used to build links sent by e-mail.
    pub base_url: String,
    pub bind_address: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            bind_address: "127.0.0.1:5000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// What happens with a submitted form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormAction {
    /// Validate and persist the submission.
    Store,
    /// Validate only.
    Show,
}

/// One step of the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    pub description: String,
    /// `None` means the endpoint has no form: visiting it records the transition.
    #[serde(default)]
    pub form_action: Option<FormAction>,
    /// Form field name to `<endpoint>.<field>` of previously stored data.
    #[serde(default)]
    pub form_prefill: IndexMap<String, String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub next_state: String,
    /// Buttons offered to administrators while a user sits in this state.
    #[serde(default)]
    pub admin_links: Vec<AdminLink>,
    /// Evaluated in order before `next_state`; the first match wins.
    #[serde(default)]
    pub conditional_next_state: Vec<ConditionalNextState>,
}

impl Endpoint {
    pub fn has_form(&self) -> bool {
        self.form_action.is_some()
    }
}

fn default_condition() -> String {
    "True".to_string()
}

/// An action triggered when an endpoint completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Send the submitted form as a table.
    EmailForm(EmailFormAction),
    /// Send an e-mail rendered from a template in `emails/`.
    Email(EmailAction),
}

impl Action {
    /// Jinja expression deciding whether the action runs.
    pub fn condition(&self) -> &str {
        match self {
            Action::EmailForm(action) => &action.condition,
            Action::Email(action) => &action.condition,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::EmailForm(_) => "email_form",
            Action::Email(_) => "email",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmailFormAction {
    #[serde(default = "default_condition")]
    pub condition: String,
    pub destination: Destination,
    #[serde(default)]
    pub cc: Option<Destination>,
    #[serde(default)]
    pub bcc: Option<Destination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmailAction {
    #[serde(default = "default_condition")]
    pub condition: String,
    /// File name inside `emails/`, extension included.
    pub template: String,
    pub destination: Destination,
    #[serde(default)]
    pub cc: Option<Destination>,
    #[serde(default)]
    pub bcc: Option<Destination>,
}

impl EmailAction {
    /// Action used for the access-link e-mail sent on registration and recovery.
    pub fn welcome() -> Self {
        Self {
            condition: default_condition(),
            template: "welcome.md".to_string(),
            destination: Destination::User,
            cc: None,
            bcc: None,
        }
    }
}

/// Visual flavour of an admin button.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Accept,
    Reject,
    #[default]
    Info,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Accept => "accept",
            LinkKind::Reject => "reject",
            LinkKind::Info => "info",
        }
    }
}

/// Admin action button: moves the user to `endpoint` when followed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdminLink {
    pub text: String,
    pub endpoint: String,
    #[serde(rename = "type", default)]
    pub kind: LinkKind,
    #[serde(default)]
    pub tooltip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConditionalNextState {
    pub condition: String,
    pub next_state: String,
}
