//! The workflow engine.
//!
//! [`Hymie`] ties the app definition, its documents, the storage and the
//! mailer together. Visiting an endpoint either shows its form or completes it:
//! the submission is validated and stored, the next state is chosen, the
//! endpoint actions run and only then the new state becomes current.

use std::path::Path;
use std::sync::Arc;

use hymie_registry::{
    AppFolder, Document, FieldError, FieldView, Submission, TemplateVars, field_views, load_definition, validate,
};
use hymie_types::{Action, AppDefinition, Destination, EmailAction, EmailFormAction, Endpoint, FormAction, StateOrigin, Timestamp};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::context::{evaluate_condition, extend_context};
use crate::error::{EngineError, EngineResult};
use crate::links::Links;
use crate::mailer::{ConsoleMailer, Mailer, OutgoingEmail, SmtpMailer};
use crate::storage::{Storage, StorageError};

/// Name of the e-mail sent on registration and recovery.
pub const WELCOME_EMAIL: &str = "welcome.md";
/// Page shown at the root of the site.
pub const START_PAGE: &str = "start";

const OPERATOR_MARKER: &str = "_hymie_operator";

const PLAIN_FORM_EMAIL: &str = r#"<p>Submitted by {{ user_email }} at <strong>{{ endpoint }}</strong>.</p>
<table border="1" cellpadding="4" cellspacing="0">
{%- for key, value in form|items %}
  <tr><th align="left">{{ key }}</th><td>{{ value if value is not none else "" }}</td></tr>
{%- endfor %}
</table>
"#;

/// Why a view link was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    /// The uid is unknown.
    InvalidLink,
    /// The state hash does not match the current state.
    StaleLink,
}

impl AccessDenied {
    pub fn message(self) -> &'static str {
        match self {
            AccessDenied::InvalidLink => "The access link is invalid.",
            AccessDenied::StaleLink => "The access link is not valid for the current state.",
        }
    }
}

/// A form ready to be drawn.
#[derive(Debug, Clone, Serialize)]
pub struct FormPage {
    pub endpoint: String,
    pub description: String,
    /// Rendered body of the form document.
    pub intro_html: String,
    pub fields: Vec<FieldView>,
    pub errors: Vec<String>,
    pub user_email: String,
    pub has_files: bool,
}

/// Result of visiting an endpoint.
#[derive(Debug, Clone)]
pub enum ViewOutcome {
    Denied(AccessDenied),
    Form(FormPage),
    /// The endpoint completed and has a page to show.
    Page { endpoint: String, html: String },
    /// The endpoint completed and has no page.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered { email: String },
    AlreadyRegistered { recover_link: String },
}

/// A loaded hymie app.
pub struct Hymie {
    app: AppFolder,
    definition: AppDefinition,
    template_vars: TemplateVars,
    storage: Storage,
    mailer: Arc<dyn Mailer>,
    links: Links,
}

impl Hymie {
    /// Loads the app in `app_path`.
    ///
    /// # Arguments
    /// * `app_path` - The folder containing `hymie.yaml`
    /// * `production` - Use `production.yaml` instead of `testing.yaml`
    /// * `mailer` - Overrides the mailer chosen from the e-mail configuration
    pub fn open(app_path: &Path, production: bool, mailer: Option<Arc<dyn Mailer>>) -> EngineResult<Self> {
        info!(path = %app_path.display(), production, "starting hymie app");
        let loaded = load_definition(app_path, production)?;
        let definition = loaded.definition;
        let storage = Storage::open(&definition.config.storage, app_path)?;

        let mailer: Arc<dyn Mailer> = match mailer {
            Some(mailer) => mailer,
            None if definition.config.email.debug => {
                info!("e-mail is in debug mode, messages will be logged instead of sent");
                Arc::new(ConsoleMailer)
            }
            None => Arc::new(SmtpMailer::new(&definition.config.email)?),
        };

        Ok(Self {
            app: AppFolder::new(app_path),
            links: Links::new(&definition.config.server.base_url),
            template_vars: loaded.template_vars,
            definition,
            storage,
            mailer,
        })
    }

    pub fn definition(&self) -> &AppDefinition {
        &self.definition
    }

    pub fn app(&self) -> &AppFolder {
        &self.app
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn template_vars(&self) -> &TemplateVars {
        &self.template_vars
    }

    pub(crate) fn endpoint(&self, name: &str) -> EngineResult<&Endpoint> {
        self.definition
            .endpoint(name)
            .ok_or_else(|| EngineError::UnknownEndpoint(name.to_string()))
    }

    /// Resolves `self` and `user` destinations to addresses.
    pub fn convert_email(&self, destination: Option<&Destination>, uid: &str) -> EngineResult<Option<String>> {
        Ok(match destination {
            None => None,
            Some(Destination::System) => Some(self.definition.config.email.address.clone()),
            Some(Destination::User) => Some(self.storage.user_email(uid)?),
            Some(Destination::Address(address)) => Some(address.to_string()),
        })
    }

    fn base_context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        extend_context(&mut context, &self.template_vars);
        context
    }

    /// Context for actions and conditions of `endpoint`.
    fn action_context(&self, uid: &str, endpoint: &str, form: Option<&Map<String, Value>>, hcsf: &str) -> EngineResult<Map<String, Value>> {
        let mut context = self.base_context();
        let current = self.storage.user_retrieve_all_current(uid, &[])?;
        let mut previous = current.clone();
        previous.remove(endpoint);
        context.extend(current);

        context.insert("form".into(), Value::Object(form.cloned().unwrap_or_default()));
        context.insert("previous".into(), Value::Object(previous));
        context.insert("endpoint".into(), json!(endpoint));
        context.insert("uid".into(), json!(uid));
        context.insert("user_email".into(), json!(self.storage.user_email(uid)?));
        context.insert("hcsf".into(), json!(hcsf));
        context.insert("link".into(), json!(self.links.user_link(uid)));
        Ok(context)
    }

    fn insert_document_links(&self, context: &mut Map<String, Value>, document: &Document, uid: &str, hcsf: &str) {
        for (key, target) in document.links() {
            context.insert(key.to_string(), json!(self.links.view_link(uid, hcsf, target)));
        }
    }

    async fn send(&self, to: String, cc: Option<String>, bcc: Option<String>, subject: &str, html: String) -> EngineResult<()> {
        let prefix = self.definition.config.email.subject.trim();
        let subject = if prefix.is_empty() {
            subject.to_string()
        } else {
            format!("{prefix} {subject}")
        };
        self.mailer
            .send(OutgoingEmail {
                from: self.definition.config.email.address.clone(),
                to,
                cc,
                bcc,
                subject,
                html,
            })
            .await?;
        Ok(())
    }

    async fn resolve_and_send(
        &self,
        uid: &str,
        destination: &Destination,
        cc: Option<&Destination>,
        bcc: Option<&Destination>,
        subject: &str,
        html: String,
    ) -> EngineResult<()> {
        let to = self
            .convert_email(Some(destination), uid)?
            .unwrap_or_else(|| self.definition.config.email.address.clone());
        let cc = self.convert_email(cc, uid)?;
        let bcc = self.convert_email(bcc, uid)?;
        self.send(to, cc, bcc, subject, html).await
    }

    /// Sends an e-mail rendered from `emails/<template>`.
    pub async fn action_email(&self, uid: &str, action: &EmailAction, context: &Map<String, Value>) -> EngineResult<()> {
        let document = self.app.email(&action.template)?;
        let mut context = context.clone();
        let hcsf = context.get("hcsf").and_then(Value::as_str).unwrap_or_default().to_string();
        self.insert_document_links(&mut context, &document, uid, &hcsf);

        let html = self.app.render_body(&document, &context)?;
        let subject = self
            .app
            .render_text(&format!("{}:subject", action.template), document.subject(), &context)?;
        debug!(uid, template = %action.template, "sending e-mail action");
        self.resolve_and_send(uid, &action.destination, action.cc.as_ref(), action.bcc.as_ref(), &subject, html)
            .await
    }

    /// Sends the submitted form as a table.
    pub async fn action_email_form(&self, uid: &str, endpoint: &str, action: &EmailFormAction, context: &Map<String, Value>) -> EngineResult<()> {
        let html = self
            .app
            .environment()
            .render_named_str("plain_form.html", PLAIN_FORM_EMAIL, context)
            .map_err(EngineError::template("the form e-mail"))?;
        self.resolve_and_send(uid, &action.destination, action.cc.as_ref(), action.bcc.as_ref(), endpoint, html)
            .await
    }

    async fn run_actions(&self, uid: &str, endpoint: &str, actions: &[Action], context: &Map<String, Value>) -> EngineResult<()> {
        for action in actions {
            let condition = action.condition();
            let enabled = evaluate_condition(condition, context).map_err(EngineError::template(format!("condition '{condition}'")))?;
            if !enabled {
                debug!(uid, endpoint, kind = action.kind(), condition, "action skipped");
                continue;
            }
            match action {
                Action::Email(email) => self.action_email(uid, email, context).await?,
                Action::EmailForm(email_form) => self.action_email_form(uid, endpoint, email_form, context).await?,
            }
        }
        Ok(())
    }

    /// First matching `conditional_next_state`, else `next_state` when set.
    pub fn next_state(&self, endpoint: &Endpoint, context: &Map<String, Value>) -> EngineResult<Option<String>> {
        for candidate in &endpoint.conditional_next_state {
            let matched = evaluate_condition(&candidate.condition, context)
                .map_err(EngineError::template(format!("condition '{}'", candidate.condition)))?;
            if matched {
                return Ok(Some(candidate.next_state.clone()));
            }
        }
        Ok(Some(endpoint.next_state.clone()).filter(|state| !state.is_empty()))
    }

    /// Handles `/view/<uid>` (no `hcsf`) and `/view/<uid>/<hcsf>/<endpoint>`.
    pub async fn handle_view(
        &self,
        uid: &str,
        hcsf: Option<&str>,
        endpoint: Option<&str>,
        submission: Option<Submission>,
    ) -> EngineResult<ViewOutcome> {
        let endpoint = match (hcsf, endpoint) {
            (Some(hcsf), Some(endpoint)) => match self.storage.statehash_for(uid) {
                Ok(current) if current == hcsf => endpoint.to_string(),
                Ok(_) => return Ok(ViewOutcome::Denied(AccessDenied::StaleLink)),
                Err(StorageError::UnknownUser { .. }) => return Ok(ViewOutcome::Denied(AccessDenied::InvalidLink)),
                Err(error) => return Err(error.into()),
            },
            _ => match self.storage.user_state(uid) {
                Ok(state) => state.state,
                Err(StorageError::UnknownUser { .. }) => return Ok(ViewOutcome::Denied(AccessDenied::InvalidLink)),
                Err(error) => return Err(error.into()),
            },
        };
        self.view(uid, &endpoint, submission).await
    }

    /// Shows or completes `endpoint_name` for a user.
    pub async fn view(&self, uid: &str, endpoint_name: &str, submission: Option<Submission>) -> EngineResult<ViewOutcome> {
        let endpoint = self.endpoint(endpoint_name)?;
        let mut stored_at = None;
        let mut form_data = None;

        match endpoint.form_action {
            None => {
                // record the visit as a transition to this endpoint
                let marker = self.storage.user_store(uid, endpoint_name, operator_marker())?;
                self.storage
                    .begin_transition(uid, Some(endpoint_name), StateOrigin::new(endpoint_name, marker.timestamp))?
                    .commit()?;
                stored_at = Some(marker.timestamp);
            }
            Some(form_action) => {
                let document = self.app.form(endpoint_name)?;
                let Some(submission) = submission else {
                    let mut values = self.prefill(uid, endpoint)?;
                    match self.storage.user_retrieve(uid, endpoint_name) {
                        Ok(entry) => values.extend(entry.content),
                        Err(StorageError::NotFound { .. }) => {}
                        Err(error) => warn!(uid, endpoint = endpoint_name, %error, "could not load stored form data"),
                    }
                    return Ok(ViewOutcome::Form(self.form_page(uid, endpoint_name, endpoint, &document, &values, &[])?));
                };

                let validated = match validate(&document.fields, &submission) {
                    Ok(validated) => validated,
                    Err(errors) => {
                        let values = submission.values_json();
                        return Ok(ViewOutcome::Form(self.form_page(uid, endpoint_name, endpoint, &document, &values, &errors)?));
                    }
                };
                let data = validated.into_json(|file| {
                    self.storage
                        .save_upload(&file.file_name, &file.bytes)
                        .map(|file_id| self.links.file_url(&file_id))
                })?;
                if form_action == FormAction::Store {
                    stored_at = Some(self.storage.user_store(uid, endpoint_name, data.clone())?.timestamp);
                }
                form_data = Some(data);
            }
        }

        let mut context = self.action_context(uid, endpoint_name, form_data.as_ref(), "")?;
        let next_state = self.next_state(endpoint, &context)?;
        let origin = StateOrigin::new(endpoint_name, stored_at.unwrap_or_else(Timestamp::now));
        let transition = self.storage.begin_transition(uid, next_state.as_deref(), origin)?;
        context.insert("hcsf".into(), json!(transition.hcsf()));

        self.run_actions(uid, endpoint_name, &endpoint.actions, &context).await?;
        transition.commit()?;
        info!(uid, endpoint = endpoint_name, next_state = ?next_state, "endpoint completed");

        Ok(match self.render_page(endpoint_name, Map::new())? {
            Some(html) => ViewOutcome::Page {
                endpoint: endpoint_name.to_string(),
                html,
            },
            None => ViewOutcome::Done,
        })
    }

    /// Values copied from earlier submissions, per `form_prefill`.
    fn prefill(&self, uid: &str, endpoint: &Endpoint) -> EngineResult<Map<String, Value>> {
        let mut values = Map::new();
        for (field, reference) in &endpoint.form_prefill {
            let Some((source, key)) = reference.split_once('.') else {
                return Err(EngineError::InvalidPrefill(reference.clone()));
            };
            match self.storage.user_retrieve(uid, source) {
                Ok(entry) => {
                    if let Some(value) = entry.content.get(key) {
                        values.insert(field.clone(), value.clone());
                    }
                }
                Err(StorageError::NotFound { .. }) => debug!(uid, reference, "nothing to prefill from"),
                Err(error) => return Err(error.into()),
            }
        }
        Ok(values)
    }

    fn form_page(
        &self,
        uid: &str,
        endpoint_name: &str,
        endpoint: &Endpoint,
        document: &Document,
        values: &Map<String, Value>,
        errors: &[FieldError],
    ) -> EngineResult<FormPage> {
        let user_email = self.storage.user_email(uid)?;
        let hcsf = self.storage.statehash_for(uid)?;
        let mut context = self.base_context();
        context.insert("uid".into(), json!(uid));
        context.insert("user_email".into(), json!(user_email));
        context.insert("endpoint".into(), json!(endpoint_name));
        self.insert_document_links(&mut context, document, uid, &hcsf);

        Ok(FormPage {
            endpoint: endpoint_name.to_string(),
            description: endpoint.description.clone(),
            intro_html: self.app.render_body(document, &context)?,
            fields: field_views(&document.fields, values, false, errors),
            errors: errors.iter().map(ToString::to_string).collect(),
            user_email,
            has_files: document
                .fields
                .values()
                .any(|field| field.kind == hymie_registry::FieldKind::File),
        })
    }

    /// Renders `pages/<name>.md`; `None` when the page does not exist.
    pub fn render_page(&self, name: &str, extra: Map<String, Value>) -> EngineResult<Option<String>> {
        let document = match self.app.page(name) {
            Ok(document) => document,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let mut context = self.base_context();
        context.extend(extra);
        Ok(Some(self.app.render_body(&document, &context)?))
    }

    /// The start page with its registration and recovery links.
    pub fn render_start_page(&self) -> EngineResult<Option<String>> {
        let mut extra = Map::new();
        extra.insert("link_register".into(), json!(self.links.register_link()));
        extra.insert("link_recover".into(), json!(self.links.recover_link()));
        self.render_page(START_PAGE, extra)
    }

    async fn send_welcome(&self, uid: &str, origin: &str) -> EngineResult<()> {
        let hcsf = self.storage.statehash_for(uid)?;
        let context = self.action_context(uid, origin, None, &hcsf)?;
        self.action_email(uid, &EmailAction::welcome(), &context).await
    }

    /// Registers an address and e-mails the access link.
    pub async fn register(&self, email: &str) -> EngineResult<RegisterOutcome> {
        if self.storage.is_registered(email) {
            return Ok(RegisterOutcome::AlreadyRegistered {
                recover_link: self.links.recover_link_for(email),
            });
        }
        let uid = match self.storage.register(email, &self.definition.metadata.first_endpoint) {
            Ok(uid) => uid,
            Err(StorageError::AlreadyRegistered { .. }) => {
                return Ok(RegisterOutcome::AlreadyRegistered {
                    recover_link: self.links.recover_link_for(email),
                });
            }
            Err(error) => return Err(error.into()),
        };
        self.send_welcome(&uid, "register").await?;
        Ok(RegisterOutcome::Registered { email: email.to_string() })
    }

    /// E-mails the access link again.
    pub async fn recover(&self, email: &str) -> EngineResult<()> {
        let uid = self.storage.hash_for(email);
        self.send_welcome(&uid, "recover").await
    }
}

fn operator_marker() -> Map<String, Value> {
    let mut marker = Map::new();
    marker.insert(OPERATOR_MARKER.into(), json!("admin"));
    marker
}
