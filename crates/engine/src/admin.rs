//! Data behind the administrator pages: user list, per-user status and history.

use hymie_registry::{FieldView, field_views};
use hymie_types::{Timestamp, UserSummary};
use hymie_util::{extract_template_variables, format_history_datetime, history_delta_label, pprint_timestamp};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::workflow::Hymie;

/// An admin button, ready to be followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminLinkView {
    pub text: String,
    /// `accept`, `reject` or `info`.
    pub kind: &'static str,
    pub tooltip: String,
    pub link: String,
}

/// Status of one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminSummary {
    pub uid: String,
    pub email: String,
    pub friendly_id: String,
    pub state: String,
    pub state_description: String,
    /// Pretty printed time of the last transition.
    pub timestamp: String,
    pub admin_links: Vec<AdminLinkView>,
    /// Whether the admin buttons should be offered.
    pub action_zone: bool,
}

/// One stored entry as seen by an administrator.
#[derive(Debug, Clone, Serialize)]
pub struct AdminEntry {
    pub summary: AdminSummary,
    pub endpoint: String,
    pub endpoint_description: String,
    /// Textual `YYYYMMDD_HHMMSS` form, used to build links.
    pub timestamp: String,
    pub pretty_timestamp: String,
    /// Read-only fields; `None` when the endpoint has no form to show.
    pub fields: Option<Vec<FieldView>>,
    pub content: Map<String, Value>,
}

/// Row of the history table: display date, endpoint and `[endpoint, timestamp]` for linking.
pub type HistoryRow = (String, String, (String, Timestamp));

impl Hymie {
    /// The admin user list. Users that cannot be read are logged and skipped.
    pub fn users_state(&self) -> EngineResult<Vec<UserSummary>> {
        let mut users = Vec::new();
        for uid in self.storage().uids()? {
            match self.user_summary(&uid) {
                Ok(summary) => users.push(summary),
                Err(error) => warn!(uid = %uid, %error, "skipping unreadable user"),
            }
        }
        Ok(users)
    }

    fn user_summary(&self, uid: &str) -> EngineResult<UserSummary> {
        let state = self.storage().user_state(uid)?;
        Ok(UserSummary {
            uid: uid.to_string(),
            friendly_id: self.friendly_user_id(uid)?,
            email: self.storage().user_email(uid)?,
            state: state.state,
            timestamp: state.timestamp,
        })
    }

    /// Renders `metadata.friendly_user_id` for a user, falling back to the e-mail.
    pub fn friendly_user_id(&self, uid: &str) -> EngineResult<String> {
        let email = self.storage().user_email(uid)?;
        let template = self.definition().metadata.friendly_user_id.as_str();
        if template.trim().is_empty() {
            return Ok(email);
        }

        match self.render_friendly_user_id(uid, template) {
            Ok(rendered) if !rendered.trim().is_empty() => Ok(rendered.trim().to_string()),
            Ok(_) => Ok(email),
            Err(error) => {
                debug!(uid, %error, "friendly user id not available");
                Ok(email)
            }
        }
    }

    fn render_friendly_user_id(&self, uid: &str, template: &str) -> EngineResult<String> {
        let variables = extract_template_variables(template).map_err(crate::EngineError::template("friendly_user_id"))?;
        let mut context = Map::new();
        for variable in &variables {
            let form = variable.split('.').next().unwrap_or(variable);
            if context.contains_key(form) {
                continue;
            }
            let entry = self.storage().user_retrieve(uid, form)?;
            context.insert(form.to_string(), Value::Object(entry.content));
        }
        Ok(self.app().render_text("friendly_user_id", template, &context)?)
    }

    fn admin_summary(&self, uid: &str) -> EngineResult<AdminSummary> {
        let email = self.storage().user_email(uid)?;
        let state = self.storage().user_state(uid)?;
        let hcsf = self.storage().statehash_for(uid)?;
        let endpoint = self.definition().endpoint(&state.state);

        let admin_links = endpoint
            .map(|endpoint| {
                endpoint
                    .admin_links
                    .iter()
                    .map(|link| AdminLinkView {
                        text: link.text.clone(),
                        kind: link.kind.as_str(),
                        tooltip: link.tooltip.clone(),
                        link: self.links().view_link(uid, &hcsf, &link.endpoint),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(AdminSummary {
            uid: uid.to_string(),
            friendly_id: self.friendly_user_id(uid)?,
            email,
            state_description: endpoint.map(|endpoint| endpoint.description.clone()).unwrap_or_default(),
            state: state.state,
            timestamp: pprint_timestamp(state.timestamp),
            admin_links,
            action_zone: true,
        })
    }

    /// Status page of a user, with the admin buttons of the current state.
    pub fn admin_view(&self, uid: &str) -> EngineResult<AdminSummary> {
        self.admin_summary(uid)
    }

    /// A stored entry of a user; the latest one when `timestamp` is `None`.
    ///
    /// Admin buttons are only offered when the entry is the one that produced
    /// the current state.
    pub fn admin_entry(&self, uid: &str, endpoint: &str, timestamp: Option<Timestamp>) -> EngineResult<AdminEntry> {
        let entry = match timestamp {
            Some(timestamp) => self.storage().user_retrieve_at(uid, endpoint, timestamp)?,
            None => self.storage().user_retrieve(uid, endpoint)?,
        };
        let state = self.storage().user_state(uid)?;
        let mut summary = self.admin_summary(uid)?;
        summary.action_zone = state
            .origin
            .as_ref()
            .is_some_and(|origin| origin.matches(endpoint, entry.timestamp));

        let fields = match self.app().form(endpoint) {
            Ok(document) if !document.fields.is_empty() => Some(field_views(&document.fields, &entry.content, true, &[])),
            Ok(_) => None,
            Err(error) => {
                debug!(endpoint, %error, "no form to display");
                None
            }
        };

        Ok(AdminEntry {
            summary,
            endpoint: endpoint.to_string(),
            endpoint_description: self
                .definition()
                .endpoint(endpoint)
                .map(|definition| definition.description.clone())
                .unwrap_or_default(),
            timestamp: entry.timestamp.to_string(),
            pretty_timestamp: pprint_timestamp(entry.timestamp),
            fields,
            content: entry.content,
        })
    }

    /// History table rows, oldest first, with the days elapsed since the previous row.
    pub fn history_rows(&self, uid: &str) -> EngineResult<Vec<HistoryRow>> {
        let mut previous = None;
        let mut rows = Vec::new();
        for entry in self.storage().user_index(uid)? {
            let label = format!(
                "{}{}",
                format_history_datetime(entry.timestamp),
                history_delta_label(previous, entry.timestamp)
            );
            previous = Some(entry.timestamp);
            rows.push((label, entry.endpoint.clone(), (entry.endpoint, entry.timestamp)));
        }
        Ok(rows)
    }

    /// `{endpoint: description}` in authoring order.
    pub fn endpoint_descriptions(&self) -> IndexMap<String, String> {
        self.definition()
            .endpoints
            .iter()
            .map(|(name, endpoint)| (name.clone(), endpoint.description.clone()))
            .collect()
    }
}
