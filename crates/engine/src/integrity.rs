//! Checks an app for logic errors before it is served.
//!
//! Every template variable, prefill reference, link and state name used by the
//! definition must resolve to something that exists. Errors prevent serving,
//! warnings are only logged.

use std::collections::BTreeSet;

use hymie_registry::{Document, TemplateVars};
use hymie_types::{Action, Endpoint};
use hymie_util::{extract_expression_variables, extract_template_variables};
use tracing::{debug, error, warn};

use crate::context::BUILTIN_VARIABLES;
use crate::error::{EngineError, EngineResult};
use crate::workflow::{Hymie, START_PAGE, WELCOME_EMAIL};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Hymie {
    /// Runs the integrity check, logs its findings and fails when there are errors.
    pub fn ensure_integrity(&self) -> EngineResult<IntegrityReport> {
        let report = self.integrity_check();
        for message in &report.errors {
            error!("{message}");
        }
        for message in &report.warnings {
            warn!("{message}");
        }
        if report.is_ok() {
            Ok(report)
        } else {
            Err(EngineError::Integrity(report.errors.len()))
        }
    }

    /// Collects every problem of the app definition.
    pub fn integrity_check(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let definition = self.definition();

        let first = &definition.metadata.first_endpoint;
        if definition.endpoint(first).is_some() {
            debug!(first_endpoint = %first, "first endpoint found");
        } else {
            report.errors.push(format!("first_endpoint not found: {first}"));
        }

        let friendly_user_id = &definition.metadata.friendly_user_id;
        if !friendly_user_id.trim().is_empty() {
            match extract_template_variables(friendly_user_id) {
                Ok(variables) => report.errors.extend(
                    variables
                        .iter()
                        .filter_map(|variable| self.check_variable(variable).err())
                        .map(|message| format!("In friendly_user_id, {message}")),
                ),
                Err(error) => report.errors.push(format!("In friendly_user_id, invalid template: {error}")),
            }
        }

        self.check_welcome_email(&mut report);
        if let Err(error) = self.app().page(START_PAGE) {
            report.errors.push(format!("start page could not be loaded: {error}"));
        }

        for (name, endpoint) in &definition.endpoints {
            self.check_endpoint(name, endpoint, &mut report);
        }

        report
    }

    fn check_welcome_email(&self, report: &mut IntegrityReport) {
        match self.app().email(WELCOME_EMAIL) {
            Ok(document) => {
                let known_links = document_links(&document);
                if let Err(error) = self.check_email_variables("welcome e-mail", "register", &document, &known_links, report) {
                    report.errors.push(format!("In the welcome e-mail, invalid template: {error}"));
                }
            }
            Err(error) => report.errors.push(format!("welcome e-mail could not be loaded: {error}")),
        }
    }

    fn check_endpoint(&self, name: &str, endpoint: &Endpoint, report: &mut IntegrityReport) {
        if name.starts_with('_') {
            report.errors.push(format!("In {name}, endpoint names cannot start with an underscore."));
        }

        if endpoint.has_form() {
            match self.app().form(name) {
                Ok(form) => {
                    for (field, reference) in &endpoint.form_prefill {
                        if !form.has_field(field) {
                            report
                                .errors
                                .push(format!("In {name}, form_prefill key refers to an unknown field: {field}"));
                        }
                        if !reference.contains('.') {
                            report.errors.push(format!(
                                "In {name}, form_prefill value must look like <endpoint>.<field>: {reference}"
                            ));
                        } else if let Err(message) = self.check_variable(reference) {
                            report.errors.push(format!("In {name}, form_prefill value {message}"));
                        }
                    }
                }
                Err(error) if error.is_not_found() => report.errors.push(format!("In {name}, form file not found")),
                Err(error) => report.errors.push(format!("In {name}, could not get form: {error}")),
            }
        }

        for action in &endpoint.actions {
            self.check_condition(name, action.condition(), report);
            if let Action::Email(email) = action {
                self.check_email_action(name, &email.template, report);
            }
        }

        match self.app().page(name) {
            Ok(_) => {}
            Err(error) if error.is_not_found() => report.errors.push(format!("In {name}, page file not found")),
            Err(error) => report.warnings.push(format!("In {name}, could not get page: {error}")),
        }

        for candidate in &endpoint.conditional_next_state {
            self.check_condition(name, &candidate.condition, report);
            if self.definition().endpoint(&candidate.next_state).is_none() {
                report.errors.push(format!(
                    "In {name}, conditional next_state points to an unknown endpoint: {}",
                    candidate.next_state
                ));
            }
        }

        let next_state = &endpoint.next_state;
        if !next_state.is_empty() && self.definition().endpoint(next_state).is_none() {
            report
                .errors
                .push(format!("In {name}, next_state points to an unknown endpoint: {next_state}"));
        }
    }

    fn check_condition(&self, name: &str, condition: &str, report: &mut IntegrityReport) {
        if condition.trim().is_empty() {
            return;
        }
        match extract_expression_variables(condition) {
            Ok(variables) => {
                for variable in &variables {
                    if let Err(message) = self.check_prefixed_variable(name, variable, &BTreeSet::new()) {
                        report.errors.push(format!("In {name}, the condition {condition} {message}"));
                    }
                }
            }
            Err(error) => report.errors.push(format!("In {name}, the condition {condition} is invalid: {error}")),
        }
    }

    fn check_email_action(&self, name: &str, template: &str, report: &mut IntegrityReport) {
        let document = match self.app().email(template) {
            Ok(document) => document,
            Err(error) if error.is_not_found() => {
                report.errors.push(format!("In {name}, e-mail template file not found {template}"));
                return;
            }
            Err(error) => {
                report.errors.push(format!("In {name}, could not get e-mail template {template}: {error}"));
                return;
            }
        };

        let known_links = document_links(&document);
        for (key, target) in document.links() {
            if self.definition().endpoint(target).is_none() {
                report.errors.push(format!(
                    "In {name}, the template {template} contains a link ({key}) to an unknown endpoint: {target}"
                ));
            }
        }

        if let Err(error) = self.check_email_variables(&format!("the template {template}"), name, &document, &known_links, report) {
            report.errors.push(format!("In {name}, the template {template} is invalid: {error}"));
        }
    }

    fn check_email_variables(
        &self,
        label: &str,
        name: &str,
        document: &Document,
        known_links: &BTreeSet<String>,
        report: &mut IntegrityReport,
    ) -> Result<(), minijinja::Error> {
        for variable in extract_template_variables(document.subject())? {
            if let Err(message) = self.check_prefixed_variable(name, &variable, known_links) {
                report.errors.push(format!("In {name}, {label} subject {message}"));
            }
        }
        for variable in extract_template_variables(&document.body)? {
            if let Err(message) = self.check_prefixed_variable(name, &variable, known_links) {
                report.errors.push(format!("In {name}, {label} {message}"));
            }
        }
        Ok(())
    }

    /// Resolves `form.x` against the endpoint's own form and `previous.a.b` as `a.b`.
    fn check_prefixed_variable(&self, name: &str, variable: &str, known_links: &BTreeSet<String>) -> Result<(), String> {
        if let Some(field) = variable.strip_prefix("form.") {
            self.check_variable(&format!("{name}.{field}"))
        } else if let Some(path) = variable.strip_prefix("previous.") {
            self.check_variable(path)
        } else if known_links.contains(variable) {
            Ok(())
        } else {
            self.check_variable(variable)
        }
    }

    /// A variable resolves when it is a built-in, a template var, an endpoint
    /// name or `<form>.<field>` of a loadable form.
    fn check_variable(&self, variable: &str) -> Result<(), String> {
        if BUILTIN_VARIABLES.contains(&variable) || TemplateVars::contains(variable) || self.definition().endpoint(variable).is_some() {
            return Ok(());
        }

        let mut parts = variable.split('.');
        let (Some(form_name), Some(field)) = (parts.next(), parts.next()) else {
            return Err(format!("contains an unknown variable: {variable}"));
        };
        if BUILTIN_VARIABLES.contains(&form_name) || TemplateVars::contains(form_name) {
            return Ok(());
        }

        match self.app().form(form_name) {
            Ok(form) if form.has_field(field) => Ok(()),
            Ok(_) => Err(format!("contains an unknown variable: {variable}")),
            Err(error) if error.is_not_found() => Err(format!("refers to an unavailable form: {form_name}")),
            Err(error) => Err(format!("could not be loaded. {form_name}: {error}")),
        }
    }
}

fn document_links(document: &Document) -> BTreeSet<String> {
    document.links().map(|(key, _)| key.to_string()).collect()
}
