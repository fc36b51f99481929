//! Site templates and page rendering.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use hymie_engine::context::extend_context;
use minijinja::Environment;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::ServerError;
use crate::state::AppState;

const TEMPLATES: [(&str, &str); 12] = [
    ("base.html", include_str!("templates/base.html")),
    ("simple.html", include_str!("templates/simple.html")),
    ("form.html", include_str!("templates/form.html")),
    ("register.html", include_str!("templates/register.html")),
    ("message.html", include_str!("templates/message.html")),
    ("toobig.html", include_str!("templates/toobig.html")),
    ("admin/base.html", include_str!("templates/admin/base.html")),
    ("admin/status.html", include_str!("templates/admin/status.html")),
    ("admin/users.html", include_str!("templates/admin/users.html")),
    ("admin/history.html", include_str!("templates/admin/history.html")),
    ("admin/display_form.html", include_str!("templates/admin/display_form.html")),
    ("admin/noform.html", include_str!("templates/admin/noform.html")),
];

/// Environment holding the embedded site templates.
pub fn site_environment() -> Result<Environment<'static>, ServerError> {
    let mut environment = Environment::new();
    for (name, source) in TEMPLATES {
        environment.add_template(name, source).map_err(|source| ServerError::Render {
            name: name.to_string(),
            source,
        })?;
    }
    Ok(environment)
}

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub url: String,
    pub text: String,
}

/// An alert shown above the page content.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Bootstrap alert category.
    pub category: &'static str,
    pub text: String,
    pub link: Option<Link>,
}

impl Message {
    pub fn danger(text: impl Into<String>) -> Self {
        Self {
            category: "danger",
            text: text.into(),
            link: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            category: "info",
            text: text.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.link = Some(Link {
            url: url.into(),
            text: text.into(),
        });
        self
    }
}

/// Renders a site template with the app metadata injected.
pub fn render<S: Serialize>(state: &AppState, name: &str, context: S) -> Result<Html<String>, ServerError> {
    let mut merged = Map::new();
    extend_context(&mut merged, state.hymie().template_vars());
    merged.insert("messages".into(), Value::Array(Vec::new()));
    extend_context(&mut merged, &context);

    let render_error = |source| ServerError::Render {
        name: name.to_string(),
        source,
    };
    let template = state.templates().get_template(name).map_err(render_error)?;
    Ok(Html(template.render(&merged).map_err(render_error)?))
}

/// `message.html` with a status code.
pub fn message_page(state: &AppState, status: StatusCode, message: &str, messages: &[Message]) -> Response {
    match render(state, "message.html", json!({ "message": message, "messages": messages })) {
        Ok(html) => (status, html).into_response(),
        Err(error) => error.into_response(),
    }
}

/// The "files too big" page.
pub fn too_big_page(state: &AppState) -> Response {
    let max_bytes = state.hymie().definition().config.server.max_upload_bytes;
    let max_megabytes = max_bytes.div_ceil(1024 * 1024);
    match render(state, "toobig.html", json!({ "max_upload_mb": max_megabytes })) {
        Ok(html) => (StatusCode::PAYLOAD_TOO_LARGE, html).into_response(),
        Err(error) => error.into_response(),
    }
}
