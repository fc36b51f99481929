//! Administrator pages. Every handler requires [`AdminUser`].

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{Html, Redirect};
use hymie_engine::AdminEntry;
use hymie_types::Timestamp;
use hymie_util::pprint_timestamp;
use serde_json::{Value, json};
use tracing::debug;

use crate::auth::AdminUser;
use crate::error::ServerError;
use crate::render::render;
use crate::state::AppState;

type Crumbs = Vec<(String, String)>;

fn users_crumbs() -> Crumbs {
    vec![
        ("Admin access".to_string(), "/admin".to_string()),
        ("Users".to_string(), "/admin/users".to_string()),
    ]
}

fn history_crumbs(uid: &str, email: &str) -> Crumbs {
    let mut crumbs = users_crumbs();
    crumbs.push((format!("History of {email}"), format!("/admin/history/{uid}")));
    crumbs
}

pub async fn admin_root(_admin: AdminUser) -> Redirect {
    Redirect::to("/admin/users")
}

pub async fn users(_admin: AdminUser, State(state): State<AppState>) -> Result<Html<String>, ServerError> {
    render(&state, "admin/users.html", json!({ "crumbs": users_crumbs() }))
}

/// `{"data": [[friendly id, e-mail, last change, state, uid], ...]}`
pub async fn users_data(_admin: AdminUser, State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    let rows: Vec<Value> = state
        .hymie()
        .users_state()?
        .into_iter()
        .map(|user| {
            json!([
                user.friendly_id,
                user.email,
                pprint_timestamp(user.timestamp),
                user.state,
                user.uid
            ])
        })
        .collect();
    Ok(Json(json!({ "data": rows })))
}

pub async fn history(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Html<String>, ServerError> {
    let summary = state.hymie().admin_view(&uid)?;
    debug!(admin = %admin, uid = %uid, "showing user history");
    let crumbs = history_crumbs(&uid, &summary.email);
    render(&state, "admin/history.html", json!({ "summary": summary, "crumbs": crumbs }))
}

pub async fn history_data(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Value>, ServerError> {
    Ok(Json(json!({ "data": state.hymie().history_rows(&uid)? })))
}

pub async fn latest_entry(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path((uid, endpoint)): Path<(String, String)>,
) -> Result<Html<String>, ServerError> {
    let entry = state.hymie().admin_entry(&uid, &endpoint, None)?;
    entry_page(&state, &uid, entry)
}

pub async fn entry(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path((uid, endpoint, timestamp)): Path<(String, String, String)>,
) -> Result<Html<String>, ServerError> {
    let timestamp: Timestamp = timestamp.parse().map_err(|_| ServerError::NotFound)?;
    let entry = state.hymie().admin_entry(&uid, &endpoint, Some(timestamp))?;
    entry_page(&state, &uid, entry)
}

fn entry_page(state: &AppState, uid: &str, entry: AdminEntry) -> Result<Html<String>, ServerError> {
    let mut crumbs = history_crumbs(uid, &entry.summary.email);
    crumbs.push((
        format!("Form `{}`", entry.endpoint),
        format!("/admin/history/{uid}/{}/{}", entry.endpoint, entry.timestamp),
    ));
    let template = if entry.fields.is_some() {
        "admin/display_form.html"
    } else {
        "admin/noform.html"
    };
    render(
        state,
        template,
        json!({ "summary": &entry.summary, "entry": &entry, "crumbs": crumbs }),
    )
}
