//! Pages reached by users: start page, registration, recovery, downloads and workflow views.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hymie_engine::{EngineError, RegisterOutcome, ViewOutcome};
use hymie_registry::Submission;
use hymie_types::schema::validate_email;
use indexmap::IndexMap;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::ServerError;
use crate::extract::SubmittedForm;
use crate::render::{Message, message_page, render};
use crate::state::AppState;

const REGISTER_TITLE: &str = "Register";
const RECOVER_TITLE: &str = "Recover your access link";
const RECOVER_PATH: &str = "/recover";
const EMAIL_FIELD: &str = "e_mail";

const MSG_ALREADY_REGISTERED: &str = "That e-mail address is already registered.";
const MSG_NOT_REGISTERED: &str = "That e-mail address is not registered.";
const MSG_ERROR_REGISTERING: &str = "There was a problem creating the new user.";
const MSG_ERROR_SENDING: &str = "There was a problem sending the e-mail.";
const MSG_DONE: &str = "Done.";

fn email_sent(email: &str) -> String {
    format!("An e-mail was sent to {email}. Please check your inbox.")
}

pub async fn index(State(state): State<AppState>) -> Result<Response, ServerError> {
    match state.hymie().render_start_page()? {
        Some(content) => Ok(render(&state, "simple.html", json!({ "content": content }))?.into_response()),
        None => {
            warn!("the app has no start page");
            Ok(message_page(&state, StatusCode::OK, &state.hymie().definition().metadata.description, &[]))
        }
    }
}

fn email_form(state: &AppState, action: &str, title: &str, e_mail: &str, messages: &[Message]) -> Result<Response, ServerError> {
    let context = json!({
        "form_title": title,
        "action": action,
        "csrf_token": state.csrf().token(action),
        "e_mail": e_mail,
        "messages": messages,
    });
    Ok(render(state, "register.html", context)?.into_response())
}

fn token_is_valid(state: &AppState, scope: &str, form: &SubmittedForm) -> bool {
    form.csrf_token
        .as_deref()
        .is_some_and(|token| state.csrf().verify(scope, token))
}

/// The address typed in the registration form, or the messages explaining why it is not acceptable.
fn submitted_email(state: &AppState, scope: &str, form: &SubmittedForm) -> Result<String, Vec<Message>> {
    if !token_is_valid(state, scope, form) {
        return Err(vec![Message::danger(ServerError::Csrf.to_string())]);
    }
    let email = form.submission.value(EMAIL_FIELD).unwrap_or_default().trim();
    if email.is_empty() {
        Err(vec![Message::danger("Error in the e-mail field - This field is required.")])
    } else if !validate_email(email) {
        Err(vec![Message::danger("Error in the e-mail field - Invalid email address.")])
    } else {
        Ok(email.to_string())
    }
}

pub async fn register_form(State(state): State<AppState>, uri: Uri) -> Result<Response, ServerError> {
    email_form(&state, uri.path(), REGISTER_TITLE, "", &[])
}

pub async fn register(State(state): State<AppState>, uri: Uri, form: SubmittedForm) -> Result<Response, ServerError> {
    let action = uri.path();
    let typed = form.submission.value(EMAIL_FIELD).unwrap_or_default();
    let email = match submitted_email(&state, action, &form) {
        Ok(email) => email,
        Err(messages) => return email_form(&state, action, REGISTER_TITLE, typed, &messages),
    };

    match state.hymie().register(&email).await {
        Ok(RegisterOutcome::Registered { email }) => Ok(message_page(&state, StatusCode::OK, &email_sent(&email), &[])),
        Ok(RegisterOutcome::AlreadyRegistered { recover_link }) => {
            let message = Message::danger(MSG_ALREADY_REGISTERED).with_link(recover_link, "Recover the access link");
            email_form(&state, action, REGISTER_TITLE, typed, &[message])
        }
        Err(EngineError::Mail(error)) => {
            error!(%error, "while trying to send the welcome e-mail");
            email_form(&state, action, REGISTER_TITLE, typed, &[Message::danger(MSG_ERROR_SENDING)])
        }
        Err(error) => {
            error!(%error, "while trying to register an e-mail address");
            email_form(&state, action, REGISTER_TITLE, typed, &[Message::danger(MSG_ERROR_REGISTERING)])
        }
    }
}

pub async fn recover_form(State(state): State<AppState>) -> Result<Response, ServerError> {
    email_form(&state, RECOVER_PATH, RECOVER_TITLE, "", &[])
}

pub async fn recover(State(state): State<AppState>, form: SubmittedForm) -> Result<Response, ServerError> {
    match submitted_email(&state, RECOVER_PATH, &form) {
        Ok(email) => send_recovery(&state, &email).await,
        Err(messages) => email_form(
            &state,
            RECOVER_PATH,
            RECOVER_TITLE,
            form.submission.value(EMAIL_FIELD).unwrap_or_default(),
            &messages,
        ),
    }
}

pub async fn recover_email(State(state): State<AppState>, Path(email): Path<String>) -> Result<Response, ServerError> {
    send_recovery(&state, email.trim()).await
}

async fn send_recovery(state: &AppState, email: &str) -> Result<Response, ServerError> {
    if !state.hymie().storage().is_registered(email) {
        let message = Message::danger(MSG_NOT_REGISTERED).with_link("/register", "Register");
        return email_form(state, RECOVER_PATH, RECOVER_TITLE, email, &[message]);
    }
    match state.hymie().recover(email).await {
        Ok(()) => {
            info!(email, "access link sent again");
            Ok(message_page(state, StatusCode::OK, &email_sent(email), &[]))
        }
        Err(error) => {
            error!(%error, "while trying to send the recovery e-mail");
            email_form(state, RECOVER_PATH, RECOVER_TITLE, email, &[Message::danger(MSG_ERROR_SENDING)])
        }
    }
}

/// Downloads an uploaded file under its original name.
pub async fn file(State(state): State<AppState>, Path(file_id): Path<String>) -> Result<Response, ServerError> {
    let path = state.hymie().storage().upload_path(&file_id).map_err(EngineError::from)?;
    let bytes = tokio::fs::read(&path).await.map_err(|source| ServerError::Io {
        what: file_id.clone(),
        source,
    })?;
    let download_name = file_id.split_once('_').map_or(file_id.as_str(), |(_, name)| name);
    let headers = [
        (CONTENT_TYPE, "application/octet-stream".to_string()),
        (CONTENT_DISPOSITION, format!("attachment; filename=\"{download_name}\"")),
    ];
    Ok((headers, bytes).into_response())
}

pub async fn view_current(State(state): State<AppState>, Path(uid): Path<String>, uri: Uri) -> Response {
    show(&state, &uid, None, None, None, uri.path()).await
}

pub async fn submit_current(State(state): State<AppState>, Path(uid): Path<String>, uri: Uri, form: SubmittedForm) -> Response {
    if !token_is_valid(&state, uri.path(), &form) {
        return message_page(&state, StatusCode::BAD_REQUEST, &ServerError::Csrf.to_string(), &[]);
    }
    show(&state, &uid, None, None, Some(form.submission), uri.path()).await
}

pub async fn view_endpoint(
    State(state): State<AppState>,
    Path((uid, hcsf, endpoint)): Path<(String, String, String)>,
    uri: Uri,
) -> Response {
    show(&state, &uid, Some(&hcsf), Some(&endpoint), None, uri.path()).await
}

pub async fn submit_endpoint(
    State(state): State<AppState>,
    Path((uid, hcsf, endpoint)): Path<(String, String, String)>,
    uri: Uri,
    form: SubmittedForm,
) -> Response {
    if !token_is_valid(&state, uri.path(), &form) {
        return message_page(&state, StatusCode::BAD_REQUEST, &ServerError::Csrf.to_string(), &[]);
    }
    show(&state, &uid, Some(&hcsf), Some(&endpoint), Some(form.submission), uri.path()).await
}

async fn show(
    state: &AppState,
    uid: &str,
    hcsf: Option<&str>,
    endpoint: Option<&str>,
    submission: Option<Submission>,
    action: &str,
) -> Response {
    let outcome = match state.hymie().handle_view(uid, hcsf, endpoint, submission).await {
        Ok(outcome) => outcome,
        Err(error) => {
            error!(uid, endpoint = ?endpoint, %error, "view failed");
            let error = ServerError::from(error);
            return message_page(
                state,
                error.status(),
                "The request could not be completed.",
                &[Message::danger(error.to_string())],
            );
        }
    };

    let rendered = match outcome {
        ViewOutcome::Denied(denied) => return message_page(state, StatusCode::FORBIDDEN, denied.message(), &[]),
        ViewOutcome::Form(page) => {
            let messages: Vec<_> = page.errors.iter().map(Message::danger).collect();
            render(
                state,
                "form.html",
                json!({
                    "form": page,
                    "action": action,
                    "csrf_token": state.csrf().token(action),
                    "messages": messages,
                }),
            )
        }
        ViewOutcome::Page { html, .. } => render(state, "simple.html", json!({ "content": html })),
        ViewOutcome::Done => return message_page(state, StatusCode::OK, MSG_DONE, &[]),
    };
    match rendered {
        Ok(html) => html.into_response(),
        Err(error) => error.into_response(),
    }
}

pub async fn endpoint_descriptions(State(state): State<AppState>) -> Json<IndexMap<String, String>> {
    Json(state.hymie().endpoint_descriptions())
}
