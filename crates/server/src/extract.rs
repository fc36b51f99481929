//! Form bodies, urlencoded or multipart.

use std::collections::HashMap;

use axum::Form;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use hymie_registry::{Submission, UploadedFile};
use tracing::debug;

use crate::csrf::CSRF_FIELD;
use crate::render::too_big_page;
use crate::state::AppState;

/// A submitted form and its token.
#[derive(Debug, Clone, Default)]
pub struct SubmittedForm {
    pub submission: Submission,
    pub csrf_token: Option<String>,
}

fn body_error(state: &AppState, status: StatusCode, message: String) -> Response {
    debug!(%status, %message, "rejected form body");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        too_big_page(state)
    } else {
        (status, message).into_response()
    }
}

impl FromRequest<AppState> for SubmittedForm {
    type Rejection = Response;

    async fn from_request(request: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        let mut submission = Submission::default();
        if is_multipart {
            let mut multipart = Multipart::from_request(request, state)
                .await
                .map_err(|rejection| body_error(state, rejection.status(), rejection.body_text()))?;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|error| body_error(state, error.status(), error.body_text()))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                match field.file_name().map(str::to_string) {
                    Some(file_name) => {
                        let bytes = field
                            .bytes()
                            .await
                            .map_err(|error| body_error(state, error.status(), error.body_text()))?;
                        submission.files.insert(
                            name,
                            UploadedFile {
                                file_name,
                                bytes: bytes.to_vec(),
                            },
                        );
                    }
                    None => {
                        let text = field
                            .text()
                            .await
                            .map_err(|error| body_error(state, error.status(), error.body_text()))?;
                        submission.values.insert(name, text);
                    }
                }
            }
        } else {
            let Form(values) = Form::<HashMap<String, String>>::from_request(request, state)
                .await
                .map_err(|rejection| body_error(state, rejection.status(), rejection.body_text()))?;
            submission.values = values;
        }

        let csrf_token = submission.values.get(CSRF_FIELD).cloned();
        Ok(Self { submission, csrf_token })
    }
}
