use hymie_registry::{DefinitionError, DocumentError};
use thiserror::Error;

use crate::mailer::MailError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("could not evaluate {what}: {source}")]
    Template {
        what: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("invalid form_prefill reference '{0}', expected <endpoint>.<field>")]
    InvalidPrefill(String),
    #[error("integrity check not passed ({0} errors)")]
    Integrity(usize),
}

impl EngineError {
    pub(crate) fn template(what: impl Into<String>) -> impl FnOnce(minijinja::Error) -> EngineError {
        let what = what.into();
        move |source| EngineError::Template { what, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
