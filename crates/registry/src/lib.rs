//! Loading of hymie app folders.
//!
//! An app folder holds the layered YAML definition plus the markdown documents
//! the workflow shows and sends: `pages/`, `emails/` and `forms/`.

pub mod config;
pub mod document;
pub mod forms;

pub use config::{DefinitionError, LoadedDefinition, TemplateVars, load_definition, merge_values};
pub use document::{AppFolder, Document, DocumentError, DocumentKind, markdown_to_html};
pub use forms::{
    ChoiceView, FieldError, FieldKind, FieldSpec, FieldValue, FieldView, FormFields, MAX_FILE_BYTES, Submission, UploadedFile,
    ValidatedForm, field_views, validate,
};
