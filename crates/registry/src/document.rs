//! Markdown documents of an app folder: pages, e-mails and forms.
//!
//! A document is an optional YAML front matter block followed by a markdown
//! body. The body is a jinja template; it is rendered first (with HTML
//! auto-escaping) and the result is converted to HTML.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use minijinja::{AutoEscape, Environment};
use pulldown_cmark::{Options, Parser, html};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::forms::FormFields;

/// Number of documents kept per kind.
pub const CACHE_CAPACITY: usize = 64;

const FRONT_MATTER_FENCE: &str = "---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Page,
    Email,
    Form,
}

impl DocumentKind {
    pub fn folder(self) -> &'static str {
        match self {
            DocumentKind::Page => "pages",
            DocumentKind::Email => "emails",
            DocumentKind::Form => "forms",
        }
    }

    fn file_name(self, name: &str) -> String {
        match self {
            // e-mail names carry their own extension
            DocumentKind::Email => name.to_string(),
            DocumentKind::Page | DocumentKind::Form => format!("{name}.md"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{kind:?} file not found: {path}")]
    NotFound { kind: DocumentKind, path: PathBuf },
    #[error("invalid document name: {0}")]
    InvalidName(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid form fields in {path}: {source}")]
    Fields {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not render {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

impl DocumentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentError::NotFound { .. })
    }
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub name: String,
    /// Scalar front matter entries, such as `subject` or `link_accept`.
    pub meta: IndexMap<String, String>,
    /// Declared fields; empty for pages and e-mails.
    pub fields: FormFields,
    /// Markdown source with jinja expressions.
    pub body: String,
}

impl Document {
    /// Parses a document from its source text.
    pub fn parse(name: &str, source: &str, path: &Path) -> Result<Self, DocumentError> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let (front_matter, body) = split_front_matter(source);

        let mut document = Document {
            name: name.to_string(),
            body: body.to_string(),
            ..Document::default()
        };

        let Some(front_matter) = front_matter else {
            return Ok(document);
        };
        let value: Value = serde_yaml::from_str(front_matter).map_err(|source| DocumentError::FrontMatter {
            path: path.to_path_buf(),
            source,
        })?;
        let Value::Object(entries) = value else {
            return Ok(document);
        };

        for (key, value) in entries {
            if key == "fields" {
                document.fields = serde_json::from_value(value).map_err(|source| DocumentError::Fields {
                    path: path.to_path_buf(),
                    source,
                })?;
                continue;
            }
            let text = match value {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    debug!(document = name, key = %key, ?other, "ignoring non scalar front matter entry");
                    continue;
                }
            };
            document.meta.insert(key, text);
        }

        Ok(document)
    }

    pub fn subject(&self) -> &str {
        self.meta.get("subject").map(String::as_str).unwrap_or_default()
    }

    /// `link_<x>: <endpoint>` entries of the front matter.
    pub fn links(&self) -> impl Iterator<Item = (&str, &str)> {
        self.meta
            .iter()
            .filter(|(key, _)| key.starts_with("link"))
            .map(|(key, endpoint)| (key.as_str(), endpoint.as_str()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

fn split_front_matter(source: &str) -> (Option<&str>, &str) {
    let Some(rest) = source.strip_prefix(FRONT_MATTER_FENCE).and_then(|rest| rest.strip_prefix(['\n', '\r'])) else {
        return (None, source);
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_FENCE {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, source)
}

/// Converts CommonMark to HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    let parser = Parser::new_ext(markdown, options);
    let mut output = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut output, parser);
    output
}

/// Bounded name keyed cache. The oldest entry is evicted first.
#[derive(Debug, Default)]
struct DocumentCache {
    entries: Mutex<IndexMap<String, Arc<Document>>>,
}

impl DocumentCache {
    fn get(&self, name: &str) -> Option<Arc<Document>> {
        self.entries.lock().expect("document cache lock poisoned").get(name).cloned()
    }

    fn insert(&self, document: Arc<Document>) {
        let mut entries = self.entries.lock().expect("document cache lock poisoned");
        if entries.len() >= CACHE_CAPACITY {
            entries.shift_remove_index(0);
        }
        entries.insert(document.name.clone(), document);
    }
}

/// Access to the documents of an app folder and the jinja environment used to render them.
#[derive(Debug)]
pub struct AppFolder {
    root: PathBuf,
    environment: Environment<'static>,
    pages: DocumentCache,
    emails: DocumentCache,
    forms: DocumentCache,
}

impl AppFolder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            environment: document_environment(),
            pages: DocumentCache::default(),
            emails: DocumentCache::default(),
            forms: DocumentCache::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn environment(&self) -> &Environment<'static> {
        &self.environment
    }

    pub fn page(&self, name: &str) -> Result<Arc<Document>, DocumentError> {
        self.load(DocumentKind::Page, name)
    }

    pub fn email(&self, name: &str) -> Result<Arc<Document>, DocumentError> {
        self.load(DocumentKind::Email, name)
    }

    pub fn form(&self, name: &str) -> Result<Arc<Document>, DocumentError> {
        self.load(DocumentKind::Form, name)
    }

    fn load(&self, kind: DocumentKind, name: &str) -> Result<Arc<Document>, DocumentError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DocumentError::InvalidName(name.to_string()));
        }

        let cache = match kind {
            DocumentKind::Page => &self.pages,
            DocumentKind::Email => &self.emails,
            DocumentKind::Form => &self.forms,
        };
        if let Some(document) = cache.get(name) {
            return Ok(document);
        }

        let path = self.root.join(kind.folder()).join(kind.file_name(name));
        let source = fs::read_to_string(&path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => DocumentError::NotFound {
                kind,
                path: path.clone(),
            },
            _ => DocumentError::Io {
                path: path.clone(),
                source,
            },
        })?;

        let document = Arc::new(Document::parse(name, &source, &path)?);
        cache.insert(document.clone());
        Ok(document)
    }

    /// Renders the body of a document to HTML.
    pub fn render_body<S: Serialize>(&self, document: &Document, context: S) -> Result<String, DocumentError> {
        let markdown = self
            .environment
            .render_named_str(&format!("{}.html", document.name), &document.body, context)
            .map_err(|source| DocumentError::Render {
                name: document.name.clone(),
                source,
            })?;
        Ok(markdown_to_html(&markdown))
    }

    /// Renders a short template as plain text, without escaping.
    pub fn render_text<S: Serialize>(&self, name: &str, source: &str, context: S) -> Result<String, DocumentError> {
        self.environment
            .render_named_str(&format!("{name}.txt"), source, context)
            .map_err(|source| DocumentError::Render {
                name: name.to_string(),
                source,
            })
    }
}

fn document_environment() -> Environment<'static> {
    let mut environment = Environment::new();
    environment.set_auto_escape_callback(|name| {
        if name.ends_with(".txt") {
            AutoEscape::None
        } else {
            AutoEscape::Html
        }
    });
    environment
}
