//! Form field model: declaration, validation, storage format and display.
//!
//! Fields are declared in the front matter of `forms/<name>.md`:
//!
//! ```yaml
//! fields:
//!   first_name: {label: First name, type: StringField, required: true, length: 40}
//!   kind: {label: Kind, type: SelectField, choices: [[a, Option A], [b, Option B]]}
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use hymie_types::validate_email;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Largest accepted upload per file field.
pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;

/// Submission keys that never end up in stored data.
pub const RESERVED_KEYS: [&str; 2] = ["csrf_token", "submit"];

const STORED_DATE_FORMAT: &str = "%d/%m/%y";
const INPUT_DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum FieldKind {
    String,
    TextArea,
    Email,
    Date,
    Time,
    Select,
    Radio,
    File,
}

impl From<String> for FieldKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "StringField" => FieldKind::String,
            "TextAreaField" => FieldKind::TextArea,
            "EmailField" => FieldKind::Email,
            "DateField" => FieldKind::Date,
            "TimeField" => FieldKind::Time,
            "SelectField" => FieldKind::Select,
            "RadioField" => FieldKind::Radio,
            "FileField" => FieldKind::File,
            other => {
                warn!(kind = other, "unknown field type, falling back to a string field");
                FieldKind::String
            }
        }
    }
}

/// One option of a select or radio field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawChoice")]
pub struct Choice {
    pub value: String,
    pub label: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Pair(String, String),
    Single(String),
}

impl From<RawChoice> for Choice {
    fn from(raw: RawChoice) -> Self {
        match raw {
            RawChoice::Pair(value, label) => Choice { value, label },
            RawChoice::Single(value) => Choice {
                label: value.clone(),
                value,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub default: Option<String>,
    /// Accepted file extensions, without the dot.
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub type FormFields = IndexMap<String, FieldSpec>;

/// A file received with a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Raw values received from the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub values: HashMap<String, String>,
    pub files: HashMap<String, UploadedFile>,
}

impl Submission {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Values as a JSON object, used to refill a form that failed validation.
    pub fn values_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub label: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Error in the {} field - {}", self.label, self.reason)
    }
}

/// A validated field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    File(UploadedFile),
    Empty,
}

/// Result of a successful validation, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatedForm {
    pub values: IndexMap<String, FieldValue>,
}

impl ValidatedForm {
    /// Converts to the stored representation.
    ///
    /// `store_file` persists an upload and returns the URL it can be downloaded from.
    pub fn into_json<E>(self, mut store_file: impl FnMut(&UploadedFile) -> Result<String, E>) -> Result<Map<String, Value>, E> {
        let mut data = Map::new();
        for (name, value) in self.values {
            let json = match value {
                FieldValue::Text(text) => Value::String(text),
                FieldValue::Date(date) => Value::String(date.format(STORED_DATE_FORMAT).to_string()),
                FieldValue::Time(time) => Value::String(time.format(TIME_FORMAT).to_string()),
                FieldValue::File(file) => Value::String(store_file(&file)?),
                FieldValue::Empty => Value::Null,
            };
            data.insert(name, json);
        }
        Ok(data)
    }
}

/// Validates a submission against the declared fields.
///
/// Every failing field contributes one error; the order follows the declaration.
pub fn validate(fields: &FormFields, submission: &Submission) -> Result<ValidatedForm, Vec<FieldError>> {
    let mut form = ValidatedForm::default();
    let mut errors = Vec::new();

    for (name, spec) in fields {
        let outcome = if spec.kind == FieldKind::File {
            validate_file(spec, submission.files.get(name))
        } else {
            validate_value(spec, submission.value(name).map(str::trim).unwrap_or_default())
        };
        match outcome {
            Ok(value) => {
                form.values.insert(name.clone(), value);
            }
            Err(reason) => errors.push(FieldError {
                field: name.clone(),
                label: spec.label.clone(),
                reason,
            }),
        }
    }

    if errors.is_empty() { Ok(form) } else { Err(errors) }
}

fn validate_value(spec: &FieldSpec, raw: &str) -> Result<FieldValue, String> {
    if raw.is_empty() {
        return if spec.required {
            Err("This field is required.".to_string())
        } else {
            Ok(match spec.kind {
                FieldKind::Date | FieldKind::Time => FieldValue::Empty,
                _ => FieldValue::Text(String::new()),
            })
        };
    }

    if let Some(length) = spec.length
        && matches!(spec.kind, FieldKind::String | FieldKind::TextArea | FieldKind::Radio)
        && raw.chars().count() > length
    {
        return Err(format!("Field cannot be longer than {length} characters."));
    }

    match spec.kind {
        FieldKind::Email if !validate_email(raw) => Err("Invalid email address.".to_string()),
        FieldKind::Date => parse_date(raw).map(FieldValue::Date).ok_or_else(|| "Not a valid date value.".to_string()),
        FieldKind::Time => NaiveTime::parse_from_str(raw, TIME_FORMAT)
            .map(FieldValue::Time)
            .map_err(|_| "Not a valid time value.".to_string()),
        FieldKind::Select | FieldKind::Radio if !spec.choices.iter().any(|choice| choice.value == raw) => {
            Err("Not a valid choice.".to_string())
        }
        _ => Ok(FieldValue::Text(raw.to_string())),
    }
}

fn validate_file(spec: &FieldSpec, file: Option<&UploadedFile>) -> Result<FieldValue, String> {
    let Some(file) = file.filter(|file| !file.file_name.is_empty()) else {
        return if spec.required {
            Err("This field is required.".to_string())
        } else {
            Ok(FieldValue::Empty)
        };
    };

    if file.bytes.len() > MAX_FILE_BYTES {
        return Err(format!("File must be between 0 and {MAX_FILE_BYTES} bytes."));
    }

    if !spec.allowed.is_empty() {
        let extension = file
            .file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
            .unwrap_or_default();
        if !spec.allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(&extension)) {
            return Err(spec
                .description
                .clone()
                .unwrap_or_else(|| format!("File does not have an approved extension: {}", spec.allowed.join(", "))));
        }
    }

    Ok(FieldValue::File(file.clone()))
}

/// Accepts the browser date input layout and the stored layout.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, INPUT_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(raw, STORED_DATE_FORMAT))
        .ok()
}

/// Everything a template needs to draw one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub name: String,
    pub label: String,
    /// `text`, `textarea`, `email`, `date`, `time`, `select`, `radio`, `file` or `link`.
    pub widget: &'static str,
    pub required: bool,
    pub value: String,
    pub choices: Vec<ChoiceView>,
    pub description: Option<String>,
    pub read_only: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceView {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// Builds the field views of a form filled with `values`.
///
/// In read-only mode file fields become links and dates or times are shown as
/// stored; every field is disabled.
pub fn field_views(fields: &FormFields, values: &Map<String, Value>, read_only: bool, errors: &[FieldError]) -> Vec<FieldView> {
    fields
        .iter()
        .map(|(name, spec)| {
            let stored = values.get(name).map(display_value).or_else(|| spec.default.clone()).unwrap_or_default();
            let value = match spec.kind {
                FieldKind::Date if !read_only => parse_date(&stored)
                    .map(|date| date.format(INPUT_DATE_FORMAT).to_string())
                    .unwrap_or_default(),
                FieldKind::File if !read_only => String::new(),
                _ => stored,
            };
            let widget = match (spec.kind, read_only) {
                (FieldKind::File, true) => "link",
                (FieldKind::Date | FieldKind::Time, true) => "text",
                (FieldKind::String, _) => "text",
                (FieldKind::TextArea, _) => "textarea",
                (FieldKind::Email, _) => "email",
                (FieldKind::Date, _) => "date",
                (FieldKind::Time, _) => "time",
                (FieldKind::Select, _) => "select",
                (FieldKind::Radio, _) => "radio",
                (FieldKind::File, _) => "file",
            };
            let choices = spec
                .choices
                .iter()
                .map(|choice| ChoiceView {
                    value: choice.value.clone(),
                    label: choice.label.clone(),
                    selected: choice.value == value,
                })
                .collect();
            FieldView {
                name: name.clone(),
                label: spec.label.clone(),
                widget,
                required: spec.required,
                value,
                choices,
                description: spec.description.clone(),
                read_only,
                errors: errors.iter().filter(|error| &error.field == name).map(|error| error.reason.clone()).collect(),
            }
        })
        .collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FormFields {
        let yaml = r#"
first_name: {label: First name, type: StringField, required: true, length: 5}
email: {label: E-mail, type: EmailField}
birthday: {label: Birthday, type: DateField}
arrival: {label: Arrival, type: TimeField}
kind: {label: Kind, type: SelectField, choices: [[a, Option A], b]}
cv: {label: CV, type: FileField, allowed: [pdf]}
notes: {label: Notes, type: MarkdownField}
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        serde_json::from_value(value).unwrap()
    }

    fn submission(pairs: &[(&str, &str)]) -> Submission {
        Submission {
            values: pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect(),
            files: HashMap::new(),
        }
    }

    #[test]
    fn parses_choices_and_unknown_kinds() {
        let fields = fields();
        assert_eq!(fields["kind"].choices[0].label, "Option A");
        assert_eq!(fields["kind"].choices[1].value, "b");
        assert_eq!(fields["kind"].choices[1].label, "b");
        assert_eq!(fields["notes"].kind, FieldKind::String);
    }

    #[test]
    fn reports_each_failing_field() {
        let errors = validate(&fields(), &submission(&[("email", "nope"), ("kind", "z")])).unwrap_err();
        let messages: Vec<_> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            [
                "Error in the First name field - This field is required.",
                "Error in the E-mail field - Invalid email address.",
                "Error in the Kind field - Not a valid choice.",
            ]
        );
    }

    #[test]
    fn enforces_maximum_length() {
        let errors = validate(&fields(), &submission(&[("first_name", "Josephine")])).unwrap_err();
        assert_eq!(errors[0].reason, "Field cannot be longer than 5 characters.");
    }

    #[test]
    fn stores_dates_times_and_files() {
        let mut received = submission(&[("first_name", "Ann"), ("birthday", "2020-03-14"), ("arrival", "09:30"), ("kind", "a")]);
        received.files.insert(
            "cv".to_string(),
            UploadedFile {
                file_name: "resume.PDF".to_string(),
                bytes: b"%PDF".to_vec(),
            },
        );
        let form = validate(&fields(), &received).unwrap();
        let data = form
            .into_json(|file| Ok::<_, ()>(format!("http://files/{}", file.file_name)))
            .unwrap();
        assert_eq!(data["birthday"], "14/03/20");
        assert_eq!(data["arrival"], "09:30");
        assert_eq!(data["cv"], "http://files/resume.PDF");
        assert_eq!(data["email"], "");
        assert!(!data.contains_key("csrf_token"));
    }

    #[test]
    fn accepts_stored_date_layout() {
        let form = validate(&fields(), &submission(&[("first_name", "Ann"), ("birthday", "14/03/20")])).unwrap();
        assert_eq!(form.values["birthday"], FieldValue::Date(NaiveDate::from_ymd_opt(2020, 3, 14).unwrap()));
    }

    #[test]
    fn rejects_disallowed_extension() {
        let mut received = submission(&[("first_name", "Ann")]);
        received.files.insert(
            "cv".to_string(),
            UploadedFile {
                file_name: "resume.exe".to_string(),
                bytes: vec![0],
            },
        );
        let errors = validate(&fields(), &received).unwrap_err();
        assert_eq!(errors[0].reason, "File does not have an approved extension: pdf");
    }

    #[test]
    fn read_only_views_turn_files_into_links() {
        let mut values = Map::new();
        values.insert("cv".into(), Value::String("http://files/a.pdf".into()));
        values.insert("birthday".into(), Value::String("14/03/20".into()));
        let views = field_views(&fields(), &values, true, &[]);
        let cv = views.iter().find(|view| view.name == "cv").unwrap();
        assert_eq!(cv.widget, "link");
        assert_eq!(cv.value, "http://files/a.pdf");
        let birthday = views.iter().find(|view| view.name == "birthday").unwrap();
        assert_eq!(birthday.widget, "text");
        assert_eq!(birthday.value, "14/03/20");
        assert!(views.iter().all(|view| view.read_only));
    }

    #[test]
    fn editable_views_convert_dates_and_mark_choices() {
        let mut values = Map::new();
        values.insert("birthday".into(), Value::String("14/03/20".into()));
        values.insert("kind".into(), Value::String("b".into()));
        let views = field_views(&fields(), &values, false, &[]);
        let birthday = views.iter().find(|view| view.name == "birthday").unwrap();
        assert_eq!(birthday.value, "2020-03-14");
        let kind = views.iter().find(|view| view.name == "kind").unwrap();
        assert!(kind.choices[1].selected);
        assert!(!kind.choices[0].selected);
    }
}
