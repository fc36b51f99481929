//! Layered loading of the app definition.
//!
//! `hymie.yaml` is read first, then `secrets.yaml`, then either
//! `production.yaml` or `testing.yaml`. Each later file is deep-merged over the
//! earlier ones so deployments only need to override the keys they change.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use hymie_types::AppDefinition;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFINITION_FILE: &str = "hymie.yaml";
pub const SECRETS_FILE: &str = "secrets.yaml";
pub const PRODUCTION_FILE: &str = "production.yaml";
pub const TESTING_FILE: &str = "testing.yaml";

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("app definition not found: {path}")]
    Missing { path: PathBuf },
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} must contain a mapping at the top level")]
    NotAMapping { path: PathBuf },
    #[error("invalid app definition: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Values injected into every rendered template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateVars {
    pub name: String,
    pub description: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub yaml_timestamp: String,
}

impl TemplateVars {
    pub const NAMES: [&'static str; 5] = ["name", "description", "maintainer", "maintainer_email", "yaml_timestamp"];

    pub fn contains(name: &str) -> bool {
        Self::NAMES.contains(&name)
    }
}

/// A parsed definition together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedDefinition {
    pub definition: AppDefinition,
    pub template_vars: TemplateVars,
    /// Files that contributed, in merge order.
    pub sources: Vec<PathBuf>,
}

/// Loads the definition of the app in `app_path`.
///
/// # Arguments
/// * `app_path` - Folder holding `hymie.yaml`
/// * `production` - Selects `production.yaml` instead of `testing.yaml` as the last layer
pub fn load_definition(app_path: &Path, production: bool) -> Result<LoadedDefinition, DefinitionError> {
    let main = app_path.join(DEFINITION_FILE);
    if !main.is_file() {
        return Err(DefinitionError::Missing { path: main });
    }

    let overlay = if production { PRODUCTION_FILE } else { TESTING_FILE };
    let candidates = [main, app_path.join(SECRETS_FILE), app_path.join(overlay)];

    let mut merged = Value::Object(Map::new());
    let mut sources = Vec::new();
    let mut newest: Option<SystemTime> = None;

    for path in candidates {
        if !path.is_file() {
            debug!(path = %path.display(), "optional definition layer not present");
            continue;
        }
        let (layer, modified) = read_layer(&path)?;
        merge_values(&mut merged, layer);
        newest = newest.max(Some(modified));
        sources.push(path);
    }

    let definition: AppDefinition = serde_json::from_value(merged)?;
    let yaml_timestamp = newest
        .map(|modified| DateTime::<Local>::from(modified).format("%Y-%m-%d-%H:%M").to_string())
        .unwrap_or_default();

    info!(files = ?sources, app = %definition.metadata.name, "loaded app definition");

    let metadata = &definition.metadata;
    let template_vars = TemplateVars {
        name: metadata.name.clone(),
        description: metadata.description.clone(),
        maintainer: metadata.maintainer.clone(),
        maintainer_email: metadata.maintainer_email.to_string(),
        yaml_timestamp,
    };

    Ok(LoadedDefinition {
        definition,
        template_vars,
        sources,
    })
}

fn read_layer(path: &Path) -> Result<(Value, SystemTime), DefinitionError> {
    let io_error = |source| DefinitionError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content = fs::read_to_string(path).map_err(io_error)?;
    let modified = fs::metadata(path).and_then(|metadata| metadata.modified()).map_err(io_error)?;
    let value: Value = serde_yaml::from_str(&content).map_err(|source| DefinitionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(_) => Ok((value, modified)),
        Value::Null => Ok((Value::Object(Map::new()), modified)),
        _ => Err(DefinitionError::NotAMapping { path: path.to_path_buf() }),
    }
}

/// Recursively merges `overlay` into `base`. Mappings merge key by key, anything else is replaced.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const DEFINITION: &str = r#"
metadata:
  name: Trips
  description: Travel approval
  maintainer: Jane
  maintainer_email: jane@example.com
  first_endpoint: request
config:
  email:
    address: trips@example.com
    host: smtp.example.com
    port: 587
    use_tls: true
    use_ssl: false
    user: trips
    password: placeholder
    timeout: 10
    subject: "[Trips]"
  secret:
    key: placeholder
    admin_password: placeholder
  storage:
    path: data
    salt: pepper
endpoints:
  request:
    description: Trip request
"#;

    #[test]
    fn merge_replaces_scalars_and_merges_maps() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_values(&mut base, json!({"a": {"c": 3, "e": 4}, "d": [5]}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 3, "e": 4}, "d": [5]}));
    }

    #[test]
    fn missing_definition_is_reported() {
        let folder = tempdir().unwrap();
        let error = load_definition(folder.path(), false).unwrap_err();
        assert!(matches!(error, DefinitionError::Missing { .. }));
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let folder = tempdir().unwrap();
        fs::write(folder.path().join(DEFINITION_FILE), DEFINITION).unwrap();
        fs::write(folder.path().join(SECRETS_FILE), "config:\n  secret:\n    key: from-secrets\n").unwrap();
        fs::write(folder.path().join(TESTING_FILE), "config:\n  email:\n    debug: true\n").unwrap();
        fs::write(folder.path().join(PRODUCTION_FILE), "config:\n  email:\n    port: 465\n").unwrap();

        let loaded = load_definition(folder.path(), false).unwrap();
        let config = &loaded.definition.config;
        assert_eq!(config.secret.key, "from-secrets");
        assert_eq!(config.secret.admin_password, "placeholder");
        assert!(config.email.debug);
        assert_eq!(config.email.port, 587);
        assert_eq!(loaded.sources.len(), 3);

        let production = load_definition(folder.path(), true).unwrap();
        assert_eq!(production.definition.config.email.port, 465);
        assert!(!production.definition.config.email.debug);
    }

    #[test]
    fn template_vars_come_from_metadata() {
        let folder = tempdir().unwrap();
        fs::write(folder.path().join(DEFINITION_FILE), DEFINITION).unwrap();
        let loaded = load_definition(folder.path(), false).unwrap();
        assert_eq!(loaded.template_vars.name, "Trips");
        assert_eq!(loaded.template_vars.maintainer_email, "jane@example.com");
        assert_eq!(loaded.template_vars.yaml_timestamp.len(), "2020-03-14-09:26".len());
        assert!(TemplateVars::contains("yaml_timestamp"));
        assert!(!TemplateVars::contains("form"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let folder = tempdir().unwrap();
        fs::write(folder.path().join(DEFINITION_FILE), DEFINITION).unwrap();
        fs::write(folder.path().join(SECRETS_FILE), "config: [unclosed").unwrap();
        let error = load_definition(folder.path(), false).unwrap_err();
        assert!(error.to_string().contains(SECRETS_FILE));
    }
}
