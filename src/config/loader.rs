//! Configuration loading from disk.
//!
//! A single TOML document carries both the typed settings and the virtual
//! server declarations:
//!
//! ```toml
//! [admin]
//! enabled = true
//!
//! [server.auth]
//! namespace = "radius"
//!
//! [[server.auth.listen]]
//! transport = "udp"
//! port = 1812
//! type = ["Access-Request", "Status-Server"]
//!
//! [server.auth."recv Access-Request"]
//! ```
//!
//! Tables become sections (a key with a space splits into the two section
//! names), arrays of tables become repeated sections, scalar arrays become
//! repeated pairs.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::schema::Settings;
use crate::config::tree::{ConfigTree, SectionId};
use crate::config::validation::{validate_settings, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Structure { path: String, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Structure { path, message } => write!(f, "Invalid '{}': {}", path, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Typed settings plus the virtual server tree.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub tree: ConfigTree,
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let loaded = parse_config(&content, Some(path))?;

    validate_settings(&loaded.settings).map_err(ConfigError::Validation)?;

    Ok(loaded)
}

/// Parse a TOML document without touching the filesystem.
pub fn parse_config(content: &str, file: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let mut document: toml::Table = toml::from_str(content).map_err(ConfigError::Parse)?;
    let servers = document.remove("server");

    let settings: Settings = toml::Value::Table(document)
        .try_into()
        .map_err(ConfigError::Parse)?;

    let mut tree = ConfigTree::with_file(file.map(Arc::from));
    let root = tree.root();

    match servers {
        None => {}
        Some(toml::Value::Table(servers)) => {
            for (name, body) in servers {
                let path = format!("server.{}", name);
                let toml::Value::Table(body) = body else {
                    return Err(ConfigError::Structure {
                        path,
                        message: "a server must be a table".to_string(),
                    });
                };
                let server = tree.add_section(root, "server", Some(&name));
                populate(&mut tree, server, body, &path)?;
            }
        }
        Some(_) => {
            return Err(ConfigError::Structure {
                path: "server".to_string(),
                message: "expected a table of named servers".to_string(),
            });
        }
    }

    Ok(LoadedConfig { settings, tree })
}

fn populate(tree: &mut ConfigTree, parent: SectionId, table: toml::Table, path: &str) -> Result<(), ConfigError> {
    for (key, value) in table {
        let child_path = format!("{}.{}", path, key);
        match value {
            toml::Value::Table(body) => {
                let (name1, name2) = split_key(&key);
                let section = tree.add_section(parent, name1, name2);
                populate(tree, section, body, &child_path)?;
            }
            toml::Value::Array(items) if !items.is_empty() && items.iter().all(toml::Value::is_table) => {
                let (name1, name2) = split_key(&key);
                for (i, item) in items.into_iter().enumerate() {
                    if let toml::Value::Table(body) = item {
                        let section = tree.add_section(parent, name1, name2);
                        populate(tree, section, body, &format!("{}[{}]", child_path, i))?;
                    }
                }
            }
            toml::Value::Array(items) => {
                for item in items {
                    let rendered = render_scalar(&item).ok_or_else(|| ConfigError::Structure {
                        path: child_path.clone(),
                        message: "arrays must hold only tables or only scalars".to_string(),
                    })?;
                    tree.add_pair(parent, &key, rendered);
                }
            }
            scalar => {
                let rendered = render_scalar(&scalar).ok_or_else(|| ConfigError::Structure {
                    path: child_path.clone(),
                    message: "unsupported value".to_string(),
                })?;
                tree.add_pair(parent, &key, rendered);
            }
        }
    }
    Ok(())
}

fn split_key(key: &str) -> (&str, Option<&str>) {
    match key.split_once(char::is_whitespace) {
        Some((name1, name2)) => (name1, Some(name2.trim())),
        None => (key, None),
    }
}

fn render_scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}
