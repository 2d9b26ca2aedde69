//! Where dictionary definitions come from.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::dictionary::model::{Dictionary, DictionaryError};

/// Loads the dictionary of one protocol namespace.
pub trait DictionarySource: Send + Sync {
    /// Returns [`DictionaryError::NotFound`] when this source has no
    /// definition for `namespace`; any other error means it has one and it
    /// is broken.
    fn load(&self, namespace: &str) -> Result<Dictionary, DictionaryError>;
}

/// Definitions compiled into the binary for the built-in protocols.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinSource;

impl DictionarySource for BuiltinSource {
    fn load(&self, namespace: &str) -> Result<Dictionary, DictionaryError> {
        let text = match namespace {
            "radius" => include_str!("../../share/dictionary/radius.toml"),
            "control" => include_str!("../../share/dictionary/control.toml"),
            _ => return Err(DictionaryError::NotFound(namespace.to_string())),
        };
        Dictionary::parse(namespace, text)
    }
}

/// Reads `<dir>/<namespace>.toml`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DictionarySource for DirectorySource {
    fn load(&self, namespace: &str) -> Result<Dictionary, DictionaryError> {
        let valid = namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(DictionaryError::NotFound(namespace.to_string()));
        }

        let path = self.dir.join(format!("{}.toml", namespace));
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DictionaryError::NotFound(namespace.to_string()));
            }
            Err(source) => return Err(DictionaryError::Io { path, source }),
        };
        Dictionary::parse(namespace, &text)
    }
}

/// In-memory definitions, keyed by namespace.
#[derive(Debug, Default, Clone)]
pub struct StaticSource {
    definitions: BTreeMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, namespace: &str, text: impl Into<String>) -> Self {
        self.definitions.insert(namespace.to_string(), text.into());
        self
    }
}

impl DictionarySource for StaticSource {
    fn load(&self, namespace: &str) -> Result<Dictionary, DictionaryError> {
        match self.definitions.get(namespace) {
            Some(text) => Dictionary::parse(namespace, text),
            None => Err(DictionaryError::NotFound(namespace.to_string())),
        }
    }
}

/// Tries each source in order, falling through on `NotFound` only.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn DictionarySource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, source: impl DictionarySource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl DictionarySource for LayeredSource {
    fn load(&self, namespace: &str) -> Result<Dictionary, DictionaryError> {
        for layer in &self.layers {
            match layer.load(namespace) {
                Err(DictionaryError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(DictionaryError::NotFound(namespace.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dictionaries_parse() {
        let radius = BuiltinSource.load("radius").unwrap();
        assert!(radius.dispatch().is_some());
        assert_eq!(radius.enum_value("Packet-Type", "Access-Request"), Some(1));

        let control = BuiltinSource.load("control").unwrap();
        assert!(control.dispatch().is_none());

        assert!(matches!(BuiltinSource.load("dhcp"), Err(DictionaryError::NotFound(_))));
    }

    #[test]
    fn test_layered_prefers_earlier_layers() {
        let override_text = "protocol = \"radius\"\n";
        let source = LayeredSource::new()
            .push(StaticSource::new().with("radius", override_text))
            .push(BuiltinSource);

        let radius = source.load("radius").unwrap();
        assert!(radius.dispatch().is_none());
        assert!(source.load("control").is_ok());
    }

    #[test]
    fn test_layered_stops_on_malformed() {
        let source = LayeredSource::new()
            .push(StaticSource::new().with("radius", "protocol = 7"))
            .push(BuiltinSource);
        assert!(matches!(source.load("radius"), Err(DictionaryError::Malformed { .. })));
    }

    #[test]
    fn test_directory_source_rejects_traversal() {
        let source = DirectorySource::new(std::env::temp_dir());
        assert!(matches!(source.load("../etc/passwd"), Err(DictionaryError::NotFound(_))));
        assert!(matches!(source.load("vserver-missing-ns"), Err(DictionaryError::NotFound(_))));
    }
}
