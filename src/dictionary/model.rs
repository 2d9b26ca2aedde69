//! Protocol dictionary model.

use std::collections::BTreeMap;
use std::path::PathBuf;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or extending a dictionary.
#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("no dictionary found for namespace \"{0}\"")]
    NotFound(String),

    #[error("failed reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dictionary for namespace \"{namespace}\": {message}")]
    Malformed { namespace: String, message: String },

    #[error("unknown attribute \"{0}\"")]
    UnknownAttribute(String),

    #[error("attribute \"{0}\" cannot carry enumerated values")]
    NotEnumerable(String),

    #[error("attribute \"{attribute}\" has no free value left for \"{alias}\"")]
    ValueSpaceExhausted { attribute: String, alias: String },
}

/// Data type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Uint8,
    Uint16,
    Uint32,
    String,
    Octets,
    Ipaddr,
}

impl AttributeKind {
    /// Largest value an enumeration of this kind may use.
    fn max_value(self) -> Option<u32> {
        match self {
            AttributeKind::Uint8 => Some(u8::MAX as u32),
            AttributeKind::Uint16 => Some(u16::MAX as u32),
            AttributeKind::Uint32 => Some(u32::MAX),
            _ => None,
        }
    }
}

/// One attribute definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attribute {
    pub name: String,
    pub number: u32,
    pub kind: AttributeKind,
}

/// Which enumerated attribute selects a process handler, and the size of
/// the dense dispatch table built from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DispatchSpec {
    pub attribute: String,
    pub max_code: u32,
}

/// On-disk form of a dictionary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DictionaryDefinition {
    pub protocol: String,

    #[serde(default)]
    pub dispatch: Option<DispatchSpec>,

    #[serde(default, rename = "attribute")]
    pub attributes: Vec<Attribute>,

    /// attribute name → (alias → value)
    #[serde(default)]
    pub values: BTreeMap<String, BTreeMap<String, u32>>,
}

#[derive(Debug, Default)]
struct EnumTable {
    by_alias: BTreeMap<String, u32>,
    by_value: BTreeMap<u32, String>,
}

/// A loaded protocol dictionary.
///
/// Attribute definitions are fixed once loaded; enumerated values may still
/// be added (see [`Dictionary::define_enum_next`]) so sections can mint
/// their own codes during bootstrap.
#[derive(Debug)]
pub struct Dictionary {
    protocol: String,
    attributes: BTreeMap<String, Attribute>,
    dispatch: Option<DispatchSpec>,
    enums: DashMap<String, EnumTable>,
}

impl Dictionary {
    /// Parse a TOML definition for `namespace`.
    pub fn parse(namespace: &str, text: &str) -> Result<Self, DictionaryError> {
        let definition: DictionaryDefinition =
            toml::from_str(text).map_err(|e| DictionaryError::Malformed {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;
        Self::from_definition(namespace, definition)
    }

    /// Validate a definition and build the dictionary.
    pub fn from_definition(namespace: &str, definition: DictionaryDefinition) -> Result<Self, DictionaryError> {
        let malformed = |message: String| DictionaryError::Malformed {
            namespace: namespace.to_string(),
            message,
        };

        if definition.protocol != namespace {
            return Err(malformed(format!(
                "defines protocol \"{}\"",
                definition.protocol
            )));
        }

        let mut attributes = BTreeMap::new();
        let mut numbers = BTreeMap::new();
        for attribute in definition.attributes {
            if let Some(other) = numbers.insert(attribute.number, attribute.name.clone()) {
                return Err(malformed(format!(
                    "attributes \"{}\" and \"{}\" share number {}",
                    other, attribute.name, attribute.number
                )));
            }
            if attributes.contains_key(&attribute.name) {
                return Err(malformed(format!("attribute \"{}\" defined twice", attribute.name)));
            }
            attributes.insert(attribute.name.clone(), attribute);
        }

        if let Some(dispatch) = &definition.dispatch {
            match attributes.get(&dispatch.attribute) {
                Some(attr) if attr.kind.max_value().is_some() => {}
                Some(_) => {
                    return Err(malformed(format!(
                        "dispatch attribute \"{}\" is not an integer",
                        dispatch.attribute
                    )))
                }
                None => {
                    return Err(malformed(format!(
                        "dispatch attribute \"{}\" is not defined",
                        dispatch.attribute
                    )))
                }
            }
        }

        let enums = DashMap::new();
        for (attribute, values) in definition.values {
            let Some(attr) = attributes.get(&attribute) else {
                return Err(malformed(format!("values for undefined attribute \"{}\"", attribute)));
            };
            let Some(max) = attr.kind.max_value() else {
                return Err(malformed(format!("attribute \"{}\" cannot carry values", attribute)));
            };

            let mut table = EnumTable::default();
            for (alias, value) in values {
                if value > max {
                    return Err(malformed(format!("{} = {} overflows \"{}\"", alias, value, attribute)));
                }
                if let Some(other) = table.by_value.insert(value, alias.clone()) {
                    return Err(malformed(format!(
                        "\"{}\" and \"{}\" share value {} of \"{}\"",
                        other, alias, value, attribute
                    )));
                }
                table.by_alias.insert(alias, value);
            }
            enums.insert(attribute, table);
        }

        Ok(Self {
            protocol: definition.protocol,
            attributes,
            dispatch: definition.dispatch,
            enums,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn dispatch(&self) -> Option<&DispatchSpec> {
        self.dispatch.as_ref()
    }

    /// Value bound to `alias` in `attribute`'s enumeration.
    pub fn enum_value(&self, attribute: &str, alias: &str) -> Option<u32> {
        self.enums.get(attribute)?.by_alias.get(alias).copied()
    }

    /// Alias bound to `value` in `attribute`'s enumeration.
    pub fn enum_alias(&self, attribute: &str, value: u32) -> Option<String> {
        self.enums.get(attribute)?.by_value.get(&value).cloned()
    }

    /// Bind `alias` to the next unused value of `attribute`.
    ///
    /// An alias that already exists keeps its value. The numbers carry no
    /// meaning outside this process; they only need to be unique.
    pub fn define_enum_next(&self, attribute: &str, alias: &str) -> Result<u32, DictionaryError> {
        let attr = self
            .attributes
            .get(attribute)
            .ok_or_else(|| DictionaryError::UnknownAttribute(attribute.to_string()))?;
        let max = attr
            .kind
            .max_value()
            .ok_or_else(|| DictionaryError::NotEnumerable(attribute.to_string()))?;

        let mut table = self.enums.entry(attribute.to_string()).or_default();
        if let Some(value) = table.by_alias.get(alias) {
            return Ok(*value);
        }

        let next = match table.by_value.keys().next_back() {
            Some(last) => last.checked_add(1).filter(|v| *v <= max),
            None => Some(1),
        }
        .ok_or_else(|| DictionaryError::ValueSpaceExhausted {
            attribute: attribute.to_string(),
            alias: alias.to_string(),
        })?;

        table.by_alias.insert(alias.to_string(), next);
        table.by_value.insert(next, alias.to_string());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = r#"
protocol = "radius"

[dispatch]
attribute = "Packet-Type"
max_code = 64

[[attribute]]
name = "Packet-Type"
number = 1000
kind = "uint32"

[[attribute]]
name = "Recv-Type"
number = 1001
kind = "uint8"

[[attribute]]
name = "User-Name"
number = 1
kind = "string"

[values.Packet-Type]
Access-Request = 1
Access-Accept = 2
"#;

    #[test]
    fn test_parse_and_lookup() {
        let dict = Dictionary::parse("radius", TEXT).unwrap();
        assert_eq!(dict.protocol(), "radius");
        assert_eq!(dict.enum_value("Packet-Type", "Access-Request"), Some(1));
        assert_eq!(dict.enum_alias("Packet-Type", 2).as_deref(), Some("Access-Accept"));
        assert_eq!(dict.dispatch().unwrap().max_code, 64);
        assert!(dict.enum_value("Packet-Type", "Nope").is_none());
    }

    #[test]
    fn test_protocol_must_match_namespace() {
        let err = Dictionary::parse("dhcp", TEXT).unwrap_err();
        assert!(matches!(err, DictionaryError::Malformed { .. }));
    }

    #[test]
    fn test_duplicate_values_rejected() {
        let text = TEXT.replace("Access-Accept = 2", "Access-Accept = 1");
        assert!(Dictionary::parse("radius", &text).is_err());
    }

    #[test]
    fn test_define_enum_next() {
        let dict = Dictionary::parse("radius", TEXT).unwrap();
        assert_eq!(dict.define_enum_next("Packet-Type", "Custom").unwrap(), 3);
        assert_eq!(dict.define_enum_next("Packet-Type", "Custom").unwrap(), 3);
        assert_eq!(dict.define_enum_next("Recv-Type", "first").unwrap(), 1);

        assert!(matches!(
            dict.define_enum_next("User-Name", "x"),
            Err(DictionaryError::NotEnumerable(_))
        ));
        assert!(matches!(
            dict.define_enum_next("Missing", "x"),
            Err(DictionaryError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_define_enum_next_exhausts() {
        let dict = Dictionary::parse("radius", TEXT).unwrap();
        for i in 0..255 {
            dict.define_enum_next("Recv-Type", &format!("v{}", i)).unwrap();
        }
        assert!(matches!(
            dict.define_enum_next("Recv-Type", "overflow"),
            Err(DictionaryError::ValueSpaceExhausted { .. })
        ));
    }
}
