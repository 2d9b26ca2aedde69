//! What a namespace compiler sees while compiling one virtual server.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigTree, Location, Section, SectionId};
use crate::dictionary::{DictionaryError, DictionaryHandle};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{location}: Invalid '{name1} {{ ... }}' section, it must have a name")]
    Unnamed { location: Location, name1: String },

    #[error("{location}: section does not belong to server {server}")]
    Foreign { location: Location, server: String },

    #[error("{location}: {source}")]
    Dictionary {
        location: Location,
        #[source]
        source: DictionaryError,
    },

    #[error("{location}: {message}")]
    Invalid { location: Location, message: String },
}

impl CompileError {
    pub fn invalid(location: &Location, message: impl Into<String>) -> Self {
        CompileError::Invalid {
            location: location.clone(),
            message: message.into(),
        }
    }
}

/// Policy section in executable form.
///
/// The interpreter that runs policies lives elsewhere; compiling here
/// validates the section and pins it to the component it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPolicy {
    pub name1: String,
    pub name2: Option<String>,
    pub component: String,
    pub section: SectionId,
    pub location: Location,
    /// Number of items (pairs and subsections) in the section body.
    pub items: usize,
}

/// Every policy compiled for one virtual server, keyed by section.
#[derive(Debug, Default, Clone)]
pub struct CompiledPolicies {
    by_section: BTreeMap<SectionId, Arc<CompiledPolicy>>,
    /// `(name1, name2)` to the first section compiled under that name.
    by_name: BTreeMap<(String, Option<String>), SectionId>,
}

impl CompiledPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy compiled from the `name1 name2` subsection, if any.
    pub fn get(&self, name1: &str, name2: Option<&str>) -> Option<Arc<CompiledPolicy>> {
        let key = (name1.to_string(), name2.map(str::to_string));
        self.by_name.get(&key).and_then(|section| self.by_section(*section))
    }

    fn insert(&mut self, policy: Arc<CompiledPolicy>) {
        self.by_name
            .entry((policy.name1.clone(), policy.name2.clone()))
            .or_insert(policy.section);
        self.by_section.insert(policy.section, policy);
    }

    pub fn by_section(&self, section: SectionId) -> Option<Arc<CompiledPolicy>> {
        self.by_section.get(&section).cloned()
    }

    /// Whether some compiler claimed `section`.
    pub fn is_claimed(&self, section: SectionId) -> bool {
        self.by_section.contains_key(&section)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledPolicy>> {
        self.by_section.values()
    }

    pub fn len(&self) -> usize {
        self.by_section.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_section.is_empty()
    }
}

/// Second-name constraint of a [`SectionSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionName<'s> {
    /// Only `name1 <name>`.
    Exact(&'s str),
    /// Every `name1 <anything>`; an unnamed `name1 { }` is an error.
    Any,
    /// Only the unnamed `name1 { }`.
    Unnamed,
}

/// One entry of a compiler's list of well-known sections.
#[derive(Debug, Clone, Copy)]
pub struct SectionSpec<'s> {
    pub name1: &'s str,
    pub name2: SectionName<'s>,
    pub component: &'s str,
}

impl<'s> SectionSpec<'s> {
    pub const fn exact(name1: &'s str, name2: &'s str, component: &'s str) -> Self {
        Self {
            name1,
            name2: SectionName::Exact(name2),
            component,
        }
    }

    pub const fn any(name1: &'s str, component: &'s str) -> Self {
        Self {
            name1,
            name2: SectionName::Any,
            component,
        }
    }

    pub const fn unnamed(name1: &'s str, component: &'s str) -> Self {
        Self {
            name1,
            name2: SectionName::Unnamed,
            component,
        }
    }
}

/// Handed to a [`CompileFn`](crate::compile::CompileFn) for one server.
pub struct CompileContext<'a> {
    server: Section<'a>,
    server_name: &'a str,
    dictionary: &'a DictionaryHandle,
    compiled: &'a mut CompiledPolicies,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        tree: &'a ConfigTree,
        server: SectionId,
        server_name: &'a str,
        dictionary: &'a DictionaryHandle,
        compiled: &'a mut CompiledPolicies,
    ) -> Self {
        Self {
            server: tree.section(server),
            server_name,
            dictionary,
            compiled,
        }
    }

    pub fn server(&self) -> Section<'a> {
        self.server
    }

    pub fn server_name(&self) -> &'a str {
        self.server_name
    }

    pub fn dictionary(&self) -> &'a DictionaryHandle {
        self.dictionary
    }

    /// Compile `section` for `component`. Compiling the same section twice
    /// returns the first result.
    pub fn compile_section(&mut self, section: Section<'_>, component: &str) -> Result<Arc<CompiledPolicy>, CompileError> {
        let owner = section.find_in_parent("server").map(|s| s.id());
        if owner != Some(self.server.id()) {
            return Err(CompileError::Foreign {
                location: section.location().clone(),
                server: self.server_name.to_string(),
            });
        }

        if let Some(existing) = self.compiled.by_section(section.id()) {
            return Ok(existing);
        }

        let policy = Arc::new(CompiledPolicy {
            name1: section.name1().to_string(),
            name2: section.name2().map(str::to_string),
            component: component.to_string(),
            section: section.id(),
            location: section.location().clone(),
            items: section.items().count(),
        });
        tracing::debug!(
            server = %self.server_name,
            section = %section.location(),
            component = %component,
            "Compiled policy section"
        );
        self.compiled.insert(policy.clone());
        Ok(policy)
    }

    /// Compile every subsection of the server matching one of `specs`.
    /// Absent sections are skipped. Returns how many were compiled.
    pub fn compile_sections(&mut self, specs: &[SectionSpec<'_>]) -> Result<usize, CompileError> {
        let mut count = 0;
        let server = self.server;
        for spec in specs {
            for section in server.subsections_named(spec.name1) {
                let matches = match spec.name2 {
                    SectionName::Exact(name2) => section.name2() == Some(name2),
                    SectionName::Unnamed => section.name2().is_none(),
                    SectionName::Any => {
                        if section.name2().is_none() {
                            return Err(CompileError::Unnamed {
                                location: section.location().clone(),
                                name1: spec.name1.to_string(),
                            });
                        }
                        true
                    }
                };
                if matches {
                    self.compile_section(section, spec.component)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Give every named `name1 <name> { ... }` subsection of the server a
    /// value of the enumerated `attribute`, allocating the next free value
    /// for names the dictionary does not know yet.
    pub fn define_section_values(&self, name1: &str, attribute: &str) -> Result<usize, CompileError> {
        define_section_values(self.server, self.dictionary, name1, attribute)
    }
}

/// Allocate enumeration values for the names of `name1` subsections.
///
/// Shared with bootstrap hooks, which may need the values before any
/// compiler runs.
pub fn define_section_values(
    server: Section<'_>,
    dictionary: &DictionaryHandle,
    name1: &str,
    attribute: &str,
) -> Result<usize, CompileError> {
    let mut defined = 0;
    for section in server.subsections().filter(|s| s.name1() == name1) {
        let Some(alias) = section.name2() else {
            return Err(CompileError::Unnamed {
                location: section.location().clone(),
                name1: name1.to_string(),
            });
        };
        let value = dictionary
            .define_enum_next(attribute, alias)
            .map_err(|source| CompileError::Dictionary {
                location: section.location().clone(),
                source,
            })?;
        tracing::trace!(attribute = %attribute, alias = %alias, value, "Section value defined");
        defined += 1;
    }
    Ok(defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::Dictionary;

    const DICT: &str = r#"
protocol = "test"

[[attribute]]
name = "Stage"
number = 1
kind = "uint32"

[values.Stage]
Known = 7
"#;

    fn fixture() -> (ConfigTree, SectionId, SectionId) {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("auth"));
        tree.add_pair(server, "namespace", "test");
        let recv = tree.add_section(server, "recv", Some("Access-Request"));
        tree.add_pair(recv, "ok", "yes");
        tree.add_section(server, "recv", Some("Status-Server"));
        tree.add_section(server, "send", Some("Access-Accept"));
        let other = tree.add_section(root, "server", Some("other"));
        (tree, server, other)
    }

    fn dictionary() -> DictionaryHandle {
        Arc::new(Dictionary::parse("test", DICT).unwrap())
    }

    #[test]
    fn test_compile_sections_any() {
        let (tree, server, _) = fixture();
        let dict = dictionary();
        let mut compiled = CompiledPolicies::new();
        let mut ctx = CompileContext::new(&tree, server, "auth", &dict, &mut compiled);

        let count = ctx
            .compile_sections(&[SectionSpec::any("recv", "recv"), SectionSpec::exact("send", "Access-Accept", "send")])
            .unwrap();
        assert_eq!(count, 3);

        let policy = compiled.get("recv", Some("Access-Request")).unwrap();
        assert_eq!(policy.component, "recv");
        assert_eq!(policy.items, 1);
        assert_eq!(compiled.len(), 3);
    }

    #[test]
    fn test_unnamed_section_rejected_for_any() {
        let (mut tree, server, _) = fixture();
        tree.add_section(server, "recv", None);
        let dict = dictionary();
        let mut compiled = CompiledPolicies::new();
        let mut ctx = CompileContext::new(&tree, server, "auth", &dict, &mut compiled);

        let err = ctx.compile_sections(&[SectionSpec::any("recv", "recv")]).unwrap_err();
        assert!(matches!(err, CompileError::Unnamed { .. }));
        assert!(err.to_string().contains("must have a name"));
    }

    #[test]
    fn test_foreign_section_rejected() {
        let (tree, server, other) = fixture();
        let dict = dictionary();
        let mut compiled = CompiledPolicies::new();
        let mut ctx = CompileContext::new(&tree, server, "auth", &dict, &mut compiled);

        let err = ctx.compile_section(tree.section(other), "recv").unwrap_err();
        assert!(matches!(err, CompileError::Foreign { .. }));
    }

    #[test]
    fn test_compile_twice_is_idempotent() {
        let (tree, server, _) = fixture();
        let dict = dictionary();
        let mut compiled = CompiledPolicies::new();
        let mut ctx = CompileContext::new(&tree, server, "auth", &dict, &mut compiled);

        let section = tree.section(server).find_subsection("recv", Some("Status-Server")).unwrap();
        let first = ctx.compile_section(section, "recv").unwrap();
        let second = ctx.compile_section(section, "other").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(compiled.is_claimed(section.id()));
    }

    #[test]
    fn test_get_by_name() {
        let (mut tree, server, _) = fixture();
        let repeat = tree.add_section(server, "recv", Some("Access-Request"));
        let dict = dictionary();
        let mut compiled = CompiledPolicies::new();
        let mut ctx = CompileContext::new(&tree, server, "auth", &dict, &mut compiled);
        ctx.compile_sections(&[SectionSpec::any("recv", "recv")]).unwrap();

        let recv = compiled.get("recv", Some("Access-Request")).unwrap();
        assert_eq!(recv.items, 1);
        assert_ne!(recv.section, repeat);
        assert!(compiled.is_claimed(repeat));
        assert!(compiled.get("recv", Some("Status-Server")).is_some());
        assert!(compiled.get("recv", None).is_none());
        assert!(compiled.get("send", Some("Access-Accept")).is_none());
    }

    #[test]
    fn test_define_section_values() {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("auth"));
        tree.add_section(server, "stage", Some("Known"));
        tree.add_section(server, "stage", Some("Fresh"));
        let dict = dictionary();

        let defined = define_section_values(tree.section(server), &dict, "stage", "Stage").unwrap();
        assert_eq!(defined, 2);
        assert_eq!(dict.enum_value("Stage", "Known"), Some(7));
        assert_eq!(dict.enum_value("Stage", "Fresh"), Some(8));

        tree.add_section(server, "stage", None);
        let err = define_section_values(tree.section(server), &dict, "stage", "Stage").unwrap_err();
        assert!(matches!(err, CompileError::Unnamed { .. }));
    }
}
