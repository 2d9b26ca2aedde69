//! Generic configuration tree.
//!
//! The file grammar is not this crate's concern: a loader (see `loader.rs`)
//! or a test builds a `ConfigTree` out of named sections and key/value
//! pairs, and the orchestrator reads it without ever mutating it.
//!
//! # Design Decisions
//! - Sections live in an arena and are addressed by `SectionId`, so
//!   children can walk to their parents without reference cycles
//! - Item order is declaration order and is preserved everywhere
//! - Every node carries a `Location` for error attribution

use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Handle to a section inside a `ConfigTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(usize);

/// Where a configuration node was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    file: Option<Arc<Path>>,
    path: String,
}

impl Location {
    pub fn new(file: Option<Arc<Path>>, path: impl Into<String>) -> Self {
        Self {
            file,
            path: path.into(),
        }
    }

    /// Source file, absent for trees built in memory.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Path of the node inside the tree, e.g. `server auth/listen[0]`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file.display(), self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// A `name = value` item.
#[derive(Debug, Clone)]
pub struct Pair {
    name: String,
    value: String,
    location: Location,
}

impl Pair {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

/// A child of a section, in declaration order.
#[derive(Debug, Clone)]
pub enum Item {
    Section(SectionId),
    Pair(Pair),
}

#[derive(Debug, Clone)]
struct SectionNode {
    name1: String,
    name2: Option<String>,
    parent: Option<SectionId>,
    items: Vec<Item>,
    location: Location,
    generated: bool,
}

/// Arena of configuration sections rooted at a single `main` section.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    nodes: Vec<SectionNode>,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Create an empty in-memory tree.
    pub fn new() -> Self {
        Self::with_file(None)
    }

    /// Create an empty tree whose nodes are attributed to `file`.
    pub fn with_file(file: Option<Arc<Path>>) -> Self {
        Self {
            nodes: vec![SectionNode {
                name1: "main".to_string(),
                name2: None,
                parent: None,
                items: Vec::new(),
                location: Location::new(file, ""),
                generated: false,
            }],
        }
    }

    pub fn root(&self) -> SectionId {
        SectionId(0)
    }

    /// Whether `id` was handed out by this tree.
    pub fn contains(&self, id: SectionId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Borrow a section view.
    ///
    /// # Panics
    /// If `id` does not belong to this tree. Use [`ConfigTree::get`] for
    /// identifiers of unknown provenance.
    pub fn section(&self, id: SectionId) -> Section<'_> {
        assert!(self.contains(id), "section id {:?} not in tree", id);
        Section { tree: self, id }
    }

    pub fn get(&self, id: SectionId) -> Option<Section<'_>> {
        self.contains(id).then_some(Section { tree: self, id })
    }

    /// Append a subsection to `parent`.
    pub fn add_section(&mut self, parent: SectionId, name1: &str, name2: Option<&str>) -> SectionId {
        let parent_node = &self.nodes[parent.0];
        let segment = match name2 {
            Some(name2) => format!("{} {}", name1, name2),
            None => {
                let index = parent_node
                    .items
                    .iter()
                    .filter(|item| match item {
                        Item::Section(child) => {
                            let child = &self.nodes[child.0];
                            child.name1 == name1 && child.name2.is_none()
                        }
                        Item::Pair(_) => false,
                    })
                    .count();
                format!("{}[{}]", name1, index)
            }
        };
        let location = Location::new(
            parent_node.location.file.clone(),
            join_path(&parent_node.location.path, &segment),
        );

        let id = SectionId(self.nodes.len());
        self.nodes.push(SectionNode {
            name1: name1.to_string(),
            name2: name2.map(str::to_string),
            parent: Some(parent),
            items: Vec::new(),
            location,
            generated: false,
        });
        self.nodes[parent.0].items.push(Item::Section(id));
        id
    }

    /// Append a section that was synthesised rather than read from a file.
    pub fn add_generated_section(&mut self, parent: SectionId, name1: &str, name2: Option<&str>) -> SectionId {
        let id = self.add_section(parent, name1, name2);
        let node = &mut self.nodes[id.0];
        node.generated = true;
        node.location.file = None;
        id
    }

    /// Append a pair to `parent`.
    pub fn add_pair(&mut self, parent: SectionId, name: &str, value: impl Into<String>) {
        let node = &mut self.nodes[parent.0];
        let location = Location::new(node.location.file.clone(), join_path(&node.location.path, name));
        node.items.push(Item::Pair(Pair {
            name: name.to_string(),
            value: value.into(),
            location,
        }));
    }
}

fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}

/// Borrowed view of one section.
#[derive(Clone, Copy)]
pub struct Section<'a> {
    tree: &'a ConfigTree,
    id: SectionId,
}

impl<'a> Section<'a> {
    fn node(&self) -> &'a SectionNode {
        &self.tree.nodes[self.id.0]
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn name1(&self) -> &'a str {
        &self.node().name1
    }

    pub fn name2(&self) -> Option<&'a str> {
        self.node().name2.as_deref()
    }

    pub fn location(&self) -> &'a Location {
        &self.node().location
    }

    /// True for sections synthesised by code rather than declared in a file.
    pub fn is_generated(&self) -> bool {
        self.node().generated
    }

    pub fn parent(&self) -> Option<Section<'a>> {
        self.node().parent.map(|id| self.tree.section(id))
    }

    pub fn items(&self) -> impl Iterator<Item = &'a Item> + 'a {
        self.node().items.iter()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &'a Pair> + 'a {
        self.node().items.iter().filter_map(|item| match item {
            Item::Pair(pair) => Some(pair),
            Item::Section(_) => None,
        })
    }

    /// All pairs called `name`, in declaration order.
    pub fn pairs_named(&self, name: &'a str) -> impl Iterator<Item = &'a Pair> + 'a {
        self.pairs().filter(move |pair| pair.name == name)
    }

    /// First pair called `name`.
    pub fn find_pair(&self, name: &str) -> Option<&'a Pair> {
        self.pairs().find(|pair| pair.name == name)
    }

    pub fn subsections(&self) -> impl Iterator<Item = Section<'a>> + 'a {
        let tree = self.tree;
        self.node().items.iter().filter_map(move |item| match item {
            Item::Section(id) => Some(tree.section(*id)),
            Item::Pair(_) => None,
        })
    }

    /// All subsections whose first name is `name1`.
    pub fn subsections_named(&self, name1: &'a str) -> impl Iterator<Item = Section<'a>> + 'a {
        self.subsections().filter(move |s| s.name1() == name1)
    }

    /// Subsection matching both names; `None` for `name2` matches only
    /// unnamed sections.
    pub fn find_subsection(&self, name1: &str, name2: Option<&str>) -> Option<Section<'a>> {
        self.subsections().find(|s| s.name1() == name1 && s.name2() == name2)
    }

    /// This section or the nearest ancestor whose first name is `name1`.
    pub fn find_in_parent(&self, name1: &str) -> Option<Section<'a>> {
        let mut current = Some(*self);
        while let Some(section) = current {
            if section.name1() == name1 {
                return Some(section);
            }
            current = section.parent();
        }
        None
    }

    /// Every section nested below this one, depth first.
    pub fn descendants(&self) -> Vec<Section<'a>> {
        let mut out = Vec::new();
        let mut stack: Vec<Section<'a>> = self.subsections().collect();
        stack.reverse();
        while let Some(section) = stack.pop() {
            let mut children: Vec<Section<'a>> = section.subsections().collect();
            children.reverse();
            stack.extend(children);
            out.push(section);
        }
        out
    }
}

impl fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("name1", &self.name1())
            .field("name2", &self.name2())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (ConfigTree, SectionId, SectionId) {
        let mut tree = ConfigTree::new();
        let root = tree.root();
        let server = tree.add_section(root, "server", Some("auth"));
        tree.add_pair(server, "namespace", "radius");
        let listen = tree.add_section(server, "listen", None);
        tree.add_pair(listen, "type", "Access-Request");
        tree.add_pair(listen, "type", "Status-Server");
        tree.add_section(server, "listen", None);
        (tree, server, listen)
    }

    #[test]
    fn test_locations_follow_declaration() {
        let (tree, server, listen) = sample();
        assert_eq!(tree.section(server).location().path(), "server auth");
        assert_eq!(tree.section(listen).location().path(), "server auth/listen[0]");

        let second = tree.section(server).subsections_named("listen").nth(1).unwrap();
        assert_eq!(second.location().path(), "server auth/listen[1]");
    }

    #[test]
    fn test_repeated_pairs_keep_order() {
        let (tree, _, listen) = sample();
        let types: Vec<_> = tree.section(listen).pairs_named("type").map(|p| p.value()).collect();
        assert_eq!(types, vec!["Access-Request", "Status-Server"]);
    }

    #[test]
    fn test_find_in_parent_walks_upward() {
        let (mut tree, server, listen) = sample();
        let nested = tree.add_section(listen, "limit", None);

        let found = tree.section(nested).find_in_parent("server").unwrap();
        assert_eq!(found.id(), server);
        assert_eq!(found.name2(), Some("auth"));
        assert!(tree.section(tree.root()).find_in_parent("server").is_none());
    }

    #[test]
    fn test_generated_sections_lose_file() {
        let mut tree = ConfigTree::with_file(Some(Arc::from(Path::new("vserver.toml"))));
        let root = tree.root();
        let declared = tree.add_section(root, "server", Some("a"));
        let generated = tree.add_generated_section(root, "server", Some("b"));

        assert_eq!(tree.section(declared).location().to_string(), "vserver.toml:server a");
        assert!(tree.section(generated).is_generated());
        assert!(tree.section(generated).location().file().is_none());
    }

    #[test]
    fn test_descendants_depth_first() {
        let (tree, server, _) = sample();
        let names: Vec<_> = tree.section(server).descendants().iter().map(|s| s.location().path().to_string()).collect();
        assert_eq!(names, vec!["server auth/listen[0]", "server auth/listen[1]"]);
    }
}
