//! Arena-backed concrete syntax tree.
//!
//! Nodes live in a flat `Vec` and refer to each other by [`NodeId`]; the
//! parent link is a plain index, so there are no reference cycles to manage.
//! Deleted nodes are never unlinked: they are flagged `hidden` and skipped by
//! every visible-children query and by serialization, which keeps sibling
//! positions stable while a batch of edits is replayed.

use std::collections::HashMap;

use crate::types::{NodeId, NodeKind, Role, StableKey};

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub role: Role,
    /// Leaf text, or the header remainder (`lead`) of a block.
    pub text: String,
    /// Relative indent of a block, or absolute indent of an odd comment line.
    pub indent: Option<String>,
    /// Block written on its header line (`def f(): pass`).
    pub inline: bool,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub index: usize,
    pub hidden: bool,
    /// Inserted during the current batch.
    pub new: bool,
    /// Child index last touched while applying, for disambiguation.
    pub cursor: Option<usize>,
}

impl Node {
    fn new(kind: NodeKind, role: Role, text: String) -> Self {
        Self {
            kind,
            role,
            text,
            indent: None,
            inline: false,
            children: Vec::new(),
            parent: None,
            index: 0,
            hidden: false,
            new: false,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    missing_final_newline: bool,
    /// Nodes inserted right after a given node; they follow it when it moves.
    anchored: HashMap<NodeId, Vec<NodeId>>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding an empty module.
    pub fn new() -> Self {
        let mut tree = Self::detached();
        tree.root = tree.add(NodeKind::Module, Role::Item, String::new());
        tree
    }

    fn detached() -> Self {
        Self {
            nodes: Vec::new(),
            root: 0,
            missing_final_newline: false,
            anchored: HashMap::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_ref(&self) -> NodeRef<'_> {
        self.get(self.root)
    }

    pub fn get(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn set_missing_final_newline(&mut self, missing: bool) {
        self.missing_final_newline = missing;
    }

    /// Create a node that is not linked anywhere yet.
    pub fn add(&mut self, kind: NodeKind, role: Role, text: impl Into<String>) -> NodeId {
        self.nodes.push(Node::new(kind, role, text.into()));
        self.nodes.len() - 1
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        let index = self.nodes[parent].children.len();
        self.nodes[parent].children.push(child);
        let node = &mut self.nodes[child];
        node.parent = Some(parent);
        node.index = index;
    }

    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        let index = index.min(self.nodes[parent].children.len());
        self.nodes[parent].children.insert(index, child);
        self.nodes[child].parent = Some(parent);
        self.reindex(parent);
    }

    /// Physically unlink a child. Only used when re-parenting live nodes.
    pub(crate) fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child].parent {
            self.nodes[parent].children.retain(|&c| c != child);
            self.reindex(parent);
        }
        self.nodes[child].parent = None;
    }

    pub fn reindex(&mut self, parent: NodeId) {
        let children = self.nodes[parent].children.clone();
        for (index, child) in children.into_iter().enumerate() {
            self.nodes[child].index = index;
        }
    }

    pub fn hide(&mut self, id: NodeId) {
        self.nodes[id].hidden = true;
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id].text = text.into();
    }

    pub fn visible_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| !self.nodes[c].hidden)
            .collect()
    }

    /// The `nth` visible child filling `role`.
    pub fn field(&self, id: NodeId, role: Role, nth: usize) -> Option<NodeId> {
        self.visible_children(id)
            .into_iter()
            .filter(|&c| self.nodes[c].role == role)
            .nth(nth)
    }

    /// True if the node or one of its ancestors is hidden.
    pub fn is_detached_or_hidden(&self, mut id: NodeId) -> bool {
        loop {
            if self.nodes[id].hidden {
                return true;
            }
            match self.nodes[id].parent {
                Some(parent) => id = parent,
                None => return id != self.root,
            }
        }
    }

    /// Deep-copy the visible part of `src` into this arena. Copies are flagged `new`.
    pub fn import(&mut self, src: NodeRef<'_>) -> NodeId {
        let node = src.node();
        let id = self.add(node.kind, node.role, node.text.clone());
        self.nodes[id].indent = node.indent.clone();
        self.nodes[id].inline = node.inline;
        self.nodes[id].new = true;
        for child in src.children() {
            let copy = self.import(child);
            self.append(id, copy);
        }
        id
    }

    pub fn anchor(&mut self, after: NodeId, follower: NodeId) {
        self.anchored.entry(after).or_default().push(follower);
    }

    pub fn followers(&self, id: NodeId) -> Vec<NodeId> {
        self.anchored.get(&id).cloned().unwrap_or_default()
    }

    /// Reset per-container cursors before replaying a change list.
    pub fn begin_batch(&mut self) {
        for node in &mut self.nodes {
            node.cursor = None;
        }
    }

    pub fn finish_batch(&mut self) {
        for node in &mut self.nodes {
            node.new = false;
            node.cursor = None;
        }
        self.anchored.clear();
    }

    /// Closest ancestor (or self) that is a line of a line container.
    pub fn line_element(&self, mut id: NodeId) -> Option<NodeId> {
        loop {
            let parent = self.nodes[id].parent?;
            let parent_node = &self.nodes[parent];
            let placeable = match parent_node.kind {
                NodeKind::Module | NodeKind::Clauses => true,
                NodeKind::Block => !parent_node.inline,
                _ => false,
            };
            if placeable {
                return Some(id);
            }
            id = parent;
        }
    }

    /// Statement directly under the module that contains `id`.
    pub fn top_level(&self, mut id: NodeId) -> Option<NodeId> {
        loop {
            let parent = self.nodes[id].parent?;
            if parent == self.root {
                return Some(id);
            }
            id = parent;
        }
    }

    pub fn serialize(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write(id, "", false, &mut out);
        out
    }

    /// Serialization as it stood before the current batch: hidden nodes are
    /// written, nodes inserted by the batch are not.
    pub fn serialize_pre_edit(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write(id, "", true, &mut out);
        out
    }

    pub fn to_source(&self) -> String {
        let mut out = self.serialize(self.root);
        if self.missing_final_newline && out.ends_with('\n') {
            out.pop();
        }
        out
    }

    fn shown(&self, id: NodeId, pre_edit: bool) -> bool {
        let node = &self.nodes[id];
        if pre_edit { !node.new } else { !node.hidden }
    }

    fn shown_children(&self, id: NodeId, pre_edit: bool) -> Vec<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.shown(c, pre_edit))
            .collect()
    }

    fn write(&self, id: NodeId, indent: &str, pre_edit: bool, out: &mut String) {
        if !self.shown(id, pre_edit) {
            return;
        }
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Module | NodeKind::Clauses => self.write_lines(id, indent, pre_edit, out),
            NodeKind::Block => {
                out.push_str(&node.text);
                if node.inline {
                    for child in self.shown_children(id, pre_edit) {
                        self.write(child, indent, pre_edit, out);
                    }
                } else {
                    let inner = format!("{indent}{}", node.indent.as_deref().unwrap_or(""));
                    self.write_lines(id, &inner, pre_edit, out);
                }
            }
            NodeKind::Decorators => {
                let children = self.shown_children(id, pre_edit);
                for (i, &child) in children.iter().enumerate() {
                    if i > 0 && self.nodes[child].kind != NodeKind::EmptyLine {
                        out.push_str(indent);
                    }
                    self.write(child, indent, pre_edit, out);
                }
                if !children.is_empty() {
                    out.push_str(indent);
                }
            }
            kind if kind.is_leaf() => out.push_str(&node.text),
            _ => {
                for child in self.shown_children(id, pre_edit) {
                    self.write(child, indent, pre_edit, out);
                }
            }
        }
    }

    fn write_lines(&self, id: NodeId, indent: &str, pre_edit: bool, out: &mut String) {
        for child in self.shown_children(id, pre_edit) {
            let node = &self.nodes[child];
            match node.kind {
                NodeKind::EmptyLine => out.push_str(&node.text),
                NodeKind::CommentLine => {
                    out.push_str(node.indent.as_deref().unwrap_or(indent));
                    out.push_str(&node.text);
                }
                _ => {
                    out.push_str(indent);
                    self.write(child, indent, pre_edit, out);
                }
            }
        }
    }
}

/// Borrowed, copyable view of one node.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub tree: &'a Tree,
    pub id: NodeId,
}

impl<'a> NodeRef<'a> {
    pub fn node(&self) -> &'a Node {
        self.tree.node(self.id)
    }

    pub fn kind(&self) -> NodeKind {
        self.node().kind
    }

    pub fn role(&self) -> Role {
        self.node().role
    }

    pub fn text(&self) -> &'a str {
        &self.node().text
    }

    pub fn serialize(&self) -> String {
        self.tree.serialize(self.id)
    }

    pub fn children(&self) -> Vec<NodeRef<'a>> {
        self.tree
            .visible_children(self.id)
            .into_iter()
            .map(|id| self.tree.get(id))
            .collect()
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| self.tree.get(id))
    }

    pub fn field(&self, role: Role, nth: usize) -> Option<NodeRef<'a>> {
        self.tree.field(self.id, role, nth).map(|id| self.tree.get(id))
    }

    /// Text of a field, trimmed; empty when the field is absent.
    pub fn field_text(&self, role: Role) -> String {
        self.field(role, 0)
            .map(|f| f.serialize().trim().to_string())
            .unwrap_or_default()
    }

    /// Durable identity within the node's own container.
    pub fn stable_key(&self) -> Option<StableKey> {
        match self.kind() {
            NodeKind::Function | NodeKind::Class => {
                Some(StableKey::Def(self.kind(), self.field_text(Role::Name)))
            }
            NodeKind::FromImport => Some(StableKey::Import(self.field_text(Role::Module))),
            NodeKind::Import => Some(StableKey::Import(self.field_text(Role::Names))),
            NodeKind::Assignment => Some(StableKey::Assign(self.field_text(Role::Target))),
            NodeKind::Return | NodeKind::If => {
                let parent = self.parent()?;
                let same = parent
                    .children()
                    .iter()
                    .filter(|c| c.kind() == self.kind())
                    .count();
                match (same, self.kind()) {
                    (1, NodeKind::Return) => Some(StableKey::LoneReturn),
                    (1, _) => Some(StableKey::SoleIf),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Key of an item inside an inline list.
    pub fn item_key(&self) -> String {
        match self.kind() {
            NodeKind::ImportName => self
                .text()
                .split(" as ")
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            NodeKind::DictItem => match self.field(Role::Key, 0) {
                Some(key) => key.serialize().trim().to_string(),
                None => self.serialize().trim().to_string(),
            },
            NodeKind::Argument => {
                if let Some(name) = self.field(Role::Name, 0) {
                    return name.text().trim().to_string();
                }
                let text = self.serialize();
                let text = text.trim();
                let parent_kind = self.parent().map(|p| p.kind());
                if parent_kind == Some(NodeKind::Params) {
                    let name: String = text
                        .trim_start_matches('*')
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    return if name.is_empty() { text.to_string() } else { name };
                }
                if parent_kind == Some(NodeKind::Bases) || self.field(Role::Op, 0).is_some() {
                    return text.to_string();
                }
                let position = self
                    .parent()
                    .map(|p| {
                        p.children()
                            .iter()
                            .take_while(|c| c.id != self.id)
                            .filter(|c| c.is_positional())
                            .count()
                    })
                    .unwrap_or(0);
                format!("#{position}")
            }
            _ => self.serialize().trim().to_string(),
        }
    }

    /// Positional call argument (no keyword, no unpacking).
    pub fn is_positional(&self) -> bool {
        self.kind() == NodeKind::Argument
            && self.field(Role::Name, 0).is_none()
            && self.field(Role::Op, 0).is_none()
    }

    /// Items of an inline list, separators and brackets excluded.
    pub fn items(&self) -> Vec<NodeRef<'a>> {
        self.children()
            .into_iter()
            .filter(|c| c.role() == Role::Item)
            .collect()
    }
}

/// Owned, detached copy of a subtree, carried by change actions between trees.
#[derive(Debug, Clone)]
pub struct Fragment {
    tree: Tree,
    root: NodeId,
    text: String,
}

impl Fragment {
    pub fn of(node: NodeRef<'_>) -> Self {
        let mut tree = Tree::detached();
        let root = tree.import(node);
        tree.root = root;
        Self {
            tree,
            root,
            text: node.serialize(),
        }
    }

    pub fn node(&self) -> NodeRef<'_> {
        self.tree.get(self.root)
    }

    pub fn kind(&self) -> NodeKind {
        self.node().kind()
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(tree: &mut Tree, parent: NodeId, kind: NodeKind, text: &str) -> NodeId {
        let id = tree.add(kind, Role::Item, text);
        tree.append(parent, id);
        id
    }

    #[test]
    fn test_hidden_nodes_keep_their_slot() {
        let mut tree = Tree::new();
        let root = tree.root();
        let a = line(&mut tree, root, NodeKind::CommentLine, "# a\n");
        let b = line(&mut tree, root, NodeKind::CommentLine, "# b\n");
        tree.hide(a);
        assert_eq!(tree.to_source(), "# b\n");
        assert_eq!(tree.node(root).children, vec![a, b]);
        assert_eq!(tree.node(b).index, 1);
    }

    #[test]
    fn test_pre_edit_serialization_keeps_hidden_drops_new() {
        let mut tree = Tree::new();
        let root = tree.root();
        let stmt = tree.add(NodeKind::ExprStmt, Role::Item, "");
        tree.append(root, stmt);
        let value = tree.add(NodeKind::Expr, Role::Value, "old()");
        tree.append(stmt, value);
        let added = tree.add(NodeKind::Trailer, Role::Trailer, "  # added\n");
        tree.node_mut(added).new = true;
        tree.append(stmt, added);
        tree.hide(stmt);
        assert_eq!(tree.serialize(stmt), "");
        assert_eq!(tree.serialize_pre_edit(stmt), "old()");
    }

    #[test]
    fn test_block_indent_is_relative() {
        let mut tree = Tree::new();
        let root = tree.root();
        let stmt = tree.add(NodeKind::Compound, Role::Item, "");
        tree.append(root, stmt);
        let header = tree.add(NodeKind::Syntax, Role::Header, "while True:");
        tree.append(stmt, header);
        let block = tree.add(NodeKind::Block, Role::Body, "\n");
        tree.node_mut(block).indent = Some("  ".into());
        tree.append(stmt, block);
        line(&mut tree, block, NodeKind::CommentLine, "# inside\n");
        assert_eq!(tree.to_source(), "while True:\n  # inside\n");
        assert_eq!(tree.serialize(block), "\n  # inside\n");
    }

    #[test]
    fn test_import_flags_copies_new() {
        let mut source = Tree::new();
        let root = source.root();
        line(&mut source, root, NodeKind::EmptyLine, "\n");
        let mut target = Tree::new();
        let copy = target.import(source.root_ref());
        assert!(target.node(copy).new);
        assert_eq!(target.serialize(copy), "\n");
        target.finish_batch();
        assert!(!target.node(copy).new);
    }

    #[test]
    fn test_fragment_keeps_text() {
        let mut tree = Tree::new();
        let root = tree.root();
        let c = line(&mut tree, root, NodeKind::CommentLine, "# keep\n");
        let fragment = Fragment::of(tree.get(c));
        assert_eq!(fragment.text(), "# keep\n");
        assert_eq!(fragment.kind(), NodeKind::CommentLine);
    }
}
