//! Replays change actions on a live tree.
//!
//! Expected mismatches (target missing, context gone, content changed on both
//! sides) become [`Conflict`] values and the replay goes on. Only an edit that
//! leaves the tree unparseable is an error.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::actions::{ChangeAction, ElementLocator};
use crate::config::MergeConfig;
use crate::context::{AnchorContext, View, choose, find_context, find_context_with_reduction};
use crate::error::{MergeError, Result};
use crate::matcher::SimilarityMatcher;
use crate::parser::check_fragment;
use crate::tree::{Fragment, Tree};
use crate::types::{Conflict, ConflictReason, NodeId, NodeKind, Role};

impl ChangeAction {
    /// Apply this action to `target` of `tree`.
    pub fn apply(&self, tree: &mut Tree, target: NodeId, config: &MergeConfig) -> Result<Vec<Conflict>> {
        Applier::new(config).apply(tree, target, self)
    }
}

pub struct Applier<'c> {
    config: &'c MergeConfig,
}

impl<'c> Applier<'c> {
    pub fn new(config: &'c MergeConfig) -> Self {
        Self { config }
    }

    pub fn apply_all(&self, tree: &mut Tree, target: NodeId, actions: &[ChangeAction]) -> Result<Vec<Conflict>> {
        let mut conflicts = Vec::new();
        for action in actions {
            conflicts.extend(self.apply(tree, target, action)?);
        }
        Ok(conflicts)
    }

    pub fn apply(&self, tree: &mut Tree, target: NodeId, action: &ChangeAction) -> Result<Vec<Conflict>> {
        debug!(%action, node = target, "applying change");
        let conflicts = match action {
            ChangeAction::Insert { nodes, context } => self.insert(tree, target, action, nodes, context),
            ChangeAction::Remove { nodes, context } => self.remove(tree, target, action, nodes, context),
            ChangeAction::Edit { locator, changes } => {
                return self.edit(tree, target, action, locator, changes);
            }
            ChangeAction::Move { locator, context } => self.move_element(tree, target, action, locator, context),
            ChangeAction::Unwrap { locator } => self.unwrap_scope(tree, target, action, locator),
            ChangeAction::Replace { old, new } => replace(tree, target, action, old, new),
            ChangeAction::Field { role, nth, changes } => {
                return match tree.field(target, *role, *nth) {
                    Some(field) => self.apply_all(tree, field, changes),
                    None => Ok(vec![conflict(tree, target, ConflictReason::FieldNotFound, action)]),
                };
            }
            ChangeAction::SetText { old, new, patch } => set_text(tree, target, action, old, new, patch.as_deref()),
            ChangeAction::InsertItem {
                node,
                key,
                after,
                sorted,
            } => insert_item(tree, target, action, node, key, after.as_deref(), *sorted),
            ChangeAction::RemoveItem { key, value } => remove_item(tree, target, action, key, value),
            ChangeAction::EditItem { key, changes } => {
                return match find_item(tree, target, key) {
                    Some(item) => self.apply_all(tree, item, changes),
                    None => Ok(vec![conflict(tree, target, ConflictReason::ElementNotFound, action)]),
                };
            }
            ChangeAction::ReorderItems { keys } => {
                reorder_items(tree, target, keys);
                Vec::new()
            }
            ChangeAction::SetBrackets {
                old_open,
                old_close,
                open,
                close,
            } => {
                let had_trailing = has_trailing(tree, target);
                set_bracket(tree, target, Role::Open, old_open.as_deref(), open.as_deref());
                set_bracket(tree, target, Role::Close, old_close.as_deref(), close.as_deref());
                fix_separators(tree, target, had_trailing && is_bracketed(tree, target));
                Vec::new()
            }
            ChangeAction::SetTrailing { text } => {
                set_trailing(tree, target, text.as_deref());
                Vec::new()
            }
            ChangeAction::SetSeparator { key, text } => {
                set_separator(tree, target, key, text);
                Vec::new()
            }
            ChangeAction::SetInline { inline, lead, indent } => set_inline(tree, target, action, *inline, lead, indent),
            ChangeAction::SetIndent { old, new } => {
                let current = tree.node(target).indent.clone();
                if current == *old {
                    tree.node_mut(target).indent = new.clone();
                } else if current != *new {
                    debug!(?current, "block indentation differs on both sides; keeping current");
                }
                Vec::new()
            }
            ChangeAction::SetBlankLines { context, count } => {
                set_blank_lines(tree, target, context, *count);
                Vec::new()
            }
        };
        for c in &conflicts {
            debug!(reason = %c.reason, action = %c.action, "conflict");
        }
        self.settle(tree, target, action)?;
        Ok(conflicts)
    }

    fn insert(
        &self,
        tree: &mut Tree,
        container: NodeId,
        action: &ChangeAction,
        nodes: &[Fragment],
        context: &AnchorContext,
    ) -> Vec<Conflict> {
        let node = tree.node(container);
        if node.kind == NodeKind::Block && node.inline {
            return vec![conflict(tree, container, ConflictReason::ContextNotFound, action)];
        }
        let gaps = find_context_with_reduction(tree, container, context);
        let Some(gap) = choose(tree, container, &gaps) else {
            return vec![conflict(tree, container, ConflictReason::ContextNotFound, action)];
        };

        let following = visible_from(tree, container, gap);
        let already = nodes.len() <= following.len()
            && nodes
                .iter()
                .zip(&following)
                .all(|(n, &f)| tree.serialize(f) == n.text());
        if already {
            trace!("content already present at its position");
            tree.node_mut(container).cursor = Some(gap + nodes.len());
            return Vec::new();
        }

        let keyed: HashSet<String> = tree
            .visible_children(container)
            .into_iter()
            .filter(|&c| tree.get(c).stable_key().is_some())
            .map(|c| tree.serialize(c))
            .collect();
        let anchor = visible_before(tree, container, gap);
        let mut index = gap;
        for fragment in nodes {
            if fragment.node().stable_key().is_some() && keyed.contains(fragment.text()) {
                trace!(text = fragment.text(), "keyed element already present");
                continue;
            }
            let id = tree.import(fragment.node());
            tree.insert(container, index, id);
            if let Some(anchor) = anchor {
                tree.anchor(anchor, id);
            }
            index += 1;
        }
        tree.node_mut(container).cursor = Some(index);
        Vec::new()
    }

    fn remove(
        &self,
        tree: &mut Tree,
        container: NodeId,
        action: &ChangeAction,
        nodes: &[Fragment],
        context: &AnchorContext,
    ) -> Vec<Conflict> {
        let matcher = SimilarityMatcher::new(self.config);
        let mut gaps = find_context_with_reduction(tree, container, context);
        if let Some(preferred) = choose(tree, container, &gaps) {
            gaps.retain(|&g| g != preferred);
            gaps.insert(0, preferred);
        }

        for gap in gaps {
            let live = visible_from(tree, container, gap);
            let mut hides = Vec::new();
            let mut conflicts = Vec::new();
            let mut j = 0;
            for fragment in nodes {
                let Some(&id) = live.get(j) else { break };
                if tree.serialize(id) == fragment.text() {
                    hides.push(id);
                    j += 1;
                } else if !fragment.kind().is_formatting() && matcher.same_element(fragment.node(), tree.get(id)) {
                    conflicts.push(conflict(tree, id, ConflictReason::RemovedElementModified, action));
                    j += 1;
                }
            }
            if hides.is_empty() && conflicts.is_empty() {
                continue;
            }
            for id in hides {
                tree.hide(id);
            }
            tree.node_mut(container).cursor = Some(gap);
            return conflicts;
        }

        // No usable context: fall back to element identity.
        let mut conflicts = Vec::new();
        for fragment in nodes.iter().filter(|n| !n.kind().is_formatting()) {
            let visible = tree.visible_children(container);
            let exact: Vec<NodeId> = visible
                .iter()
                .copied()
                .filter(|&c| tree.serialize(c) == fragment.text())
                .collect();
            if let [only] = exact[..] {
                tree.hide(only);
                continue;
            }
            if !exact.is_empty() {
                conflicts.push(conflict(tree, exact[0], ConflictReason::Ambiguous, action));
                continue;
            }
            let similar = visible
                .iter()
                .copied()
                .find(|&c| matcher.same_element(fragment.node(), tree.get(c)));
            match similar {
                Some(id) => conflicts.push(conflict(tree, id, ConflictReason::RemovedElementModified, action)),
                None => trace!(text = fragment.text(), "already removed"),
            }
        }
        conflicts
    }

    fn edit(
        &self,
        tree: &mut Tree,
        container: NodeId,
        action: &ChangeAction,
        locator: &ElementLocator,
        changes: &[ChangeAction],
    ) -> Result<Vec<Conflict>> {
        let Some(element) = self.locate(tree, container, locator) else {
            return Ok(vec![conflict(tree, container, ConflictReason::ElementNotFound, action)]);
        };
        let mut conflicts = self.apply_all(tree, element, changes)?;
        for c in &mut conflicts {
            if c.at.is_none() {
                c.at = Some(element);
            }
        }
        let index = tree.node(element).index;
        tree.node_mut(container).cursor = Some(index + 1);
        Ok(conflicts)
    }

    /// Find the live counterpart of a located element, trying stable key,
    /// surrounding context, unique exact content and finally similarity.
    pub fn locate(&self, tree: &Tree, container: NodeId, locator: &ElementLocator) -> Option<NodeId> {
        let visible = tree.visible_children(container);
        let value = locator.value.node();

        if let Some(key) = &locator.key {
            let hits: Vec<NodeId> = visible
                .iter()
                .copied()
                .filter(|&c| tree.get(c).stable_key().as_ref() == Some(key))
                .collect();
            if let [only] = hits[..] {
                trace!(%key, "located by key");
                return Some(only);
            }
        }

        let mut by_context = Vec::new();
        for view in [View::Current, View::PreEdit] {
            for gap in find_context(tree, container, &locator.before, view) {
                if let Some(&id) = visible_from(tree, container, gap).first() {
                    by_context.push(id);
                }
            }
            for gap in find_context(tree, container, &locator.after, view) {
                if let Some(id) = visible_before(tree, container, gap) {
                    by_context.push(id);
                }
            }
        }
        by_context.retain(|&id| tree.node(id).kind == value.kind());
        by_context.sort_unstable();
        by_context.dedup();
        if let [only] = by_context[..] {
            trace!("located by context");
            return Some(only);
        }

        let text = locator.value.text();
        let exact: Vec<NodeId> = visible
            .iter()
            .copied()
            .filter(|&c| tree.serialize(c) == text)
            .collect();
        if let [only] = exact[..] {
            trace!("located by content");
            return Some(only);
        }

        let matcher = SimilarityMatcher::new(self.config);
        let cursor = tree.node(container).cursor.unwrap_or(0);
        let (after, before): (Vec<NodeId>, Vec<NodeId>) =
            visible.into_iter().partition(|&c| tree.node(c).index >= cursor);
        after
            .into_iter()
            .chain(before)
            .find(|&c| matcher.same_element(value, tree.get(c)))
    }

    fn move_element(
        &self,
        tree: &mut Tree,
        container: NodeId,
        action: &ChangeAction,
        locator: &ElementLocator,
        context: &AnchorContext,
    ) -> Vec<Conflict> {
        let Some(element) = self.locate(tree, container, locator) else {
            return vec![conflict(tree, container, ConflictReason::ElementNotFound, action)];
        };
        let gaps = find_context_with_reduction(tree, container, context);
        let Some(gap) = choose(tree, container, &gaps) else {
            return vec![conflict(tree, element, ConflictReason::ContextNotFound, action)];
        };
        if gap == tree.node(element).index || visible_before(tree, container, gap) == Some(element) {
            trace!("element already in place");
            return Vec::new();
        }

        let followers: Vec<NodeId> = tree
            .followers(element)
            .into_iter()
            .filter(|&f| !tree.node(f).hidden && tree.node(f).parent == Some(container))
            .collect();
        let copy = duplicate(tree, element);
        tree.insert(container, gap, copy);
        tree.hide(element);
        let mut index = gap + 1;
        for follower in followers {
            let moved = duplicate(tree, follower);
            tree.insert(container, index, moved);
            tree.hide(follower);
            tree.anchor(copy, moved);
            index += 1;
        }
        tree.node_mut(container).cursor = Some(index);
        Vec::new()
    }

    fn unwrap_scope(&self, tree: &mut Tree, container: NodeId, action: &ChangeAction, locator: &ElementLocator) -> Vec<Conflict> {
        let Some(element) = self.locate(tree, container, locator) else {
            return vec![conflict(tree, container, ConflictReason::ElementNotFound, action)];
        };
        let Some(body) = tree.field(element, Role::Body, 0) else {
            return vec![conflict(tree, element, ConflictReason::FieldNotFound, action)];
        };
        let depth = tree.node(body).indent.as_deref().map_or(0, str::len);
        let mut index = tree.node(element).index + 1;
        for child in tree.visible_children(body) {
            tree.detach(child);
            dedent_comments(tree, child, depth);
            tree.insert(container, index, child);
            index += 1;
        }
        tree.hide(element);
        tree.node_mut(container).cursor = Some(index);
        Vec::new()
    }

    /// Post-apply invariants: hide emptied owners, then re-parse the enclosing
    /// top-level statement.
    fn settle(&self, tree: &mut Tree, target: NodeId, action: &ChangeAction) -> Result<()> {
        if action.is_delegating() {
            return Ok(());
        }
        let node = tree.node(target);
        let emptied = match node.kind {
            NodeKind::Block => !tree
                .visible_children(target)
                .into_iter()
                .any(|c| tree.node(c).kind.is_statement()),
            NodeKind::ImportNames => items(tree, target).is_empty(),
            _ => false,
        };
        if let Some(owner) = tree.node(target).parent.filter(|_| emptied) {
            debug!(kind = %tree.node(owner).kind, "hiding emptied statement");
            tree.hide(owner);
        }

        if !self.config.validate {
            return Ok(());
        }
        let scope = match tree.top_level(target) {
            Some(top) if tree.is_detached_or_hidden(top) => return Ok(()),
            Some(top) => top,
            None => tree.root(),
        };
        let text = tree.serialize(scope);
        if let Err(err) = check_fragment(&text) {
            let line = match err {
                crate::error::ParseError::Syntax { line, .. } => line,
                _ => 1,
            };
            return Err(MergeError::InvalidResult {
                action: action.describe(),
                snippet: excerpt(&text, line),
            });
        }
        Ok(())
    }
}

fn conflict(tree: &Tree, node: NodeId, reason: ConflictReason, action: &ChangeAction) -> Conflict {
    let conflict = Conflict::new(reason, action.describe(), action.subjects());
    match tree.line_element(node) {
        Some(at) => conflict.at(at),
        None => conflict,
    }
}

fn excerpt(text: &str, line: usize) -> String {
    text.lines()
        .enumerate()
        .skip(line.saturating_sub(3))
        .take(5)
        .map(|(i, l)| format!("{:>4} | {l}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Visible children at or after full index `gap`.
fn visible_from(tree: &Tree, container: NodeId, gap: usize) -> Vec<NodeId> {
    tree.node(container)
        .children
        .iter()
        .skip(gap)
        .copied()
        .filter(|&c| !tree.node(c).hidden)
        .collect()
}

/// Last visible child before full index `gap`.
fn visible_before(tree: &Tree, container: NodeId, gap: usize) -> Option<NodeId> {
    tree.node(container)
        .children
        .iter()
        .take(gap)
        .rev()
        .copied()
        .find(|&c| !tree.node(c).hidden)
}

fn duplicate(tree: &mut Tree, id: NodeId) -> NodeId {
    let fragment = Fragment::of(tree.get(id));
    tree.import(fragment.node())
}

/// Shift absolute comment indents after a subtree moved `depth` columns left.
fn dedent_comments(tree: &mut Tree, id: NodeId, depth: usize) {
    let node = tree.node_mut(id);
    if node.kind == NodeKind::CommentLine {
        if let Some(indent) = &mut node.indent {
            let cut = depth.min(indent.len());
            indent.drain(..cut);
        }
    }
    for child in tree.node(id).children.clone() {
        dedent_comments(tree, child, depth);
    }
}

fn replace(tree: &mut Tree, target: NodeId, action: &ChangeAction, old: &Fragment, new: &Fragment) -> Vec<Conflict> {
    let current = tree.serialize(target);
    if current == new.text() {
        return Vec::new();
    }
    if current != old.text() {
        return vec![conflict(tree, target, ConflictReason::ContentDiverged, action)];
    }
    let Some(parent) = tree.node(target).parent else {
        return vec![conflict(tree, target, ConflictReason::ElementNotFound, action)];
    };
    let role = tree.node(target).role;
    let index = tree.node(target).index;
    let copy = tree.import(new.node());
    tree.node_mut(copy).role = role;
    tree.insert(parent, index, copy);
    tree.hide(target);
    Vec::new()
}

fn set_text(
    tree: &mut Tree,
    target: NodeId,
    action: &ChangeAction,
    old: &str,
    new: &str,
    patch: Option<&str>,
) -> Vec<Conflict> {
    let current = tree.node(target).text.clone();
    if current == new {
        return Vec::new();
    }
    if current == old {
        tree.set_text(target, new);
        return Vec::new();
    }
    let patched = patch
        .and_then(|p| diffy::Patch::from_str(p).ok())
        .and_then(|p| diffy::apply(&current, &p).ok());
    match patched {
        Some(text) => {
            trace!("text merged through patch");
            tree.set_text(target, text);
            Vec::new()
        }
        None => vec![conflict(tree, target, ConflictReason::ContentDiverged, action)],
    }
}

fn set_inline(
    tree: &mut Tree,
    block: NodeId,
    action: &ChangeAction,
    inline: bool,
    lead: &str,
    indent: &Option<String>,
) -> Vec<Conflict> {
    if tree.node(block).inline == inline {
        return Vec::new();
    }
    if inline {
        let children = tree.visible_children(block);
        if children.len() != 1 || !tree.node(children[0]).kind.is_statement() {
            return vec![conflict(tree, block, ConflictReason::ContentDiverged, action)];
        }
    } else {
        let indent = indent.clone().unwrap_or_else(|| "    ".to_string());
        tree.node_mut(block).indent = Some(indent);
    }
    let node = tree.node_mut(block);
    node.inline = inline;
    node.text = lead.to_string();
    Vec::new()
}

fn set_blank_lines(tree: &mut Tree, container: NodeId, context: &AnchorContext, count: usize) {
    let gaps = find_context(tree, container, context, View::Current);
    let Some(gap) = choose(tree, container, &gaps) else {
        trace!("blank-line context not found; keeping current spacing");
        return;
    };
    let run: Vec<NodeId> = visible_from(tree, container, gap)
        .into_iter()
        .take_while(|&c| tree.node(c).kind == NodeKind::EmptyLine)
        .collect();
    if run.len() > count {
        for &id in &run[count..] {
            tree.hide(id);
        }
    } else {
        let mut index = run.last().map_or(gap, |&last| tree.node(last).index + 1);
        for _ in run.len()..count {
            let id = tree.add(NodeKind::EmptyLine, Role::Item, "\n");
            tree.node_mut(id).new = true;
            tree.insert(container, index, id);
            index += 1;
        }
    }
}

// Inline lists.

fn items(tree: &Tree, list: NodeId) -> Vec<NodeId> {
    tree.visible_children(list)
        .into_iter()
        .filter(|&c| tree.node(c).role == Role::Item)
        .collect()
}

fn find_item(tree: &Tree, list: NodeId, key: &str) -> Option<NodeId> {
    items(tree, list)
        .into_iter()
        .find(|&i| tree.get(i).item_key() == key)
}

fn is_bracketed(tree: &Tree, list: NodeId) -> bool {
    tree.field(list, Role::Open, 0).is_some()
}

fn has_trailing(tree: &Tree, list: NodeId) -> bool {
    tree.visible_children(list)
        .into_iter()
        .rev()
        .find(|&c| tree.node(c).role != Role::Close)
        .is_some_and(|c| tree.node(c).kind == NodeKind::Separator)
}

fn separator(tree: &mut Tree, text: &str) -> NodeId {
    let id = tree.add(NodeKind::Separator, Role::Sep, text);
    tree.node_mut(id).new = true;
    id
}

/// Restore `item, sep, item, ...` after items were added or hidden.
fn fix_separators(tree: &mut Tree, list: NodeId, keep_trailing: bool) {
    let bracketed = is_bracketed(tree, list);
    let body: Vec<NodeId> = tree
        .visible_children(list)
        .into_iter()
        .filter(|&c| !matches!(tree.node(c).role, Role::Open | Role::Close))
        .collect();
    let style = body
        .windows(3)
        .find(|w| {
            tree.node(w[0]).role == Role::Item
                && tree.node(w[1]).kind == NodeKind::Separator
                && tree.node(w[2]).role == Role::Item
        })
        .map(|w| tree.node(w[1]).text.clone())
        .filter(|s| bracketed || !(s.contains('\n') || s.contains('#')))
        .unwrap_or_else(|| ", ".to_string());

    let mut previous_is_item: Option<bool> = None;
    for id in body {
        let is_item = tree.node(id).role == Role::Item;
        match (previous_is_item, is_item) {
            (None | Some(false), false) => {
                tree.hide(id);
                continue;
            }
            (Some(true), true) => {
                let sep = separator(tree, &style);
                let index = tree.node(id).index;
                tree.insert(list, index, sep);
            }
            _ => {}
        }
        if !bracketed && !is_item {
            let text = &tree.node(id).text;
            if text.contains('\n') || text.contains('#') {
                tree.set_text(id, ", ");
            }
        }
        previous_is_item = Some(is_item);
    }
    if previous_is_item == Some(false) && !keep_trailing {
        if let Some(last) = tree
            .visible_children(list)
            .into_iter()
            .rev()
            .find(|&c| tree.node(c).role != Role::Close)
        {
            tree.hide(last);
        }
    }
}

fn insert_item(
    tree: &mut Tree,
    list: NodeId,
    action: &ChangeAction,
    node: &Fragment,
    key: &str,
    after: Option<&str>,
    sorted: bool,
) -> Vec<Conflict> {
    if let Some(existing) = find_item(tree, list, key) {
        if tree.serialize(existing).trim() == node.text().trim() {
            return Vec::new();
        }
        return vec![conflict(tree, list, ConflictReason::AlreadyPresent, action)];
    }
    let had_trailing = has_trailing(tree, list);
    let current = items(tree, list);
    let keys: Vec<String> = current.iter().map(|&i| tree.get(i).item_key()).collect();
    let after_last = current.last().map(|&i| tree.node(i).index + 1);
    let before_first = current.first().map(|&i| tree.node(i).index).unwrap_or_else(|| {
        tree.field(list, Role::Close, 0)
            .map_or(tree.node(list).children.len(), |close| tree.node(close).index)
    });

    let index = if sorted && keys.windows(2).all(|w| w[0] <= w[1]) {
        match keys.iter().position(|k| k.as_str() > key) {
            Some(p) => tree.node(current[p]).index,
            None => after_last.unwrap_or(before_first),
        }
    } else {
        match after {
            Some(prev) => match find_item(tree, list, prev) {
                Some(item) => tree.node(item).index + 1,
                None => after_last.unwrap_or(before_first),
            },
            None => before_first,
        }
    };
    let copy = tree.import(node.node());
    tree.insert(list, index, copy);
    fix_separators(tree, list, had_trailing);
    Vec::new()
}

fn remove_item(tree: &mut Tree, list: NodeId, action: &ChangeAction, key: &str, value: &str) -> Vec<Conflict> {
    let Some(item) = find_item(tree, list, key) else {
        trace!(key, "item already removed");
        return Vec::new();
    };
    if tree.serialize(item).trim() != value {
        return vec![conflict(tree, item, ConflictReason::RemovedElementModified, action)];
    }
    let had_trailing = has_trailing(tree, list);
    tree.hide(item);
    fix_separators(tree, list, had_trailing);
    Vec::new()
}

fn reorder_items(tree: &mut Tree, list: NodeId, keys: &[String]) {
    let mut present: Vec<(usize, NodeId)> = items(tree, list)
        .into_iter()
        .filter_map(|i| {
            let key = tree.get(i).item_key();
            keys.iter().position(|k| *k == key).map(|p| (p, i))
        })
        .collect();
    let slots: Vec<usize> = present.iter().map(|&(_, i)| tree.node(i).index).collect();
    present.sort_by_key(|&(p, _)| p);
    for (slot, (_, id)) in slots.into_iter().zip(present) {
        tree.node_mut(list).children[slot] = id;
    }
    tree.reindex(list);
}

fn set_bracket(tree: &mut Tree, list: NodeId, role: Role, old: Option<&str>, new: Option<&str>) {
    let current = tree.field(list, role, 0);
    let current_text = current.map(|id| tree.node(id).text.clone());
    if current_text.as_deref() == new {
        return;
    }
    match (current, new) {
        (Some(id), Some(text)) => {
            if current_text.as_deref() == old {
                tree.set_text(id, text);
            }
        }
        (Some(id), None) => tree.hide(id),
        (None, Some(text)) => {
            let id = tree.add(NodeKind::Syntax, role, text);
            tree.node_mut(id).new = true;
            let index = if role == Role::Open {
                0
            } else {
                tree.node(list).children.len()
            };
            tree.insert(list, index, id);
        }
        (None, None) => {}
    }
}

fn set_trailing(tree: &mut Tree, list: NodeId, text: Option<&str>) {
    let Some(&last) = items(tree, list).last() else {
        return;
    };
    let next = tree
        .visible_children(list)
        .into_iter()
        .find(|&c| tree.node(c).index > tree.node(last).index)
        .filter(|&c| tree.node(c).kind == NodeKind::Separator);
    match (next, text) {
        (Some(sep), None) => tree.hide(sep),
        (None, Some(text)) if is_bracketed(tree, list) => {
            let sep = separator(tree, text);
            let index = tree.node(last).index + 1;
            tree.insert(list, index, sep);
        }
        _ => {}
    }
}

fn set_separator(tree: &mut Tree, list: NodeId, key: &str, text: &str) {
    if !is_bracketed(tree, list) && text.contains('\n') {
        return;
    }
    let Some(item) = find_item(tree, list, key) else {
        return;
    };
    let visible = tree.visible_children(list);
    let Some(pos) = visible.iter().position(|&c| c == item) else {
        return;
    };
    if let (Some(&sep), Some(&next)) = (visible.get(pos + 1), visible.get(pos + 2)) {
        if tree.node(sep).kind == NodeKind::Separator && tree.node(next).role == Role::Item {
            tree.set_text(sep, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::TreeComparator;
    use crate::parser::parse;

    /// Diff `base` against `other` and replay the result on `current`.
    fn replay(base: &str, other: &str, current: &str) -> (String, Vec<Conflict>) {
        let config = MergeConfig::default();
        let (b, o) = (parse(base).unwrap(), parse(other).unwrap());
        let actions = TreeComparator::new(&config).compute_diff(b.root_ref(), o.root_ref());
        let mut tree = parse(current).unwrap();
        tree.begin_batch();
        let root = tree.root();
        let conflicts = Applier::new(&config).apply_all(&mut tree, root, &actions).unwrap();
        tree.finish_batch();
        (tree.to_source(), conflicts)
    }

    #[test]
    fn test_insert_after_context() {
        let (merged, conflicts) = replay(
            "alpha = 1\nomega = 2\n",
            "alpha = 1\nmiddle = 0\nomega = 2\n",
            "alpha = 1\nlocal = 3\nomega = 2\n",
        );
        assert!(conflicts.is_empty());
        assert_eq!(merged, "alpha = 1\nmiddle = 0\nlocal = 3\nomega = 2\n");
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (merged, conflicts) = replay("import os\n", "import os\nimport sys\n", "import os\nimport sys\n");
        assert!(conflicts.is_empty());
        assert_eq!(merged, "import os\nimport sys\n");
    }

    #[test]
    fn test_remove_of_modified_element_conflicts() {
        let (merged, conflicts) = replay(
            "def f():\n    pass\n\nx = 1\n",
            "x = 1\n",
            "def f():\n    return 2\n\nx = 1\n",
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, ConflictReason::RemovedElementModified);
        assert!(merged.contains("return 2"));
    }

    #[test]
    fn test_statement_replaced_in_block() {
        let (merged, _) = replay(
            "if a:\n    x = 1\ny = 2\n",
            "if a:\n    pass\ny = 2\n",
            "if a:\n    x = 1\ny = 2\n",
        );
        assert_eq!(merged, "if a:\n    pass\ny = 2\n");
    }

    #[test]
    fn test_emptied_block_hides_owner() {
        let config = MergeConfig::default();
        let mut tree = parse("if a:\n    x = 1\ny = 2\n").unwrap();
        let statement = tree.visible_children(tree.root())[0];
        let body = tree.field(statement, Role::Body, 0).unwrap();
        let only = tree.visible_children(body)[0];
        let action = ChangeAction::Remove {
            nodes: vec![Fragment::of(tree.get(only))],
            context: AnchorContext::start(),
        };
        let conflicts = action.apply(&mut tree, body, &config).unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(tree.to_source(), "y = 2\n");
    }

    #[test]
    fn test_broken_statement_is_an_invalid_result() {
        let config = MergeConfig::default();
        let mut tree = parse("def f():\n    pass\n").unwrap();
        let function = tree.visible_children(tree.root())[0];
        let colon = tree.field(function, Role::Colon, 0).unwrap();
        let action = ChangeAction::SetText {
            old: ":".into(),
            new: "".into(),
            patch: None,
        };
        let err = Applier::new(&config).apply(&mut tree, colon, &action).unwrap_err();
        assert!(matches!(err, MergeError::InvalidResult { .. }));

        let lenient = MergeConfig {
            validate: false,
            ..MergeConfig::default()
        };
        let mut tree = parse("def f():\n    pass\n").unwrap();
        let function = tree.visible_children(tree.root())[0];
        let colon = tree.field(function, Role::Colon, 0).unwrap();
        assert!(Applier::new(&lenient).apply(&mut tree, colon, &action).is_ok());
    }

    #[test]
    fn test_context_not_found_is_a_conflict() {
        let config = MergeConfig::default();
        let mut tree = parse("x = 1\n").unwrap();
        let other = parse("y = 2\n").unwrap();
        let action = ChangeAction::Insert {
            nodes: vec![Fragment::of(other.root_ref().children()[0])],
            context: AnchorContext {
                orientation: crate::context::Orientation::Before,
                anchors: vec!["z = 3\n".into()],
                boundary: false,
            },
        };
        let root = tree.root();
        let conflicts = action.apply(&mut tree, root, &config).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, ConflictReason::ContextNotFound);
        assert_eq!(tree.to_source(), "x = 1\n");
    }

    #[test]
    fn test_set_text_conflicts_when_both_changed() {
        let (merged, conflicts) = replay("x = 'a'\n", "x = 'b'\n", "x = 'c'\n");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, ConflictReason::ContentDiverged);
        assert_eq!(merged, "x = 'c'\n");
    }

    #[test]
    fn test_call_argument_added() {
        let (merged, conflicts) = replay("f(a, b)\n", "f(a, b, c=1)\n", "f(a, b)  # note\n");
        assert!(conflicts.is_empty());
        assert_eq!(merged, "f(a, b, c=1)  # note\n");
    }

    #[test]
    fn test_argument_removed_keeps_separators() {
        let (merged, _) = replay("f(a, b=1, c=2)\n", "f(a, c=2)\n", "f(a, b=1, c=2, d=3)\n");
        assert_eq!(merged, "f(a, c=2, d=3)\n");
    }

    #[test]
    fn test_import_exploded_into_brackets() {
        let other = "from a import (\n    b,\n    c,\n)\n";
        let (merged, conflicts) = replay("from a import b\n", other, "from a import b\n");
        assert!(conflicts.is_empty());
        assert_eq!(merged, other);
    }

    #[test]
    fn test_inline_block_split() {
        let (merged, conflicts) = replay(
            "def f(): pass\n",
            "def f():\n    pass\n    return 1\n",
            "def f(): pass\n",
        );
        assert!(conflicts.is_empty());
        assert_eq!(merged, "def f():\n    pass\n    return 1\n");
    }

    #[test]
    fn test_blank_lines_normalized() {
        let (merged, _) = replay("a = 1\nb = 2\n", "a = 1\n\n\nb = 2\n", "a = 1\n\nb = 2\n");
        assert_eq!(merged, "a = 1\n\n\nb = 2\n");
    }

    #[test]
    fn test_function_move_onto_base() {
        let base = "def a():\n    pass\ndef b():\n    pass\nx = 1\n";
        let other = "def b():\n    pass\nx = 1\ndef a():\n    pass\n";
        let (merged, conflicts) = replay(base, other, base);
        assert!(conflicts.is_empty());
        assert_eq!(merged, other);
    }
}
