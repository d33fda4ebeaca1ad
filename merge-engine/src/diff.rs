//! Structural diff between two trees.
//!
//! `compute_diff(left, right)` returns the change actions that turn `left`
//! into `right`. Line containers are aligned element by element, composite
//! nodes are compared field by field, inline lists by item key and leaves by
//! text. Every action carries enough context to be replayed on a third tree.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::actions::{ChangeAction, ElementLocator};
use crate::config::MergeConfig;
use crate::context::{AnchorContext, Orientation, context_before, gather_after_context, gather_context};
use crate::matcher::{SimilarityMatcher, chain_of};
use crate::tree::{Fragment, NodeRef};
use crate::types::{Diagnostic, NodeKind, Role, StableKey};

pub struct TreeComparator<'c> {
    config: &'c MergeConfig,
    diagnostics: Vec<Diagnostic>,
}

/// Locator for `node` as found on the left side.
pub fn locator(node: NodeRef<'_>) -> ElementLocator {
    ElementLocator {
        key: node.stable_key(),
        before: gather_context(node),
        after: gather_after_context(node),
        value: Fragment::of(node),
    }
}

fn def_key(node: NodeRef<'_>) -> Option<StableKey> {
    match node.kind() {
        NodeKind::Function | NodeKind::Class => node.stable_key(),
        _ => None,
    }
}

/// Output of one sequence alignment.
#[derive(Default)]
struct Alignment {
    actions: Vec<ChangeAction>,
    /// Right-side indices waiting to be emitted as one insertion.
    pending: Vec<usize>,
    /// Starts of blank-line runs already normalized.
    blank_runs: HashSet<usize>,
}

impl<'c> TreeComparator<'c> {
    pub fn new(config: &'c MergeConfig) -> Self {
        Self {
            config,
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn compute_diff(&mut self, left: NodeRef<'_>, right: NodeRef<'_>) -> Vec<ChangeAction> {
        if left.serialize() == right.serialize() {
            return Vec::new();
        }
        if left.kind() != right.kind() {
            return vec![replace(left, right)];
        }
        match left.kind() {
            NodeKind::Block => self.diff_block(left, right),
            kind if kind.is_line_container() => self.align(left, right),
            kind if kind.is_inline_list() => self.diff_list(left, right),
            NodeKind::Compound => {
                let diagnostic = Diagnostic {
                    kind: NodeKind::Compound,
                    message: format!(
                        "no structural comparison for `{}`; keeping current content",
                        left.serialize().lines().next().unwrap_or_default().trim()
                    ),
                };
                warn!(%diagnostic, "unsupported construct");
                self.diagnostics.push(diagnostic);
                Vec::new()
            }
            kind if kind.is_leaf() => vec![set_text(left, right)],
            _ => self.diff_fields(left, right),
        }
    }

    fn diff_block(&mut self, left: NodeRef<'_>, right: NodeRef<'_>) -> Vec<ChangeAction> {
        let (l, r) = (left.node(), right.node());
        if l.inline != r.inline {
            let toggle = ChangeAction::SetInline {
                inline: r.inline,
                lead: r.text.clone(),
                indent: r.indent.clone(),
            };
            let body = self.align(left, right);
            // Statements are added or removed while the block is multi-line.
            return if r.inline {
                body.into_iter().chain([toggle]).collect()
            } else {
                [toggle].into_iter().chain(body).collect()
            };
        }
        let mut actions = Vec::new();
        if l.text != r.text {
            actions.push(ChangeAction::SetText {
                old: l.text.clone(),
                new: r.text.clone(),
                patch: None,
            });
        }
        if l.indent != r.indent {
            actions.push(ChangeAction::SetIndent {
                old: l.indent.clone(),
                new: r.indent.clone(),
            });
        }
        actions.extend(self.align(left, right));
        actions
    }

    fn diff_fields(&mut self, left: NodeRef<'_>, right: NodeRef<'_>) -> Vec<ChangeAction> {
        let (lc, rc) = (left.children(), right.children());
        if lc.len() != rc.len() || lc.iter().zip(&rc).any(|(l, r)| l.role() != r.role()) {
            return vec![replace(left, right)];
        }
        let mut actions = Vec::new();
        let mut seen: HashMap<Role, usize> = HashMap::new();
        for (l, r) in lc.into_iter().zip(rc) {
            let nth = seen.entry(l.role()).or_default();
            if l.serialize() != r.serialize() {
                let changes = self.compute_diff(l, r);
                if !changes.is_empty() {
                    actions.push(ChangeAction::Field {
                        role: l.role(),
                        nth: *nth,
                        changes,
                    });
                }
            }
            *nth += 1;
        }
        actions
    }

    fn diff_list(&mut self, left: NodeRef<'_>, right: NodeRef<'_>) -> Vec<ChangeAction> {
        let (li, ri) = (left.items(), right.items());
        let lkeys: Vec<String> = li.iter().map(|i| i.item_key()).collect();
        let rkeys: Vec<String> = ri.iter().map(|i| i.item_key()).collect();
        let mut actions = Vec::new();

        // Brackets first: separators and the trailing comma depend on them.
        let bracket = |list: NodeRef<'_>, role| list.field(role, 0).map(|b| b.text().to_string());
        let (old_open, old_close) = (bracket(left, Role::Open), bracket(left, Role::Close));
        let (open, close) = (bracket(right, Role::Open), bracket(right, Role::Close));
        if old_open != open || old_close != close {
            actions.push(ChangeAction::SetBrackets {
                old_open,
                old_close,
                open,
                close,
            });
        }

        for (item, key) in li.iter().zip(&lkeys) {
            if !rkeys.contains(key) {
                actions.push(ChangeAction::RemoveItem {
                    key: key.clone(),
                    value: item.serialize().trim().to_string(),
                });
            }
        }

        let sorted = left.kind() == NodeKind::ImportNames && rkeys.windows(2).all(|w| w[0] <= w[1]);
        for (i, (item, key)) in ri.iter().zip(&rkeys).enumerate() {
            match lkeys.iter().position(|k| k == key) {
                Some(j) => {
                    if li[j].serialize() != item.serialize() {
                        let changes = self.compute_diff(li[j], *item);
                        if !changes.is_empty() {
                            actions.push(ChangeAction::EditItem {
                                key: key.clone(),
                                changes,
                            });
                        }
                    }
                }
                None => actions.push(ChangeAction::InsertItem {
                    node: Fragment::of(*item),
                    key: key.clone(),
                    after: i.checked_sub(1).map(|p| rkeys[p].clone()),
                    sorted,
                }),
            }
        }

        let common_left: Vec<&String> = lkeys.iter().filter(|k| rkeys.contains(k)).collect();
        let common_right: Vec<&String> = rkeys.iter().filter(|k| lkeys.contains(k)).collect();
        if common_left != common_right {
            actions.push(ChangeAction::ReorderItems {
                keys: common_right.into_iter().cloned().collect(),
            });
        }

        let left_seps = middle_separators(left);
        let left_style = left_seps
            .first()
            .map_or_else(|| ", ".to_string(), |(_, text)| text.clone());
        for (key, text) in middle_separators(right) {
            let changed = match left_seps.iter().find(|(k, _)| *k == key) {
                Some((_, old)) => *old != text,
                None => text != left_style,
            };
            if changed {
                actions.push(ChangeAction::SetSeparator { key, text });
            }
        }

        let trailing = trailing_separator(right);
        if trailing_separator(left) != trailing {
            actions.push(ChangeAction::SetTrailing { text: trailing });
        }

        actions
    }

    /// Ordered alignment of the children of two line containers.
    fn align(&mut self, left: NodeRef<'_>, right: NodeRef<'_>) -> Vec<ChangeAction> {
        let matcher = SimilarityMatcher::new(self.config);
        let rights = right.children();
        let left_defs: HashSet<StableKey> = left.children().into_iter().filter_map(def_key).collect();
        let right_defs: HashSet<StableKey> = rights.iter().copied().filter_map(def_key).collect();
        let mut queue: VecDeque<NodeRef<'_>> = left.children().into();
        let mut deferred: Vec<NodeRef<'_>> = Vec::new();
        let mut out = Alignment::default();

        let mut ri = 0;
        while ri < rights.len() {
            let r = rights[ri];
            let text = r.serialize();
            let Some(&head) = queue.front() else {
                let moved = def_key(r).and_then(|key| {
                    let p = deferred.iter().position(|d| def_key(*d).as_ref() == Some(&key))?;
                    Some(deferred.remove(p))
                });
                match moved {
                    Some(source) => self.push_move(&mut out, source, r, &rights, ri),
                    None => out.pending.push(ri),
                }
                ri += 1;
                continue;
            };

            if head.serialize() == text {
                self.flush(&mut out, &rights);
                queue.pop_front();
                ri += 1;
                continue;
            }

            let ahead = queue
                .iter()
                .take(self.config.lookahead + 1)
                .skip(1)
                .position(|q| q.serialize() == text)
                .map(|p| p + 1);
            if let Some(index) = ahead {
                self.flush(&mut out, &rights);
                let skipped: Vec<NodeRef<'_>> = queue.drain(..index).collect();
                queue.pop_front();
                self.skip(&mut out, skipped, &mut deferred, &rights, ri);
                ri += 1;
                continue;
            }

            if let Some(key) = def_key(r) {
                if def_key(head).as_ref() != Some(&key) {
                    let in_queue = queue.iter().skip(1).position(|q| def_key(*q).as_ref() == Some(&key));
                    let found = match in_queue {
                        Some(p) => queue.remove(p + 1),
                        None => deferred
                            .iter()
                            .position(|d| def_key(*d).as_ref() == Some(&key))
                            .map(|p| deferred.remove(p)),
                    };
                    if let Some(source) = found {
                        self.push_move(&mut out, source, r, &rights, ri);
                        ri += 1;
                        continue;
                    }

                    let renamed = head.kind() == r.kind()
                        && def_key(head).is_some_and(|k| !right_defs.contains(&k))
                        && !left_defs.contains(&key);
                    if renamed {
                        self.flush(&mut out, &rights);
                        debug!(from = %head.field_text(Role::Name), to = %key, "rename detected");
                        let changes = self.compute_diff(head, r);
                        out.actions.push(ChangeAction::Edit {
                            locator: locator(head),
                            changes,
                        });
                        queue.pop_front();
                        ri += 1;
                        continue;
                    }
                }
            }

            if head.kind().is_scoping() && head.kind() != r.kind() {
                let body = head.field(Role::Body, 0).map(|b| b.children()).unwrap_or_default();
                let first = body.iter().find(|c| c.kind().is_statement());
                if first.is_some_and(|f| f.serialize() == text || matcher.same_element(*f, r)) {
                    self.flush(&mut out, &rights);
                    out.actions.push(ChangeAction::Unwrap {
                        locator: locator(head),
                    });
                    queue.pop_front();
                    for child in body.into_iter().rev() {
                        queue.push_front(child);
                    }
                    continue;
                }
            }

            if head.kind() == NodeKind::Compound && r.kind() == NodeKind::Compound {
                self.flush(&mut out, &rights);
                self.compute_diff(head, r);
                queue.pop_front();
                ri += 1;
                continue;
            }

            let similar = if matcher.same_element(head, r) {
                Some(0)
            } else if chain_of(r).is_some() {
                queue
                    .iter()
                    .take(self.config.lookahead + 1)
                    .skip(1)
                    .position(|q| chain_of(*q).is_some() && matcher.same_element(*q, r))
                    .map(|p| p + 1)
            } else {
                None
            };
            if let Some(index) = similar {
                self.flush(&mut out, &rights);
                let skipped: Vec<NodeRef<'_>> = queue.drain(..index).collect();
                self.skip(&mut out, skipped, &mut deferred, &rights, ri);
                if let Some(source) = queue.pop_front() {
                    let changes = self.compute_diff(source, r);
                    if !changes.is_empty() {
                        out.actions.push(ChangeAction::Edit {
                            locator: locator(source),
                            changes,
                        });
                    }
                }
                ri += 1;
                continue;
            }

            out.pending.push(ri);
            ri += 1;
        }
        self.flush(&mut out, &rights);

        let leftovers: Vec<NodeRef<'_>> = queue.into_iter().chain(deferred).collect();
        self.push_removal(&mut out, &leftovers, &rights, rights.len());
        out.actions
    }

    /// Left elements passed over before a match at `rights[ri]`: definitions
    /// that reappear later are deferred as move sources, the rest are removed.
    fn skip<'l>(
        &self,
        out: &mut Alignment,
        skipped: Vec<NodeRef<'l>>,
        deferred: &mut Vec<NodeRef<'l>>,
        rights: &[NodeRef<'_>],
        ri: usize,
    ) {
        let later: HashSet<StableKey> = rights[ri + 1..].iter().copied().filter_map(def_key).collect();
        let mut removed = Vec::new();
        // Definitions whose trailing blank lines are left behind by the move.
        let mut vacated: Vec<NodeRef<'l>> = Vec::new();
        let mut after_moved = false;
        for s in skipped {
            if def_key(s).is_some_and(|k| later.contains(&k)) {
                deferred.push(s);
                after_moved = true;
            } else if after_moved && s.kind().is_formatting() {
                if deferred.last().is_some_and(|d| !vacated.iter().any(|v| v.id == d.id)) {
                    vacated.extend(deferred.last().copied());
                }
            } else {
                after_moved = false;
                removed.push(s);
            }
        }
        for def in vacated {
            out.actions.push(ChangeAction::SetBlankLines {
                context: AnchorContext {
                    orientation: Orientation::Before,
                    anchors: vec![def.serialize()],
                    boundary: false,
                },
                count: 0,
            });
        }
        self.push_removal(out, &removed, rights, ri);
    }

    /// Emit the move of `source` to the gap before `rights[ri]`, plus its edits.
    fn push_move(
        &mut self,
        out: &mut Alignment,
        source: NodeRef<'_>,
        r: NodeRef<'_>,
        rights: &[NodeRef<'_>],
        ri: usize,
    ) {
        self.flush(out, rights);
        debug!(element = %source.field_text(Role::Name), "move detected");
        out.actions.push(ChangeAction::Move {
            locator: locator(source),
            context: context_before(rights, ri),
        });
        let changes = self.compute_diff(source, r);
        if !changes.is_empty() {
            out.actions.push(ChangeAction::Edit {
                locator: locator(source),
                changes,
            });
        }
    }

    /// Emit the pending insertion run.
    fn flush(&self, out: &mut Alignment, rights: &[NodeRef<'_>]) {
        let Some(&start) = out.pending.first() else {
            return;
        };
        let pending = std::mem::take(&mut out.pending);
        if pending.iter().all(|&i| rights[i].kind().is_formatting()) {
            Self::blank_lines(out, rights, start);
            return;
        }
        out.actions.push(ChangeAction::Insert {
            nodes: pending.iter().map(|&i| Fragment::of(rights[i])).collect(),
            context: context_before(rights, start),
        });
    }

    /// Emit the removal of `removed`, which sat right before `rights[gap]`.
    fn push_removal(&self, out: &mut Alignment, removed: &[NodeRef<'_>], rights: &[NodeRef<'_>], gap: usize) {
        let Some(&first) = removed.first() else {
            return;
        };
        if removed.iter().all(|n| n.kind().is_formatting()) {
            let run = rights[..gap]
                .iter()
                .rev()
                .take_while(|n| n.kind().is_formatting())
                .count();
            Self::blank_lines(out, rights, gap - run);
            return;
        }
        out.actions.push(ChangeAction::Remove {
            nodes: removed.iter().map(|n| Fragment::of(*n)).collect(),
            context: gather_context(first),
        });
    }

    /// Normalize the blank-line run of `rights` that contains (or starts at) `index`.
    fn blank_lines(out: &mut Alignment, rights: &[NodeRef<'_>], index: usize) {
        let start = index
            - rights[..index]
                .iter()
                .rev()
                .take_while(|n| n.kind().is_formatting())
                .count();
        if !out.blank_runs.insert(start) {
            return;
        }
        let count = rights[start..]
            .iter()
            .take_while(|n| n.kind().is_formatting())
            .count();
        let context = AnchorContext {
            orientation: Orientation::Before,
            anchors: start
                .checked_sub(1)
                .map(|p| vec![rights[p].serialize()])
                .unwrap_or_default(),
            boundary: start == 0,
        };
        out.actions.push(ChangeAction::SetBlankLines { context, count });
    }
}

fn replace(left: NodeRef<'_>, right: NodeRef<'_>) -> ChangeAction {
    ChangeAction::Replace {
        old: Fragment::of(left),
        new: Fragment::of(right),
    }
}

fn set_text(left: NodeRef<'_>, right: NodeRef<'_>) -> ChangeAction {
    let (old, new) = (left.text(), right.text());
    let patch = (matches!(left.kind(), NodeKind::Str | NodeKind::Expr) && old.lines().count() > 1)
        .then(|| diffy::create_patch(old, new).to_string());
    ChangeAction::SetText {
        old: old.to_string(),
        new: new.to_string(),
        patch,
    }
}

/// Separator text following each item that is followed by another item, in list order.
fn middle_separators(list: NodeRef<'_>) -> Vec<(String, String)> {
    let children = list.children();
    children
        .windows(3)
        .filter(|w| {
            w[0].role() == Role::Item && w[1].kind() == NodeKind::Separator && w[2].role() == Role::Item
        })
        .map(|w| (w[0].item_key(), w[1].text().to_string()))
        .collect()
}

fn trailing_separator(list: NodeRef<'_>) -> Option<String> {
    let children = list.children();
    let last = children.iter().rev().find(|c| c.role() != Role::Close)?;
    (last.kind() == NodeKind::Separator).then(|| last.text().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn diff(left: &str, right: &str) -> Vec<ChangeAction> {
        let config = MergeConfig::default();
        let (l, r) = (parse(left).unwrap(), parse(right).unwrap());
        TreeComparator::new(&config).compute_diff(l.root_ref(), r.root_ref())
    }

    #[test]
    fn test_identical_trees_have_no_diff() {
        let source = "import os\n\ndef f(a):\n    return a\n";
        assert!(diff(source, source).is_empty());
    }

    #[test]
    fn test_insert_is_coalesced() {
        let actions = diff("a = 1\n", "a = 1\nb = 2\nc = 3\n");
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            ChangeAction::Insert { nodes, context } => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(context.anchors, vec!["a = 1\n"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lookahead_produces_removal() {
        let actions = diff("a = 1\nx()\nb = 2\n", "a = 1\nb = 2\n");
        assert!(matches!(&actions[..], [ChangeAction::Remove { nodes, .. }] if nodes[0].text() == "x()\n"));
    }

    #[test]
    fn test_rename_is_an_edit() {
        let actions = diff(
            "def fun1():\n    pass\n\ndef fun2():\n    pass\n",
            "def renamed_fun():\n    pass\n\ndef fun2():\n    pass\n",
        );
        match &actions[..] {
            [ChangeAction::Edit { locator, changes }] => {
                assert_eq!(locator.key, Some(StableKey::Def(NodeKind::Function, "fun1".into())));
                assert!(matches!(&changes[..], [ChangeAction::Field { role: Role::Name, .. }]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_import_names_diff() {
        let actions = diff("from m import a\n", "from m import (a, b)\n");
        let ChangeAction::Edit { changes, .. } = &actions[0] else {
            panic!("expected edit");
        };
        let ChangeAction::Field { role: Role::Names, changes, .. } = &changes[0] else {
            panic!("expected names field");
        };
        assert!(matches!(
            &changes[..],
            [ChangeAction::SetBrackets { .. }, ChangeAction::InsertItem { key, after: Some(prev), sorted: true, .. }]
                if key == "b" && prev == "a"
        ));
    }

    #[test]
    fn test_exploded_import_sets_each_separator() {
        let actions = diff("from a import b\n", "from a import (\n    b,\n    c,\n)\n");
        let ChangeAction::Edit { changes, .. } = &actions[0] else {
            panic!("expected edit");
        };
        let ChangeAction::Field { changes, .. } = &changes[0] else {
            panic!("expected names field");
        };
        assert!(matches!(changes.first(), Some(ChangeAction::SetBrackets { .. })));
        assert!(changes.iter().any(
            |c| matches!(c, ChangeAction::SetSeparator { key, text } if key == "b" && text == ",\n    ")
        ));
        assert!(matches!(changes.last(), Some(ChangeAction::SetTrailing { text: Some(t) }) if t == ","));
    }

    #[test]
    fn test_call_matched_past_removed_statement() {
        let actions = diff("setup()\nlog.warn('done')\n", "log.warn('finished')\n");
        assert!(matches!(
            &actions[..],
            [ChangeAction::Remove { nodes, .. }, ChangeAction::Edit { .. }] if nodes[0].text() == "setup()\n"
        ));
    }

    #[test]
    fn test_unwrap_detection() {
        let actions = diff("with fun():\n    call('hello')\n", "call('hello')\n");
        assert!(matches!(&actions[..], [ChangeAction::Unwrap { .. }]));
    }

    #[test]
    fn test_blank_line_change() {
        let actions = diff("a = 1\nb = 2\n", "a = 1\n\n\nb = 2\n");
        match &actions[..] {
            [ChangeAction::SetBlankLines { context, count }] => {
                assert_eq!(*count, 2);
                assert_eq!(context.anchors, vec!["a = 1\n"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_function_move() {
        let actions = diff(
            "def a():\n    pass\ndef b():\n    pass\nx = 1\n",
            "def b():\n    pass\nx = 1\ndef a():\n    pass\n",
        );
        assert!(actions.iter().any(|a| matches!(a, ChangeAction::Move { .. })));
        assert!(!actions.iter().any(|a| matches!(a, ChangeAction::Remove { .. })));
    }

    #[test]
    fn test_match_statement_is_reported() {
        let config = MergeConfig::default();
        let l = parse("match x:\n    case 1:\n        pass\n").unwrap();
        let r = parse("match x:\n    case 2:\n        pass\n").unwrap();
        let mut comparator = TreeComparator::new(&config);
        assert!(comparator.compute_diff(l.root_ref(), r.root_ref()).is_empty());
        assert_eq!(comparator.diagnostics().len(), 1);
    }
}
