//! Change actions produced by the diff and replayed by the applier.
//!
//! Every action is relative to a *target* node of the tree it is applied to:
//! line-level actions target the container, field actions the composite node,
//! item actions the inline list and text actions the leaf itself.

use std::fmt;

use crate::context::AnchorContext;
use crate::tree::Fragment;
use crate::types::{Role, StableKey};

/// How to find "the same element" of a container in a tree that may have
/// been edited independently.
#[derive(Debug, Clone)]
pub struct ElementLocator {
    pub key: Option<StableKey>,
    pub before: AnchorContext,
    pub after: AnchorContext,
    /// The element as it was on the diff's left side.
    pub value: Fragment,
}

impl ElementLocator {
    /// Short label used in logs and conflict markers.
    pub fn label(&self) -> String {
        match &self.key {
            Some(key) => key.to_string(),
            None => first_line(self.value.text()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChangeAction {
    /// Insert line elements at the gap located by `context`.
    Insert {
        nodes: Vec<Fragment>,
        context: AnchorContext,
    },
    /// Hide the run of line elements that follows the gap located by `context`.
    Remove {
        nodes: Vec<Fragment>,
        context: AnchorContext,
    },
    /// Locate an element and apply nested changes to it.
    Edit {
        locator: ElementLocator,
        changes: Vec<ChangeAction>,
    },
    /// Relocate an element to the gap located by `context`.
    Move {
        locator: ElementLocator,
        context: AnchorContext,
    },
    /// Drop a scoping statement and splice its body into the container.
    Unwrap { locator: ElementLocator },
    /// Whole-node replacement.
    Replace { old: Fragment, new: Fragment },
    /// Apply nested changes to the `nth` child filling `role`.
    Field {
        role: Role,
        nth: usize,
        changes: Vec<ChangeAction>,
    },
    /// Leaf text (or block lead) change. `patch` is a unified diff used when
    /// the live text matches neither side.
    SetText {
        old: String,
        new: String,
        patch: Option<String>,
    },
    InsertItem {
        node: Fragment,
        key: String,
        /// Key of the preceding item on the right side.
        after: Option<String>,
        /// Keep the list sorted if it already is.
        sorted: bool,
    },
    RemoveItem { key: String, value: String },
    EditItem {
        key: String,
        changes: Vec<ChangeAction>,
    },
    /// Put the listed items into this relative order.
    ReorderItems { keys: Vec<String> },
    SetBrackets {
        old_open: Option<String>,
        old_close: Option<String>,
        open: Option<String>,
        close: Option<String>,
    },
    /// Trailing comma after the last item, `None` for none.
    SetTrailing { text: Option<String> },
    /// Separator text following the item `key` (argument on its own line).
    SetSeparator { key: String, text: String },
    /// Switch a block between `f(): body` and the indented form.
    SetInline {
        inline: bool,
        lead: String,
        indent: Option<String>,
    },
    SetIndent {
        old: Option<String>,
        new: Option<String>,
    },
    /// Make the run of blank lines after the gap located by `context` `count` long.
    SetBlankLines { context: AnchorContext, count: usize },
}

impl ChangeAction {
    /// One-line description, used in logs and conflict markers.
    pub fn describe(&self) -> String {
        match self {
            ChangeAction::Insert { nodes, .. } => format!("insert {}", elements(nodes.len())),
            ChangeAction::Remove { nodes, .. } => format!("remove {}", elements(nodes.len())),
            ChangeAction::Edit { locator, changes } => {
                format!("edit `{}` ({} change(s))", locator.label(), changes.len())
            }
            ChangeAction::Move { locator, .. } => format!("move `{}`", locator.label()),
            ChangeAction::Unwrap { locator } => format!("unwrap `{}`", locator.label()),
            ChangeAction::Replace { new, .. } => format!("replace with `{}`", first_line(new.text())),
            ChangeAction::Field { role, changes, .. } => {
                format!("change {role:?} ({} change(s))", changes.len())
            }
            ChangeAction::SetText { old, new, .. } => {
                format!("change `{}` to `{}`", first_line(old), first_line(new))
            }
            ChangeAction::InsertItem { key, .. } => format!("add item `{key}`"),
            ChangeAction::RemoveItem { key, .. } => format!("remove item `{key}`"),
            ChangeAction::EditItem { key, .. } => format!("edit item `{key}`"),
            ChangeAction::ReorderItems { keys } => format!("reorder items {}", keys.join(", ")),
            ChangeAction::SetBrackets { open, .. } => match open {
                Some(_) => "add brackets".to_string(),
                None => "remove brackets".to_string(),
            },
            ChangeAction::SetTrailing { text } => match text {
                Some(_) => "add trailing comma".to_string(),
                None => "remove trailing comma".to_string(),
            },
            ChangeAction::SetSeparator { key, .. } => format!("change separator after `{key}`"),
            ChangeAction::SetInline { inline, .. } => {
                if *inline {
                    "join block onto its header line".to_string()
                } else {
                    "split block from its header line".to_string()
                }
            }
            ChangeAction::SetIndent { .. } => "change block indentation".to_string(),
            ChangeAction::SetBlankLines { count, .. } => format!("set blank lines to {count}"),
        }
    }

    /// Source text of the content the action is about.
    pub fn subjects(&self) -> Vec<String> {
        match self {
            ChangeAction::Insert { nodes, .. } | ChangeAction::Remove { nodes, .. } => {
                nodes.iter().map(|n| n.text().to_string()).collect()
            }
            ChangeAction::Edit { locator, .. }
            | ChangeAction::Move { locator, .. }
            | ChangeAction::Unwrap { locator } => vec![locator.value.text().to_string()],
            ChangeAction::Replace { old, new } => vec![old.text().to_string(), new.text().to_string()],
            ChangeAction::SetText { old, new, .. } => vec![old.clone(), new.clone()],
            ChangeAction::InsertItem { node, .. } => vec![node.text().to_string()],
            ChangeAction::RemoveItem { value, .. } => vec![value.clone()],
            _ => Vec::new(),
        }
    }

    /// True for actions that only forward nested changes.
    pub fn is_delegating(&self) -> bool {
        matches!(
            self,
            ChangeAction::Edit { .. } | ChangeAction::Field { .. } | ChangeAction::EditItem { .. }
        )
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn elements(n: usize) -> String {
    if n == 1 {
        "1 element".to_string()
    } else {
        format!("{n} elements")
    }
}

fn first_line(text: &str) -> String {
    text.trim().lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_describe_uses_first_line() {
        let tree = parse("def f():\n    pass\n").unwrap();
        let node = tree.root_ref().children()[0];
        let action = ChangeAction::Insert {
            nodes: vec![Fragment::of(node)],
            context: AnchorContext::start(),
        };
        assert_eq!(action.describe(), "insert 1 element");
        assert_eq!(action.subjects(), vec!["def f():\n    pass\n"]);
        let replace = ChangeAction::Replace {
            old: Fragment::of(node),
            new: Fragment::of(node),
        };
        assert_eq!(replace.to_string(), "replace with `def f():`");
    }
}
