//! Anchor windows that relocate a position after independent edits.
//!
//! A context is the run of siblings next to a gap, serialized: blank lines are
//! absorbed and the walk stops at the first meaningful sibling. When the walk
//! hits the start (or end) of the container, the context is pinned to it.

use crate::tree::{Node, NodeRef, Tree};
use crate::types::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Anchors precede the gap.
    Before,
    /// Anchors follow the gap.
    After,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorContext {
    pub orientation: Orientation,
    /// Serialized siblings, nearest to the gap first.
    pub anchors: Vec<String>,
    /// The window reaches the start (`Before`) or end (`After`) of the container.
    pub boundary: bool,
}

impl AnchorContext {
    /// Context of the very start of a container.
    pub fn start() -> Self {
        Self {
            orientation: Orientation::Before,
            anchors: Vec::new(),
            boundary: true,
        }
    }

    fn reduced(&self, drop: usize) -> Self {
        Self {
            orientation: self.orientation,
            anchors: self.anchors[drop..].to_vec(),
            boundary: self.boundary,
        }
    }
}

/// Which nodes a context search sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Live content: hidden nodes excluded.
    Current,
    /// Content before this batch: nodes inserted by the batch excluded.
    PreEdit,
}

impl View {
    fn includes(self, node: &Node) -> bool {
        match self {
            View::Current => !node.hidden,
            View::PreEdit => !node.new,
        }
    }
}

/// Context before the gap at `gap` of `seq` (the gap precedes `seq[gap]`).
pub fn context_before(seq: &[NodeRef<'_>], gap: usize) -> AnchorContext {
    let mut anchors = Vec::new();
    let mut boundary = true;
    for node in seq[..gap.min(seq.len())].iter().rev() {
        anchors.push(node.serialize());
        if !node.kind().is_formatting() {
            boundary = false;
            break;
        }
    }
    AnchorContext {
        orientation: Orientation::Before,
        anchors,
        boundary,
    }
}

/// Context after the gap at `gap` of `seq`.
pub fn context_after(seq: &[NodeRef<'_>], gap: usize) -> AnchorContext {
    let mut anchors = Vec::new();
    let mut boundary = true;
    for node in seq.iter().skip(gap) {
        anchors.push(node.serialize());
        if !node.kind().is_formatting() {
            boundary = false;
            break;
        }
    }
    AnchorContext {
        orientation: Orientation::After,
        anchors,
        boundary,
    }
}

fn position(node: NodeRef<'_>) -> Option<(Vec<NodeRef<'_>>, usize)> {
    let siblings = node.parent()?.children();
    let index = siblings.iter().position(|s| s.id == node.id)?;
    Some((siblings, index))
}

/// Context right before `node` among its visible siblings.
pub fn gather_context(node: NodeRef<'_>) -> AnchorContext {
    match position(node) {
        Some((siblings, index)) => context_before(&siblings, index),
        None => AnchorContext::start(),
    }
}

/// Context right after `node` among its visible siblings.
pub fn gather_after_context(node: NodeRef<'_>) -> AnchorContext {
    match position(node) {
        Some((siblings, index)) => context_after(&siblings, index + 1),
        None => AnchorContext {
            orientation: Orientation::After,
            anchors: Vec::new(),
            boundary: true,
        },
    }
}

/// Every gap of `container` whose neighbours in `view` equal `context`.
/// Gaps are insertion indices into the full child list, hidden children included.
pub fn find_context(tree: &Tree, container: NodeId, context: &AnchorContext, view: View) -> Vec<usize> {
    let children = &tree.node(container).children;
    let visible: Vec<usize> = (0..children.len())
        .filter(|&i| view.includes(tree.node(children[i])))
        .collect();
    let texts: Vec<String> = visible
        .iter()
        .map(|&i| match view {
            View::Current => tree.serialize(children[i]),
            View::PreEdit => tree.serialize_pre_edit(children[i]),
        })
        .collect();
    let width = context.anchors.len();

    let mut gaps = Vec::new();
    for gap in 0..=visible.len() {
        let matched = match context.orientation {
            Orientation::Before => {
                gap >= width
                    && (!context.boundary || gap == width)
                    && context
                        .anchors
                        .iter()
                        .enumerate()
                        .all(|(k, anchor)| texts[gap - 1 - k] == *anchor)
            }
            Orientation::After => {
                gap + width <= visible.len()
                    && (!context.boundary || gap + width == visible.len())
                    && context
                        .anchors
                        .iter()
                        .enumerate()
                        .all(|(k, anchor)| texts[gap + k] == *anchor)
            }
        };
        if !matched {
            continue;
        }
        let index = match context.orientation {
            Orientation::Before if gap > 0 => visible[gap - 1] + 1,
            Orientation::Before => 0,
            Orientation::After => visible.get(gap).copied().unwrap_or(children.len()),
        };
        gaps.push(index);
    }
    gaps
}

/// [`find_context`] over both views, dropping the anchors nearest to the gap
/// until some gap matches. At least one anchor is always kept.
pub fn find_context_with_reduction(tree: &Tree, container: NodeId, context: &AnchorContext) -> Vec<usize> {
    let floor = context.anchors.len().saturating_sub(1);
    for drop in 0..=floor {
        let window = if drop == 0 {
            context.clone()
        } else {
            context.reduced(drop)
        };
        for view in [View::Current, View::PreEdit] {
            let gaps = find_context(tree, container, &window, view);
            if !gaps.is_empty() {
                return gaps;
            }
        }
    }
    Vec::new()
}

/// Pick among several matching gaps: the first at or after the container's
/// cursor, else the first.
pub fn choose(tree: &Tree, container: NodeId, gaps: &[usize]) -> Option<usize> {
    let cursor = tree.node(container).cursor.unwrap_or(0);
    gaps.iter()
        .copied()
        .find(|&g| g >= cursor)
        .or_else(|| gaps.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_context_absorbs_blank_lines() {
        let tree = parse("a = 1\n\n\nb = 2\n").unwrap();
        let children = tree.root_ref().children();
        let context = gather_context(children[3]);
        assert_eq!(context.anchors, vec!["\n", "\n", "a = 1\n"]);
        assert!(!context.boundary);
        let after = gather_after_context(children[0]);
        assert_eq!(after.anchors, vec!["\n", "\n", "b = 2\n"]);
    }

    #[test]
    fn test_context_at_boundary() {
        let tree = parse("\na = 1\n").unwrap();
        let children = tree.root_ref().children();
        let context = gather_context(children[1]);
        assert_eq!(context.anchors, vec!["\n"]);
        assert!(context.boundary);
        assert_eq!(gather_context(children[0]), AnchorContext::start());
    }

    #[test]
    fn test_find_context_skips_hidden() {
        let mut tree = parse("a = 1\nb = 2\nc = 3\n").unwrap();
        let root = tree.root();
        let ids = tree.visible_children(root);
        let context = gather_context(tree.get(ids[2]));
        assert_eq!(find_context(&tree, root, &context, View::Current), vec![2]);
        tree.hide(ids[1]);
        assert!(find_context(&tree, root, &context, View::Current).is_empty());
        assert_eq!(find_context(&tree, root, &context, View::PreEdit), vec![2]);
    }

    #[test]
    fn test_reduction_drops_nearest_anchors() {
        let tree = parse("a = 1\n\nb = 2\n").unwrap();
        let context = AnchorContext {
            orientation: Orientation::Before,
            anchors: vec!["\n".into(), "\n".into(), "a = 1\n".into()],
            boundary: false,
        };
        let root = tree.root();
        assert!(find_context(&tree, root, &context, View::Current).is_empty());
        assert_eq!(find_context_with_reduction(&tree, root, &context), vec![2]);
    }

    #[test]
    fn test_choose_prefers_cursor() {
        let mut tree = parse("x = 1\n").unwrap();
        let root = tree.root();
        assert_eq!(choose(&tree, root, &[1, 4]), Some(1));
        tree.node_mut(root).cursor = Some(2);
        assert_eq!(choose(&tree, root, &[1, 4]), Some(4));
        tree.node_mut(root).cursor = Some(5);
        assert_eq!(choose(&tree, root, &[1, 4]), Some(1));
    }
}
