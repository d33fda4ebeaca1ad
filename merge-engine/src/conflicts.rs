//! Renders unresolved change actions as marker comments in the merged tree.
//!
//! A marker block sits right before the line element the conflict is about
//! (or at the start of the module) and reads:
//!
//! ```text
//! # <<<<<<<<<<
//! # Reason: context not found
//! # Action: insert 1 element
//! # | def helper():
//! # |     pass
//! # >>>>>>>>>>
//! ```
//!
//! Being comments, markers never make the output unparseable.

use tracing::info;

use crate::config::MergeConfig;
use crate::tree::Tree;
use crate::types::{Conflict, NodeKind, Role};

pub const MARKER_START: &str = "# <<<<<<<<<<";
pub const MARKER_END: &str = "# >>>>>>>>>>";

/// True if `source` still carries conflict markers.
pub fn has_markers(source: &str) -> bool {
    source.lines().any(|line| line.trim_start() == MARKER_START)
}

pub struct ConflictRecorder<'c> {
    config: &'c MergeConfig,
    conflicts: Vec<Conflict>,
}

impl<'c> ConflictRecorder<'c> {
    pub fn new(config: &'c MergeConfig) -> Self {
        Self {
            config,
            conflicts: Vec::new(),
        }
    }

    pub fn record(&mut self, conflicts: impl IntoIterator<Item = Conflict>) {
        self.conflicts.extend(conflicts);
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn into_conflicts(self) -> Vec<Conflict> {
        self.conflicts
    }

    /// Comment lines (without indentation) describing `conflict`.
    pub fn render(&self, conflict: &Conflict) -> Vec<String> {
        let mut lines = vec![
            MARKER_START.to_string(),
            format!("# Reason: {}", conflict.reason),
            format!("# Action: {}", conflict.action),
        ];
        for subject in &conflict.subjects {
            let total = subject.lines().count();
            for line in subject.lines().take(self.config.excerpt_lines) {
                lines.push(format!("# | {line}").trim_end().to_string());
            }
            if total > self.config.excerpt_lines {
                lines.push("# | ...".to_string());
            }
        }
        lines.push(MARKER_END.to_string());
        lines
    }

    /// Insert the marker block of every recorded conflict into `tree`.
    pub fn annotate(&self, tree: &mut Tree) {
        for conflict in &self.conflicts {
            let (container, mut index) = match conflict.at.and_then(|at| tree.node(at).parent.map(|p| (p, at))) {
                Some((parent, at)) => (parent, tree.node(at).index),
                None => (tree.root(), 0),
            };
            for line in self.render(conflict) {
                let id = tree.add(NodeKind::CommentLine, Role::Item, format!("{line}\n"));
                tree.insert(container, index, id);
                index += 1;
            }
        }
        if !self.conflicts.is_empty() {
            info!(count = self.conflicts.len(), "conflict markers written");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::types::ConflictReason;

    fn sample() -> Conflict {
        Conflict::new(
            ConflictReason::ContextNotFound,
            "insert 1 element".to_string(),
            vec!["x = 1\n".to_string()],
        )
    }

    #[test]
    fn test_render_block() {
        let config = MergeConfig::default();
        let recorder = ConflictRecorder::new(&config);
        assert_eq!(
            recorder.render(&sample()),
            vec![
                "# <<<<<<<<<<",
                "# Reason: context not found",
                "# Action: insert 1 element",
                "# | x = 1",
                "# >>>>>>>>>>",
            ]
        );
    }

    #[test]
    fn test_excerpt_is_truncated() {
        let config = MergeConfig {
            excerpt_lines: 2,
            ..MergeConfig::default()
        };
        let recorder = ConflictRecorder::new(&config);
        let mut conflict = sample();
        conflict.subjects = vec!["a\nb\nc\n".to_string()];
        let lines = recorder.render(&conflict);
        assert_eq!(lines[3..6], ["# | a", "# | b", "# | ..."]);
    }

    #[test]
    fn test_markers_land_before_element_with_its_indent() {
        let config = MergeConfig::default();
        let mut tree = parse("def f():\n    x = 1\n    y = 2\n").unwrap();
        let function = tree.visible_children(tree.root())[0];
        let body = tree.field(function, Role::Body, 0).unwrap();
        let second = tree.visible_children(body)[1];

        let mut recorder = ConflictRecorder::new(&config);
        recorder.record([sample().at(second)]);
        recorder.annotate(&mut tree);

        let merged = tree.to_source();
        assert!(merged.starts_with("def f():\n    x = 1\n    # <<<<<<<<<<\n    # Reason: context not found\n"));
        assert!(merged.ends_with("    # >>>>>>>>>>\n    y = 2\n"));
        assert!(has_markers(&merged));
        assert!(crate::parser::check_fragment(&merged).is_ok());
    }

    #[test]
    fn test_unplaced_conflict_goes_to_module_start() {
        let config = MergeConfig::default();
        let mut tree = parse("x = 1\n").unwrap();
        let mut recorder = ConflictRecorder::new(&config);
        recorder.record([sample()]);
        recorder.annotate(&mut tree);
        assert!(tree.to_source().starts_with("# <<<<<<<<<<\n"));
        assert!(tree.to_source().ends_with("# >>>>>>>>>>\nx = 1\n"));
        assert!(!has_markers("x = 1  # <<<<<<<<<< not a marker\n"));
    }
}
