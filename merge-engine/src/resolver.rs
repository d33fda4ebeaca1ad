//! File-level merge pipeline.
//!
//! 1. Parse base, current and other (tree-sitter validated).
//! 2. Diff base against other into change actions.
//! 3. Replay the actions on current, collecting conflicts.
//! 4. Render conflicts as marker comments and serialize.

use tracing::{debug, info};

use crate::apply::Applier;
use crate::config::MergeConfig;
use crate::conflicts::ConflictRecorder;
use crate::diff::TreeComparator;
use crate::error::{MergeError, Result};
use crate::parser;
use crate::tree::Tree;
use crate::types::{Conflict, Diagnostic};

/// The main entry point: merges one file.
#[derive(Debug, Default)]
pub struct Resolver {
    config: MergeConfig,
}

/// Result of merging one file.
#[derive(Debug)]
pub struct FileResolverOutput {
    /// Current with the other side's changes applied and conflict markers written.
    pub merged_content: String,
    pub conflicts: Vec<Conflict>,
    /// Constructs the diff could not compare; their current content was kept.
    pub diagnostics: Vec<Diagnostic>,
    pub all_resolved: bool,
}

impl Resolver {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn resolve_file(&self, base: &str, current: &str, other: &str) -> Result<FileResolverOutput> {
        let base = parse_side(base, "base")?;
        let mut tree = parse_side(current, "current")?;
        let other = parse_side(other, "other")?;

        let mut comparator = TreeComparator::new(&self.config);
        let actions = comparator.compute_diff(base.root_ref(), other.root_ref());
        debug!(actions = actions.len(), "diff computed");

        tree.begin_batch();
        let root = tree.root();
        let conflicts = Applier::new(&self.config).apply_all(&mut tree, root, &actions)?;
        tree.finish_batch();

        let mut recorder = ConflictRecorder::new(&self.config);
        recorder.record(conflicts);
        recorder.annotate(&mut tree);
        let all_resolved = recorder.is_empty();
        info!(
            actions = actions.len(),
            conflicts = recorder.conflicts().len(),
            "merge finished"
        );

        Ok(FileResolverOutput {
            merged_content: tree.to_source(),
            conflicts: recorder.into_conflicts(),
            diagnostics: comparator.into_diagnostics(),
            all_resolved,
        })
    }
}

fn parse_side(source: &str, side: &'static str) -> Result<Tree> {
    parser::parse(source).map_err(|source| MergeError::Parse { side, source })
}

/// Merge with the default configuration.
pub fn merge(base: &str, current: &str, other: &str) -> Result<FileResolverOutput> {
    Resolver::default().resolve_file(base, current, other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::has_markers;
    use crate::types::ConflictReason;

    const BASE: &str = "import os


def main(argv):
    parser = make_parser()
    run(argv, verbose=False)
    return 0
";

    const OTHER: &str = "import os
import sys


def main(argv):
    parser = make_parser()
    run(argv, verbose=True, strict=True)
    return 0
";

    #[test]
    fn test_no_op_diff_leaves_tree_unchanged() {
        let config = MergeConfig::default();
        let tree = parser::parse(BASE).unwrap();
        let actions = TreeComparator::new(&config).compute_diff(tree.root_ref(), tree.root_ref());
        assert!(actions.is_empty());

        let output = merge(BASE, OTHER, BASE).unwrap();
        assert!(output.all_resolved);
        assert_eq!(output.merged_content, OTHER);
    }

    #[test]
    fn test_replay_on_base_reproduces_other() {
        let output = merge(BASE, BASE, OTHER).unwrap();
        assert!(output.conflicts.is_empty());
        assert_eq!(output.merged_content, OTHER);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let output = merge(BASE, OTHER, OTHER).unwrap();
        assert!(output.all_resolved);
        assert_eq!(output.merged_content, OTHER);
    }

    #[test]
    fn test_independent_edits_combine() {
        let base = "def a():\n    return 1\n\n\ndef b():\n    return 2\n";
        let current = "def a():\n    return 10\n\n\ndef b():\n    return 2\n";
        let other = "def a():\n    return 1\n\n\ndef b():\n    return 20\n";
        let output = merge(base, current, other).unwrap();
        assert!(output.all_resolved);
        assert_eq!(
            output.merged_content,
            "def a():\n    return 10\n\n\ndef b():\n    return 20\n"
        );
    }

    #[test]
    fn test_rename_with_body_change() {
        let base = "def fun1():\n    call('hello')\n\n\ndef fun2():\n    pass\n";
        let other = "def renamed_fun():\n    call('hello world')\n\n\ndef fun2():\n    pass\n";
        let current = "def fun1():\n    call('hello')\n\n\ndef fun2():\n    return 2\n";
        let output = merge(base, current, other).unwrap();
        assert!(output.conflicts.is_empty());
        assert_eq!(
            output.merged_content,
            "def renamed_fun():\n    call('hello world')\n\n\ndef fun2():\n    return 2\n"
        );
    }

    #[test]
    fn test_swapped_functions_keep_spacing() {
        let base = "def a():\n    pass\n\ndef b():\n    pass\n";
        let other = "def b():\n    pass\n\ndef a():\n    pass\n";
        let output = merge(base, base, other).unwrap();
        assert!(output.conflicts.is_empty());
        assert_eq!(output.merged_content, other);

        let base = "x = 1\n\ndef a():\n    pass\n\ndef b():\n    pass\n";
        let other = "x = 1\n\ndef b():\n    pass\n\ndef a():\n    pass\n";
        assert_eq!(merge(base, base, other).unwrap().merged_content, other);
    }

    #[test]
    fn test_import_names_added_sorted_with_brackets() {
        let output = merge(
            "from module1 import fun1\n",
            "from module1 import fun3\n",
            "from module1 import (fun1, fun2)\n",
        )
        .unwrap();
        assert!(output.all_resolved);
        assert_eq!(output.merged_content, "from module1 import (fun2, fun3)\n");
    }

    #[test]
    fn test_reimported_name_is_not_duplicated() {
        let output = merge(
            "from m import a\n",
            "from m import a, b\n",
            "from m import a, b\n",
        )
        .unwrap();
        assert!(output.all_resolved);
        assert_eq!(output.merged_content, "from m import a, b\n");
    }

    #[test]
    fn test_conflicting_context_leaves_marker() {
        let base = "if cond:\n    # context\n    pass\n";
        let other = "if cond:\n    # context\n    # new comment\n    pass\n";
        let current = "if cond:\n    # other context\n    pass\n";
        let output = merge(base, current, other).unwrap();
        assert!(!output.all_resolved);
        assert_eq!(output.conflicts[0].reason, ConflictReason::ContextNotFound);
        let merged = &output.merged_content;
        assert!(has_markers(merged));
        assert!(merged.contains("# Reason: context not found\n"));
        assert!(merged.contains("# | # new comment\n"));
        assert!(merged.ends_with("# >>>>>>>>>>\nif cond:\n    # other context\n    pass\n"));
    }

    #[test]
    fn test_scope_removal_dedents_body() {
        let output = merge(
            "with fun():\n    call('hello')\n",
            "with fun():\n    call('hello world')\n",
            "call('hello')\n",
        )
        .unwrap();
        assert!(output.all_resolved);
        assert_eq!(output.merged_content, "call('hello world')\n");
    }

    #[test]
    fn test_parse_failure_names_side() {
        let err = merge("x = 1\n", "def f(:\n", "x = 1\n").unwrap_err();
        assert!(matches!(err, MergeError::Parse { side: "current", .. }));
    }
}
