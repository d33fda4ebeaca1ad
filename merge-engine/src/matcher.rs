//! Approximate identity between elements of two revisions.
//!
//! Exact serialized equality is tried first everywhere. When it fails, the
//! kind-specific rules below decide whether two nodes are the same element
//! after divergent edits:
//! - **Definitions** (`def`, `class`): same declared name.
//! - **Keyed statements** (imports, lone `return`, sole `if`): same stable key.
//! - **Assignments**: targets within a small edit distance.
//! - **Call chains**: same attribute path and call count, plus one of: the
//!   only such call in scope, agreeing leading string arguments, or similar
//!   argument sets.
//! - **Block constructs**: identical guard, or similar body lines.
//! - **Dicts**: similar key sets.

use std::collections::HashSet;
use std::hash::Hash;

use similar::{Algorithm, DiffOp, capture_diff_slices};

use crate::config::MergeConfig;
use crate::tree::NodeRef;
use crate::types::{NodeKind, Role};

pub struct SimilarityMatcher<'c> {
    config: &'c MergeConfig,
}

impl<'c> SimilarityMatcher<'c> {
    pub fn new(config: &'c MergeConfig) -> Self {
        Self { config }
    }

    /// Whether `candidate` is `reference`, possibly edited. Sibling-dependent
    /// rules look at the candidate's own container.
    pub fn same_element(&self, reference: NodeRef<'_>, candidate: NodeRef<'_>) -> bool {
        if reference.kind() != candidate.kind() {
            return false;
        }
        if reference.serialize() == candidate.serialize() {
            return true;
        }
        match reference.kind() {
            NodeKind::Function | NodeKind::Class => {
                reference.field_text(Role::Name) == candidate.field_text(Role::Name)
            }
            NodeKind::Import | NodeKind::FromImport | NodeKind::Return => {
                reference.stable_key().is_some() && reference.stable_key() == candidate.stable_key()
            }
            NodeKind::Assignment => {
                edit_distance(
                    &reference.field_text(Role::Target),
                    &candidate.field_text(Role::Target),
                ) < self.config.assignment_max_distance
            }
            NodeKind::ExprStmt => match (chain_of(reference), chain_of(candidate)) {
                (Some(a), Some(b)) => self.same_chain(a, b, siblings(candidate)),
                _ => false,
            },
            NodeKind::Chain => self.same_chain(reference, candidate, siblings(candidate)),
            NodeKind::If
            | NodeKind::For
            | NodeKind::While
            | NodeKind::With
            | NodeKind::Clause => self.same_block(reference, candidate),
            NodeKind::Dict => {
                let keys = |n: NodeRef<'_>| -> HashSet<String> {
                    n.items().iter().map(|i| i.item_key()).collect()
                };
                jaccard(&keys(reference), &keys(candidate)) > self.config.dict_keys_jaccard
            }
            _ => false,
        }
    }

    fn same_chain(&self, a: NodeRef<'_>, b: NodeRef<'_>, scope: Vec<NodeRef<'_>>) -> bool {
        let (path, calls) = chain_signature(a);
        if chain_signature(b) != (path.clone(), calls) {
            return false;
        }
        let same_base = scope
            .iter()
            .filter_map(|s| chain_of(*s).or_else(|| (s.kind() == NodeKind::Chain).then_some(*s)))
            .filter(|c| chain_signature(*c).0 == path)
            .count();
        if same_base <= 1 {
            return true;
        }

        let strings = |n: NodeRef<'_>| -> Vec<Option<String>> {
            n.field(Role::Args, 0)
                .map(|args| {
                    args.items()
                        .into_iter()
                        .filter(|i| i.is_positional())
                        .take(2)
                        .map(|i| {
                            i.field(Role::Value, 0)
                                .filter(|v| v.kind() == NodeKind::Str)
                                .map(|v| v.text().to_string())
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        let (left, right) = (strings(a), strings(b));
        if left
            .iter()
            .zip(&right)
            .any(|(l, r)| l.is_some() && l == r)
        {
            return true;
        }

        jaccard(&argument_set(a), &argument_set(b)) > self.config.call_args_jaccard
    }

    fn same_block(&self, a: NodeRef<'_>, b: NodeRef<'_>) -> bool {
        if a.field_text(Role::Keyword) != b.field_text(Role::Keyword) {
            return false;
        }
        if a.field_text(Role::Header) == b.field_text(Role::Header) {
            return true;
        }
        let rivals = siblings(b)
            .iter()
            .filter(|s| s.kind() == b.kind())
            .count();
        let threshold = if rivals > 1 {
            self.config.body_jaccard_strict
        } else {
            self.config.body_jaccard
        };
        jaccard(&body_lines(a), &body_lines(b)) > threshold
    }
}

/// Number of single-character edits turning `a` into `b`.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    capture_diff_slices(Algorithm::Myers, &a, &b)
        .iter()
        .map(|op| match *op {
            DiffOp::Equal { .. } => 0,
            DiffOp::Delete { old_len, .. } => old_len,
            DiffOp::Insert { new_len, .. } => new_len,
            DiffOp::Replace {
                old_len, new_len, ..
            } => old_len.max(new_len),
        })
        .sum()
}

/// |a ∩ b| / |a ∪ b|; two empty sets are identical.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// The call chain an expression statement consists of.
pub fn chain_of(node: NodeRef<'_>) -> Option<NodeRef<'_>> {
    if node.kind() != NodeKind::ExprStmt {
        return None;
    }
    node.field(Role::Value, 0)
        .filter(|v| v.kind() == NodeKind::Chain)
}

/// Attribute path (`self.log.info`) and number of calls of a chain.
pub fn chain_signature(chain: NodeRef<'_>) -> (String, usize) {
    let mut path = String::new();
    let mut calls = 0;
    for part in chain.children() {
        match part.kind() {
            NodeKind::CallArgs => calls += 1,
            _ if part.text().starts_with('[') => {}
            _ => path.push_str(part.text()),
        }
    }
    (path, calls)
}

fn argument_set(chain: NodeRef<'_>) -> HashSet<String> {
    chain
        .children()
        .into_iter()
        .filter(|c| c.kind() == NodeKind::CallArgs)
        .flat_map(|args| args.items())
        .map(|item| item.serialize().trim().to_string())
        .collect()
}

fn body_lines(node: NodeRef<'_>) -> HashSet<String> {
    node.field(Role::Body, 0)
        .map(|body| {
            body.serialize()
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn siblings(node: NodeRef<'_>) -> Vec<NodeRef<'_>> {
    node.parent().map(|p| p.children()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::tree::Tree;

    fn first(tree: &Tree) -> NodeRef<'_> {
        tree.root_ref()
            .children()
            .into_iter()
            .find(|c| c.kind().is_statement())
            .unwrap()
    }

    fn same(a: &str, b: &str) -> bool {
        let config = MergeConfig::default();
        let (a, b) = (parse(a).unwrap(), parse(b).unwrap());
        SimilarityMatcher::new(&config).same_element(first(&a), first(&b))
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("kitten", "kitten"), 0);
        assert_eq!(edit_distance("value", "values"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
    }

    #[test]
    fn test_jaccard() {
        let a: HashSet<i32> = [1, 2, 3].into();
        let b: HashSet<i32> = [2, 3, 4].into();
        assert!((jaccard(&a, &b) - 0.5).abs() < f64::EPSILON);
        assert_eq!(jaccard::<i32>(&HashSet::new(), &HashSet::new()), 1.0);
    }

    #[test]
    fn test_functions_match_by_name() {
        assert!(same("def f():\n    pass\n", "def f(x):\n    return x\n"));
        assert!(!same("def f():\n    pass\n", "def g():\n    pass\n"));
    }

    #[test]
    fn test_assignments_match_close_targets() {
        assert!(same("value = 1\n", "values = 2\n"));
        assert!(!same("value = 1\n", "other = 1\n"));
    }

    #[test]
    fn test_sole_call_matches_on_base_path() {
        assert!(same("log.info('a')\n", "log.info('b', extra=1)\n"));
        assert!(!same("log.info('a')\n", "log.warn('a')\n"));
    }

    #[test]
    fn test_calls_match_on_string_argument() {
        let config = MergeConfig::default();
        let a = parse("call('hello', 1)\n").unwrap();
        let b = parse("call('hello', 2)\ncall('bye', 3)\n").unwrap();
        let matcher = SimilarityMatcher::new(&config);
        let candidates = b.root_ref().children();
        assert!(matcher.same_element(first(&a), candidates[0]));
        assert!(!matcher.same_element(first(&a), candidates[1]));
    }

    #[test]
    fn test_blocks_match_on_header_or_body() {
        assert!(same("if a:\n    x = 1\n", "if a:\n    y = 2\n"));
        assert!(same(
            "if a:\n    x = 1\n    y = 2\n",
            "if b:\n    x = 1\n    y = 2\n    z = 3\n"
        ));
        assert!(!same("if a:\n    x = 1\n", "if b:\n    y = 1\n"));
    }

    #[test]
    fn test_imports_match_by_module() {
        assert!(same("from m import a\n", "from m import (a, b)\n"));
        assert!(!same("from m import a\n", "from n import a\n"));
    }
}
