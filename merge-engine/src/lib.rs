//! # pymerge
//!
//! Structural three-way merge for Python source files.
//!
//! Instead of merging lines, the engine parses all three versions into
//! lossless syntax trees, computes the edits that turn the common ancestor
//! into the *other* version, and replays them onto the *current* version.
//!
//! ## Approach
//!
//! 1. **Lossless parsing**: tree-sitter's Python grammar parses each input and
//!    its syntax nodes are mapped onto the merge tree. Every byte of the input
//!    (comments, blank lines, bracket layout) lives in the tree, so an
//!    unchanged tree serializes back to its source exactly.
//!
//! 2. **Structural diff**: line containers are aligned element by element
//!    with bounded lookahead, move, rename and scope-unwrap detection;
//!    argument, parameter, import and dict lists are diffed by item key.
//!
//! 3. **Anchored replay**: each change carries the text of its neighbours.
//!    On the current tree the change is relocated by stable key, anchor
//!    context, unique content or similarity, in that order.
//!
//! 4. **Inline conflicts**: a change that cannot be placed unambiguously is
//!    skipped and rendered as a marker comment block next to the affected
//!    code. The merge itself always completes.
//!
//! ## Example
//!
//! ```rust
//! use pymerge::Resolver;
//!
//! let resolver = Resolver::default();
//! let output = resolver
//!     .resolve_file("x = 1\n", "x = 1\ny = 2\n", "import os\nx = 1\n")
//!     .unwrap();
//!
//! assert!(output.all_resolved);
//! assert_eq!(output.merged_content, "import os\nx = 1\ny = 2\n");
//! ```

pub mod actions;
pub mod apply;
pub mod config;
pub mod conflicts;
pub mod context;
pub mod diff;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod resolver;
pub mod tree;
pub mod types;

// Re-export primary public API
pub use actions::{ChangeAction, ElementLocator};
pub use apply::Applier;
pub use config::MergeConfig;
pub use conflicts::{ConflictRecorder, has_markers};
pub use context::AnchorContext;
pub use diff::TreeComparator;
pub use error::{MergeError, ParseError};
pub use matcher::SimilarityMatcher;
pub use resolver::{FileResolverOutput, Resolver, merge};
pub use tree::{Fragment, NodeRef, Tree};
pub use types::{Conflict, ConflictReason, Diagnostic, NodeId, NodeKind, Role, StableKey};
