//! Core types for the merge engine.
//!
//! Python sources are modelled as a lossless concrete syntax tree whose node
//! kinds form a closed set:
//! - **Line containers** hold one statement, comment or blank line per child
//!   (module, indented blocks, `elif`/`else` clause lists, decorator lists).
//! - **Composite nodes** hold named fields, told apart by [`Role`].
//! - **Inline lists** hold comma separated items (call arguments, imports, dicts).
//! - **Leaves** hold literal text.

use std::fmt;

/// Index of a node inside its [`Tree`](crate::tree::Tree) arena.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    // line containers
    Module,
    Block,
    Clauses,
    Decorators,
    // line elements
    EmptyLine,
    CommentLine,
    Decorator,
    // statements
    Function,
    Class,
    If,
    For,
    While,
    With,
    Try,
    /// `elif`, `else`, `except` and `finally` parts of a compound statement.
    Clause,
    /// Compound statement the engine has no comparator for (`match`, `case`).
    Compound,
    Import,
    FromImport,
    Assignment,
    Return,
    ExprStmt,
    Simple,
    // inline lists
    CallArgs,
    Params,
    Bases,
    ImportNames,
    Dict,
    // list items
    Argument,
    ImportName,
    DictItem,
    Separator,
    // expressions
    Chain,
    Segment,
    Str,
    Expr,
    // tokens
    Syntax,
    Name,
    Trailer,
}

impl NodeKind {
    /// Containers whose children are whole source lines.
    pub fn is_line_container(self) -> bool {
        matches!(
            self,
            NodeKind::Module | NodeKind::Block | NodeKind::Clauses | NodeKind::Decorators
        )
    }

    /// Comma separated lists with keyed items.
    pub fn is_inline_list(self) -> bool {
        matches!(
            self,
            NodeKind::CallArgs
                | NodeKind::Params
                | NodeKind::Bases
                | NodeKind::ImportNames
                | NodeKind::Dict
        )
    }

    /// Nodes carrying their content in `text` rather than in children.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            NodeKind::EmptyLine
                | NodeKind::CommentLine
                | NodeKind::Decorator
                | NodeKind::ImportName
                | NodeKind::Separator
                | NodeKind::Segment
                | NodeKind::Str
                | NodeKind::Expr
                | NodeKind::Syntax
                | NodeKind::Name
                | NodeKind::Trailer
        )
    }

    /// Line elements with no meaning of their own.
    pub fn is_formatting(self) -> bool {
        matches!(self, NodeKind::EmptyLine)
    }

    /// Line elements that make a block syntactically non-empty.
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            NodeKind::Function
                | NodeKind::Class
                | NodeKind::If
                | NodeKind::For
                | NodeKind::While
                | NodeKind::With
                | NodeKind::Try
                | NodeKind::Compound
                | NodeKind::Import
                | NodeKind::FromImport
                | NodeKind::Assignment
                | NodeKind::Return
                | NodeKind::ExprStmt
                | NodeKind::Simple
        )
    }

    /// Statements that only introduce a nested scope and can be unwrapped.
    pub fn is_scoping(self) -> bool {
        matches!(self, NodeKind::With | NodeKind::If | NodeKind::For | NodeKind::While)
    }

    /// Statements with a guarded body.
    pub fn is_block_construct(self) -> bool {
        matches!(
            self,
            NodeKind::If | NodeKind::For | NodeKind::While | NodeKind::With | NodeKind::Clause
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Module => "module",
            NodeKind::Block => "block",
            NodeKind::Clauses => "clauses",
            NodeKind::Decorators => "decorators",
            NodeKind::EmptyLine => "empty line",
            NodeKind::CommentLine => "comment",
            NodeKind::Decorator => "decorator",
            NodeKind::Function => "def",
            NodeKind::Class => "class",
            NodeKind::If => "if",
            NodeKind::For => "for",
            NodeKind::While => "while",
            NodeKind::With => "with",
            NodeKind::Try => "try",
            NodeKind::Clause => "clause",
            NodeKind::Compound => "compound statement",
            NodeKind::Import => "import",
            NodeKind::FromImport => "from-import",
            NodeKind::Assignment => "assignment",
            NodeKind::Return => "return",
            NodeKind::ExprStmt => "expression",
            NodeKind::Simple => "statement",
            NodeKind::CallArgs => "call arguments",
            NodeKind::Params => "parameters",
            NodeKind::Bases => "base classes",
            NodeKind::ImportNames => "imported names",
            NodeKind::Dict => "dict",
            NodeKind::Argument => "argument",
            NodeKind::ImportName => "imported name",
            NodeKind::DictItem => "dict item",
            NodeKind::Separator => "separator",
            NodeKind::Chain => "call chain",
            NodeKind::Segment => "chain segment",
            NodeKind::Str => "string",
            NodeKind::Expr => "expression",
            NodeKind::Syntax => "syntax",
            NodeKind::Name => "name",
            NodeKind::Trailer => "line end",
        };
        f.write_str(name)
    }
}

/// The named field a child fills inside its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Element of a line container or inline list.
    Item,
    Keyword,
    Name,
    /// Guarding expression of a block construct (test, iterator, context).
    Header,
    Colon,
    Body,
    Clauses,
    Decorators,
    Params,
    Bases,
    Target,
    Op,
    /// `=` of a keyword argument.
    Assign,
    Value,
    /// Module path of a `from` import.
    Module,
    Names,
    Trailer,
    Open,
    Close,
    Sep,
    Key,
    Segment,
    Args,
}

/// Durable identity of a statement, surviving unrelated content edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StableKey {
    /// Function or class by declared name.
    Def(NodeKind, String),
    /// Import by module path.
    Import(String),
    /// Assignment by target text.
    Assign(String),
    /// The only `return` of its block.
    LoneReturn,
    /// The only `if` statement of its block.
    SoleIf,
}

impl fmt::Display for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StableKey::Def(kind, name) => write!(f, "{kind} {name}"),
            StableKey::Import(path) => write!(f, "import {path}"),
            StableKey::Assign(target) => write!(f, "{target} = ..."),
            StableKey::LoneReturn => write!(f, "return"),
            StableKey::SoleIf => write!(f, "if"),
        }
    }
}

/// Why a change action could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    ContextNotFound,
    ElementNotFound,
    FieldNotFound,
    /// The live content matches neither the expected old nor the new value.
    ContentDiverged,
    /// The element to remove was edited on the current side.
    RemovedElementModified,
    Ambiguous,
    /// An item with the same key but other content is already present.
    AlreadyPresent,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::ContextNotFound => "context not found",
            ConflictReason::ElementNotFound => "element not found",
            ConflictReason::FieldNotFound => "field not found",
            ConflictReason::ContentDiverged => "content changed differently",
            ConflictReason::RemovedElementModified => "removed element was modified",
            ConflictReason::Ambiguous => "ambiguous match",
            ConflictReason::AlreadyPresent => "already present with other content",
        };
        f.write_str(text)
    }
}

/// A change that could not be applied. Recorded and rendered inline, never raised.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// Source text of the nodes the failed action was about.
    pub subjects: Vec<String>,
    /// Short description of the originating action.
    pub action: String,
    pub reason: ConflictReason,
    /// Node of the current tree the markers are placed next to.
    pub at: Option<NodeId>,
}

impl Conflict {
    pub fn new(reason: ConflictReason, action: String, subjects: Vec<String>) -> Self {
        Self {
            subjects,
            action,
            reason,
            at: None,
        }
    }

    pub fn at(mut self, node: NodeId) -> Self {
        self.at = Some(node);
        self
    }
}

/// Non-fatal notice emitted while diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: NodeKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
