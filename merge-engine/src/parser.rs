//! Python source to [`Tree`].
//!
//! The source is parsed with tree-sitter's Python grammar and the syntax
//! nodes are mapped onto [`NodeKind`]s. The bytes between nodes (indentation,
//! comments, blank lines, separators) become trivia or separator leaves, so
//! serializing an unmodified tree reproduces the source exactly.

use tree_sitter::Node;

use crate::error::ParseError;
use crate::tree::Tree;
use crate::types::{NodeId, NodeKind, Role};

/// Statements that carry no structure we diff.
const SIMPLE_STATEMENTS: &[&str] = &[
    "pass_statement",
    "break_statement",
    "continue_statement",
    "raise_statement",
    "delete_statement",
    "global_statement",
    "nonlocal_statement",
    "assert_statement",
];

const CLAUSES: &[&str] = &[
    "elif_clause",
    "else_clause",
    "except_clause",
    "except_group_clause",
    "finally_clause",
];

/// Parse Python source into a lossless tree.
pub fn parse(source: &str) -> Result<Tree, ParseError> {
    let missing_final_newline = !source.is_empty() && !source.ends_with('\n');
    let text = if missing_final_newline {
        format!("{source}\n")
    } else {
        source.to_string()
    };
    let syntax = syntax_tree(&text)?;

    let mut builder = Builder {
        tree: Tree::new(),
        source: &text,
        pos: 0,
    };
    let root = builder.tree.root();
    builder.fill_lines(root, &named(syntax.root_node()), "")?;
    builder.tree.set_missing_final_newline(missing_final_newline);
    Ok(builder.tree)
}

/// Check `source` against the tree-sitter Python grammar.
pub fn check_fragment(source: &str) -> Result<(), ParseError> {
    syntax_tree(source).map(|_| ())
}

fn syntax_tree(source: &str) -> Result<tree_sitter::Tree, ParseError> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&python_language())
        .map_err(|e| ParseError::Language(e.to_string()))?;
    let tree = parser.parse(source, None).ok_or(ParseError::ParseFailed)?;
    let root = tree.root_node();
    if root.has_error() {
        let position = first_error(root).unwrap_or(root).start_position();
        return Err(ParseError::Syntax {
            line: position.row + 1,
            column: position.column + 1,
        });
    }
    Ok(tree)
}

fn python_language() -> tree_sitter::Language {
    tree_sitter_python::LANGUAGE.into()
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    (0..node.child_count())
        .filter_map(|i| node.child(i))
        .find_map(first_error)
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    (0..node.child_count()).filter_map(|i| node.child(i)).collect()
}

/// Named children without comments: statements of a block, items of a list.
fn named(node: Node<'_>) -> Vec<Node<'_>> {
    children(node)
        .into_iter()
        .filter(|c| c.is_named() && c.kind() != "comment")
        .collect()
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// Statements sharing a line (`a = 1; b = 2`) form one group.
fn same_line_groups<'t>(statements: &[Node<'t>]) -> Vec<Vec<Node<'t>>> {
    let mut groups: Vec<Vec<Node<'t>>> = Vec::new();
    for &stmt in statements {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|last| last.end_position().row == stmt.start_position().row) =>
            {
                group.push(stmt)
            }
            _ => groups.push(vec![stmt]),
        }
    }
    groups
}

fn compound_kind(kind: &str) -> Option<NodeKind> {
    Some(match kind {
        "function_definition" => NodeKind::Function,
        "class_definition" => NodeKind::Class,
        "if_statement" => NodeKind::If,
        "for_statement" => NodeKind::For,
        "while_statement" => NodeKind::While,
        "with_statement" => NodeKind::With,
        "try_statement" => NodeKind::Try,
        "match_statement" | "case_clause" => NodeKind::Compound,
        _ => return None,
    })
}

/// Descend through wrappers that span exactly their only child
/// (`with_clause` > `with_item` > `call`).
fn unwrap_single(mut node: Node<'_>) -> Node<'_> {
    loop {
        match named(node).as_slice() {
            [only] if only.start_byte() == node.start_byte() && only.end_byte() == node.end_byte() => {
                node = *only;
            }
            _ => return node,
        }
    }
}

enum ChainPart<'t> {
    Segment(usize, usize),
    Call(Node<'t>),
}

/// Parts of a call chain like `obj.attr[i].method(args)`, rooted at a name.
fn chain_parts<'t>(node: Node<'t>, source: &str) -> Option<Vec<ChainPart<'t>>> {
    match node.kind() {
        "identifier" => Some(vec![ChainPart::Segment(node.start_byte(), node.end_byte())]),
        "attribute" | "subscript" => {
            let (field, opener) = if node.kind() == "attribute" {
                ("object", '.')
            } else {
                ("value", '[')
            };
            let base = node.child_by_field_name(field)?;
            if !source[base.end_byte()..].starts_with(opener) {
                return None;
            }
            let mut parts = chain_parts(base, source)?;
            parts.push(ChainPart::Segment(base.end_byte(), node.end_byte()));
            Some(parts)
        }
        "call" => {
            let function = node.child_by_field_name("function")?;
            let arguments = node
                .child_by_field_name("arguments")
                .filter(|a| a.kind() == "argument_list" && a.start_byte() == function.end_byte())?;
            let mut parts = chain_parts(function, source)?;
            parts.push(ChainPart::Call(arguments));
            Some(parts)
        }
        _ => None,
    }
}

struct Builder<'s> {
    tree: Tree,
    source: &'s str,
    /// Start of the first line not yet in the tree.
    pos: usize,
}

impl<'s> Builder<'s> {
    fn text(&self, start: usize, end: usize) -> &'s str {
        let source = self.source;
        &source[start..end]
    }

    fn leaf(&mut self, parent: NodeId, kind: NodeKind, role: Role, start: usize, end: usize) -> NodeId {
        let id = self.tree.add(kind, role, self.text(start, end));
        self.tree.append(parent, id);
        id
    }

    fn line_start(&self, at: usize) -> usize {
        self.source[..at].rfind('\n').map_or(0, |p| p + 1)
    }

    fn line_end(&self, at: usize) -> usize {
        self.source[at..]
            .find('\n')
            .map_or(self.source.len(), |p| at + p + 1)
    }

    fn indent_of(&self, node: Node<'_>) -> &'s str {
        self.text(self.line_start(node.start_byte()), node.start_byte())
    }

    fn check_indent(&self, node: Node<'_>, abs: &str) -> Result<(), ParseError> {
        if self.indent_of(node) == abs {
            Ok(())
        } else {
            Err(ParseError::Indentation {
                line: node.start_position().row + 1,
            })
        }
    }

    /// Fill a line container with `statements` at `abs` indentation and the
    /// blank and comment lines around them.
    fn fill_lines(&mut self, container: NodeId, statements: &[Node<'_>], abs: &str) -> Result<(), ParseError> {
        for group in same_line_groups(statements) {
            let first = group[0];
            self.check_indent(first, abs)?;
            self.trivia(container, self.line_start(first.start_byte()), Some(abs));
            let stmt = self.statement(&group, abs)?;
            self.tree.append(container, stmt);
        }
        let end = if container == self.tree.root() {
            self.source.len()
        } else {
            self.block_trivia_end(abs)
        };
        self.trivia(container, end, Some(abs));
        Ok(())
    }

    /// Blank and comment lines from `pos` up to `end`. Comments indented
    /// differently from `abs` keep their own indentation.
    fn trivia(&mut self, container: NodeId, end: usize, abs: Option<&str>) {
        while self.pos < end {
            let line_end = self.line_end(self.pos).min(end);
            let line = self.text(self.pos, line_end);
            let code = line.trim_start_matches([' ', '\t', '\x0c']);
            if code.trim().is_empty() {
                self.leaf(container, NodeKind::EmptyLine, Role::Item, self.pos, line_end);
            } else {
                let indent = &line[..line.len() - code.len()];
                let id = self.leaf(container, NodeKind::CommentLine, Role::Item, self.pos + indent.len(), line_end);
                if abs.is_some_and(|abs| abs != indent) {
                    self.tree.node_mut(id).indent = Some(indent.to_string());
                }
            }
            self.pos = line_end;
        }
    }

    /// Trivia before a dedent stays in the block up to its last comment
    /// written at block depth; the rest belongs to the enclosing container.
    fn block_trivia_end(&self, abs: &str) -> usize {
        let (mut at, mut keep) = (self.pos, self.pos);
        while at < self.source.len() {
            let end = self.line_end(at);
            let line = self.text(at, end);
            let code = line.trim_start();
            if !code.is_empty() {
                if !code.starts_with('#') {
                    break;
                }
                if line.len() - code.len() >= abs.len() {
                    keep = end;
                }
            }
            at = end;
        }
        keep
    }

    fn statement(&mut self, group: &[Node<'_>], abs: &str) -> Result<NodeId, ParseError> {
        let (first, last) = match group {
            [first, .., last] => (*first, *last),
            [only] => (*only, *only),
            [] => return Err(ParseError::ParseFailed),
        };
        if group.len() > 1 {
            return Ok(self.opaque(NodeKind::ExprStmt, first.start_byte(), last.end_byte()));
        }
        if first.kind() == "decorated_definition" {
            return self.decorated(first, abs);
        }
        match compound_kind(first.kind()) {
            Some(kind) => self.compound(first, kind, abs, None),
            None => Ok(self.simple(first)),
        }
    }

    fn decorated(&mut self, node: Node<'_>, abs: &str) -> Result<NodeId, ParseError> {
        let decorators = self.tree.add(NodeKind::Decorators, Role::Decorators, "");
        for decorator in children(node).into_iter().filter(|c| c.kind() == "decorator") {
            self.check_indent(decorator, abs)?;
            self.trivia(decorators, self.line_start(decorator.start_byte()), None);
            let end = self.line_end(decorator.end_byte());
            self.leaf(decorators, NodeKind::Decorator, Role::Item, decorator.start_byte(), end);
            self.pos = end;
        }
        let definition = node
            .child_by_field_name("definition")
            .ok_or(ParseError::ParseFailed)?;
        self.check_indent(definition, abs)?;
        self.trivia(decorators, self.line_start(definition.start_byte()), None);
        let kind = compound_kind(definition.kind()).ok_or(ParseError::ParseFailed)?;
        self.compound(definition, kind, abs, Some(decorators))
    }

    fn compound(
        &mut self,
        node: Node<'_>,
        kind: NodeKind,
        abs: &str,
        decorators: Option<NodeId>,
    ) -> Result<NodeId, ParseError> {
        let parts = children(node);
        let body_at = parts
            .iter()
            .position(|c| c.kind() == "block")
            .ok_or(ParseError::ParseFailed)?;
        let colon = parts[..body_at]
            .iter()
            .rev()
            .find(|c| c.kind() == ":")
            .copied()
            .ok_or(ParseError::ParseFailed)?;
        let start = node.start_byte();

        let stmt = self.tree.add(kind, Role::Item, "");
        match kind {
            NodeKind::Function | NodeKind::Class => {
                let decorators = decorators.unwrap_or_else(|| {
                    self.tree.add(NodeKind::Decorators, Role::Decorators, "")
                });
                self.tree.append(stmt, decorators);
                let name = node.child_by_field_name("name").ok_or(ParseError::ParseFailed)?;
                self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, name.start_byte());
                let (field, list_kind, role) = if kind == NodeKind::Function {
                    ("parameters", NodeKind::Params, Role::Params)
                } else {
                    ("superclasses", NodeKind::Bases, Role::Bases)
                };
                match node.child_by_field_name(field) {
                    Some(list) => {
                        self.leaf(stmt, NodeKind::Name, Role::Name, name.start_byte(), list.start_byte());
                        let span = (list.start_byte(), list.end_byte());
                        let id = self.inline_list(list_kind, role, list, span, &named(list), true);
                        self.tree.append(stmt, id);
                        self.leaf(stmt, NodeKind::Syntax, Role::Colon, list.end_byte(), colon.end_byte());
                    }
                    None => {
                        self.leaf(stmt, NodeKind::Name, Role::Name, name.start_byte(), name.end_byte());
                        self.leaf(stmt, NodeKind::Syntax, Role::Colon, name.end_byte(), colon.end_byte());
                    }
                }
            }
            NodeKind::Compound => {
                self.leaf(stmt, NodeKind::Syntax, Role::Header, start, colon.end_byte());
            }
            _ => {
                let header: Vec<Node<'_>> = parts[..body_at]
                    .iter()
                    .copied()
                    .filter(|c| c.is_named() && c.kind() != "comment" && c.end_byte() <= colon.start_byte())
                    .collect();
                match (header.first(), header.last()) {
                    (Some(&first), Some(&last)) => {
                        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, first.start_byte());
                        let id = if header.len() == 1 {
                            self.expression(first, Role::Header)
                        } else {
                            self.opaque_leaf(NodeKind::Expr, Role::Header, first.start_byte(), last.end_byte())
                        };
                        self.tree.append(stmt, id);
                        self.leaf(stmt, NodeKind::Syntax, Role::Colon, last.end_byte(), colon.end_byte());
                    }
                    _ => {
                        let keyword_end = parts[..body_at]
                            .iter()
                            .rev()
                            .find(|c| !c.is_named() && c.end_byte() <= colon.start_byte())
                            .map_or(start, |c| c.end_byte());
                        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, keyword_end);
                        self.leaf(stmt, NodeKind::Syntax, Role::Colon, keyword_end, colon.end_byte());
                    }
                }
            }
        }

        let block = self.body(parts[body_at], colon.end_byte(), abs)?;
        self.tree.append(stmt, block);
        if matches!(kind, NodeKind::If | NodeKind::For | NodeKind::While | NodeKind::Try) {
            let clauses = self.clauses(&parts[body_at + 1..], abs)?;
            self.tree.append(stmt, clauses);
        }
        Ok(stmt)
    }

    fn body(&mut self, block: Node<'_>, colon_end: usize, abs: &str) -> Result<NodeId, ParseError> {
        let id = self.tree.add(NodeKind::Block, Role::Body, "");
        let statements = named(block);
        let first = *statements.first().ok_or(ParseError::ParseFailed)?;
        let lead_end = self.line_end(colon_end);
        if first.start_byte() < lead_end {
            self.tree.set_text(id, self.text(colon_end, first.start_byte()));
            self.tree.node_mut(id).inline = true;
            let stmt = self.statement(&statements, abs)?;
            self.tree.append(id, stmt);
            return Ok(id);
        }

        self.tree.set_text(id, self.text(colon_end, lead_end));
        self.pos = lead_end;
        let inner = self.indent_of(first);
        if inner.len() <= abs.len() || !inner.starts_with(abs) {
            return Err(ParseError::Indentation {
                line: first.start_position().row + 1,
            });
        }
        self.tree.node_mut(id).indent = Some(inner[abs.len()..].to_string());
        self.fill_lines(id, &statements, inner)?;
        Ok(id)
    }

    fn clauses(&mut self, parts: &[Node<'_>], abs: &str) -> Result<NodeId, ParseError> {
        let clauses = self.tree.add(NodeKind::Clauses, Role::Clauses, "");
        for &clause in parts.iter().filter(|c| CLAUSES.contains(&c.kind())) {
            self.check_indent(clause, abs)?;
            self.trivia(clauses, self.line_start(clause.start_byte()), Some(abs));
            let id = self.compound(clause, NodeKind::Clause, abs, None)?;
            self.tree.append(clauses, id);
        }
        Ok(clauses)
    }

    /// Line end after a simple statement: whitespace, comment, newline.
    fn trailer(&mut self, stmt: NodeId, end: usize) {
        let line_end = self.line_end(end);
        self.leaf(stmt, NodeKind::Trailer, Role::Trailer, end, line_end);
        self.pos = line_end;
    }

    fn opaque_leaf(&mut self, kind: NodeKind, role: Role, start: usize, end: usize) -> NodeId {
        self.tree.add(kind, role, self.text(start, end))
    }

    /// Statement kept as a single expression leaf plus its trailer.
    fn opaque(&mut self, kind: NodeKind, start: usize, end: usize) -> NodeId {
        let stmt = self.tree.add(kind, Role::Item, "");
        self.leaf(stmt, NodeKind::Expr, Role::Value, start, end);
        self.trailer(stmt, end);
        stmt
    }

    fn simple(&mut self, node: Node<'_>) -> NodeId {
        let (start, end) = (node.start_byte(), node.end_byte());
        let stmt = match node.kind() {
            "import_statement" => {
                let names = field_children(node, "name");
                let Some(first) = names.first() else {
                    return self.opaque(NodeKind::ExprStmt, start, end);
                };
                let stmt = self.tree.add(NodeKind::Import, Role::Item, "");
                self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, first.start_byte());
                let list = self.inline_list(NodeKind::ImportNames, Role::Names, node, (first.start_byte(), end), &names, false);
                self.tree.append(stmt, list);
                stmt
            }
            "import_from_statement" | "future_import_statement" => match self.from_import(node) {
                Some(stmt) => stmt,
                None => return self.opaque(NodeKind::ExprStmt, start, end),
            },
            "return_statement" => {
                let stmt = self.tree.add(NodeKind::Return, Role::Item, "");
                match named(node).first() {
                    Some(&value) => {
                        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, value.start_byte());
                        let id = self.expression(value, Role::Value);
                        self.tree.append(stmt, id);
                    }
                    None => {
                        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, start, end);
                    }
                }
                stmt
            }
            kind if SIMPLE_STATEMENTS.contains(&kind) => return self.opaque(NodeKind::Simple, start, end),
            "expression_statement" => self.expression_statement(node),
            _ => return self.opaque(NodeKind::ExprStmt, start, end),
        };
        self.trailer(stmt, end);
        stmt
    }

    fn from_import(&mut self, node: Node<'_>) -> Option<NodeId> {
        let parts = children(node);
        let module = node
            .child_by_field_name("module_name")
            .or_else(|| parts.get(1).copied())?;
        let mut names = field_children(node, "name");
        if names.is_empty() {
            names = parts.iter().copied().filter(|c| c.kind() == "wildcard_import").collect();
        }
        let first = *names.first()?;
        let open = parts.iter().find(|c| c.kind() == "(");
        let names_start = open.map_or(first.start_byte(), |o| o.start_byte());

        let stmt = self.tree.add(NodeKind::FromImport, Role::Item, "");
        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, node.start_byte(), module.start_byte());
        self.leaf(stmt, NodeKind::Name, Role::Module, module.start_byte(), module.end_byte());
        self.leaf(stmt, NodeKind::Syntax, Role::Keyword, module.end_byte(), names_start);
        let span = (names_start, node.end_byte());
        let list = self.inline_list(NodeKind::ImportNames, Role::Names, node, span, &names, open.is_some());
        self.tree.append(stmt, list);
        Some(stmt)
    }

    fn expression_statement(&mut self, node: Node<'_>) -> NodeId {
        let (start, end) = (node.start_byte(), node.end_byte());
        let inner = named(node);
        let [single] = inner.as_slice() else {
            let stmt = self.tree.add(NodeKind::ExprStmt, Role::Item, "");
            self.leaf(stmt, NodeKind::Expr, Role::Value, start, end);
            return stmt;
        };
        let left = single.child_by_field_name("left");
        let right = single.child_by_field_name("right");
        match (single.kind(), left, right) {
            ("assignment" | "augmented_assignment", Some(left), Some(right)) => {
                let stmt = self.tree.add(NodeKind::Assignment, Role::Item, "");
                let target_end = single
                    .child_by_field_name("type")
                    .map_or(left.end_byte(), |t| t.end_byte());
                self.leaf(stmt, NodeKind::Expr, Role::Target, left.start_byte(), target_end);
                self.leaf(stmt, NodeKind::Syntax, Role::Op, target_end, right.start_byte());
                let id = self.expression(right, Role::Value);
                self.tree.append(stmt, id);
                stmt
            }
            _ => {
                let stmt = self.tree.add(NodeKind::ExprStmt, Role::Item, "");
                let id = self.expression(*single, Role::Value);
                self.tree.append(stmt, id);
                stmt
            }
        }
    }

    fn expression(&mut self, node: Node<'_>, role: Role) -> NodeId {
        let node = unwrap_single(node);
        let (start, end) = (node.start_byte(), node.end_byte());
        match node.kind() {
            "string" => self.opaque_leaf(NodeKind::Str, role, start, end),
            "dictionary" => self.inline_list(NodeKind::Dict, role, node, (start, end), &named(node), true),
            _ => match chain_parts(node, self.source) {
                Some(parts) if parts.iter().any(|p| matches!(p, ChainPart::Call(_))) => {
                    let chain = self.tree.add(NodeKind::Chain, role, "");
                    for part in parts {
                        match part {
                            ChainPart::Segment(a, b) => {
                                self.leaf(chain, NodeKind::Segment, Role::Segment, a, b);
                            }
                            ChainPart::Call(args) => {
                                let span = (args.start_byte(), args.end_byte());
                                let id = self.inline_list(NodeKind::CallArgs, Role::Args, args, span, &named(args), true);
                                self.tree.append(chain, id);
                            }
                        }
                    }
                    chain
                }
                _ => self.opaque_leaf(NodeKind::Expr, role, start, end),
            },
        }
    }

    /// Comma separated list over `span`, which includes the brackets when
    /// `bracketed`. Commas are looked up among the children of `owner`.
    fn inline_list(
        &mut self,
        kind: NodeKind,
        role: Role,
        owner: Node<'_>,
        (start, end): (usize, usize),
        items: &[Node<'_>],
        bracketed: bool,
    ) -> NodeId {
        let list = self.tree.add(kind, role, "");
        let open_end = items
            .first()
            .map_or(start + usize::from(bracketed), |item| item.start_byte());
        if bracketed || open_end > start {
            self.leaf(list, NodeKind::Syntax, Role::Open, start, open_end);
        }
        let mut close_start = open_end;
        for (i, item) in items.iter().enumerate() {
            let id = self.list_item(kind, *item);
            self.tree.append(list, id);
            match items.get(i + 1) {
                Some(next) => {
                    self.leaf(list, NodeKind::Separator, Role::Sep, item.end_byte(), next.start_byte());
                }
                None => {
                    close_start = item.end_byte();
                    let comma = children(owner)
                        .into_iter()
                        .find(|c| c.kind() == "," && c.start_byte() >= item.end_byte() && c.end_byte() <= end);
                    if let Some(comma) = comma {
                        self.leaf(list, NodeKind::Separator, Role::Sep, item.end_byte(), comma.end_byte());
                        close_start = comma.end_byte();
                    }
                }
            }
        }
        if bracketed || close_start < end {
            self.leaf(list, NodeKind::Syntax, Role::Close, close_start, end);
        }
        list
    }

    fn list_item(&mut self, kind: NodeKind, item: Node<'_>) -> NodeId {
        let (start, end) = (item.start_byte(), item.end_byte());
        match kind {
            NodeKind::ImportNames => self.opaque_leaf(NodeKind::ImportName, Role::Item, start, end),
            NodeKind::Dict => self.dict_item(item),
            NodeKind::Params => {
                let arg = self.tree.add(NodeKind::Argument, Role::Item, "");
                self.leaf(arg, NodeKind::Expr, Role::Value, start, end);
                arg
            }
            _ => self.argument(item),
        }
    }

    fn argument(&mut self, item: Node<'_>) -> NodeId {
        let arg = self.tree.add(NodeKind::Argument, Role::Item, "");
        match item.kind() {
            "keyword_argument" => {
                if let (Some(name), Some(value)) =
                    (item.child_by_field_name("name"), item.child_by_field_name("value"))
                {
                    self.leaf(arg, NodeKind::Name, Role::Name, name.start_byte(), name.end_byte());
                    self.leaf(arg, NodeKind::Syntax, Role::Assign, name.end_byte(), value.start_byte());
                    let id = self.expression(value, Role::Value);
                    self.tree.append(arg, id);
                    return arg;
                }
            }
            "list_splat" | "dictionary_splat" => {
                if let Some(&value) = named(item).first() {
                    self.leaf(arg, NodeKind::Syntax, Role::Op, item.start_byte(), value.start_byte());
                    let id = self.expression(value, Role::Value);
                    self.tree.append(arg, id);
                    return arg;
                }
            }
            _ => {}
        }
        let id = self.expression(item, Role::Value);
        self.tree.append(arg, id);
        arg
    }

    fn dict_item(&mut self, item: Node<'_>) -> NodeId {
        let entry = self.tree.add(NodeKind::DictItem, Role::Item, "");
        let key = item.child_by_field_name("key");
        let value = item.child_by_field_name("value");
        match (item.kind(), key, value) {
            ("pair", Some(key), Some(value)) => {
                let id = self.expression(key, Role::Key);
                self.tree.append(entry, id);
                self.leaf(entry, NodeKind::Syntax, Role::Colon, key.end_byte(), value.start_byte());
                let id = self.expression(value, Role::Value);
                self.tree.append(entry, id);
            }
            _ => {
                self.leaf(entry, NodeKind::Expr, Role::Value, item.start_byte(), item.end_byte());
            }
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os, sys
from module1 import (fun1,
                     fun2)  # names


@decorator(arg=1)
def fun1(a, b=2, *args, **kwargs) -> int:
    """Doc."""
    x = {'a': 1, "b": [1, 2]}
    if a: return b
    elif b:
        pass
    else:
        # odd comment
          # deeper
        call('hello', key=value).other()
    return x

class A(Base, metaclass=Meta):
    y: int = 3
    def m(self): pass

with fun():
    call('hello')
"#;

    fn kinds(tree: &Tree, id: NodeId) -> Vec<NodeKind> {
        tree.get(id).children().iter().map(|c| c.kind()).collect()
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let tree = parse(SAMPLE).unwrap();
        assert_eq!(tree.to_source(), SAMPLE);
    }

    #[test]
    fn test_missing_final_newline_is_kept() {
        let tree = parse("x = 1").unwrap();
        assert_eq!(tree.to_source(), "x = 1");
        assert_eq!(parse("").unwrap().to_source(), "");
    }

    #[test]
    fn test_module_statements() {
        let tree = parse(SAMPLE).unwrap();
        assert_eq!(
            kinds(&tree, tree.root()),
            vec![
                NodeKind::Import,
                NodeKind::FromImport,
                NodeKind::EmptyLine,
                NodeKind::EmptyLine,
                NodeKind::Function,
                NodeKind::EmptyLine,
                NodeKind::Class,
                NodeKind::EmptyLine,
                NodeKind::With,
            ]
        );
    }

    #[test]
    fn test_function_fields() {
        let tree = parse(SAMPLE).unwrap();
        let function = tree.root_ref().children()[4];
        assert_eq!(function.field_text(Role::Name), "fun1");
        let params = function.field(Role::Params, 0).unwrap();
        let keys: Vec<String> = params.items().iter().map(|i| i.item_key()).collect();
        assert_eq!(keys, vec!["a", "b", "args", "kwargs"]);
        let decorators = function.field(Role::Decorators, 0).unwrap();
        assert_eq!(decorators.children().len(), 1);
        let body = function.field(Role::Body, 0).unwrap();
        assert_eq!(body.node().indent.as_deref(), Some("    "));
    }

    #[test]
    fn test_from_import_names() {
        let tree = parse("from module1 import (fun1, fun2 as f)\n").unwrap();
        let import = tree.root_ref().children()[0];
        assert_eq!(import.kind(), NodeKind::FromImport);
        assert_eq!(import.field_text(Role::Module), "module1");
        let names = import.field(Role::Names, 0).unwrap();
        let keys: Vec<String> = names.items().iter().map(|i| i.item_key()).collect();
        assert_eq!(keys, vec!["fun1", "fun2"]);
        assert!(names.field(Role::Open, 0).is_some());
    }

    #[test]
    fn test_call_chain_and_arguments() {
        let tree = parse("log.info('hello', level=2)\n").unwrap();
        let stmt = tree.root_ref().children()[0];
        let chain = stmt.field(Role::Value, 0).unwrap();
        assert_eq!(chain.kind(), NodeKind::Chain);
        let args = chain.field(Role::Args, 0).unwrap();
        let items = args.items();
        assert_eq!(items[0].item_key(), "#0");
        assert_eq!(items[0].field(Role::Value, 0).unwrap().kind(), NodeKind::Str);
        assert_eq!(items[1].item_key(), "level");
    }

    #[test]
    fn test_assignment_operators() {
        let tree = parse("a += 1\nb == c\nd: int = 2\n").unwrap();
        let stmts = tree.root_ref().children();
        assert_eq!(stmts[0].kind(), NodeKind::Assignment);
        assert_eq!(stmts[0].field_text(Role::Op), "+=");
        assert_eq!(stmts[1].kind(), NodeKind::ExprStmt);
        assert_eq!(stmts[2].field_text(Role::Target), "d: int");
    }

    #[test]
    fn test_trivia_before_dedent_goes_to_parent() {
        let source = "def f():\n    x = 1\n    # tail\n\n# section\ny = 2\n";
        let tree = parse(source).unwrap();
        assert_eq!(
            kinds(&tree, tree.root()),
            vec![
                NodeKind::Function,
                NodeKind::EmptyLine,
                NodeKind::CommentLine,
                NodeKind::Assignment,
            ]
        );
        assert_eq!(tree.to_source(), source);
    }

    #[test]
    fn test_clauses_and_dict() {
        let source = "if a:\n    x = {'k': 1}\nelse:\n    y = 2\n";
        let tree = parse(source).unwrap();
        let stmt = tree.root_ref().children()[0];
        let clauses = stmt.field(Role::Clauses, 0).unwrap();
        assert_eq!(clauses.children().len(), 1);
        let body = stmt.field(Role::Body, 0).unwrap();
        let value = body.children()[0].field(Role::Value, 0).unwrap();
        assert_eq!(value.kind(), NodeKind::Dict);
        assert_eq!(value.items()[0].item_key(), "'k'");
    }

    #[test]
    fn test_shared_lines_and_trailing_commas() {
        let source = "a = 1; b = 2\nf(\n    x,  # first\n    y,\n)\nfrom . import (z,)\n";
        let tree = parse(source).unwrap();
        assert_eq!(tree.to_source(), source);
        let stmts = tree.root_ref().children();
        assert_eq!(stmts[0].kind(), NodeKind::ExprStmt);
        assert_eq!(stmts[0].field_text(Role::Value), "a = 1; b = 2");

        let args = stmts[1].field(Role::Value, 0).unwrap().field(Role::Args, 0).unwrap();
        let texts: Vec<&str> = args.children().iter().map(|c| c.text()).collect();
        assert_eq!(texts, vec!["(\n    ", "", ",  # first\n    ", "", ",", "\n)"]);

        assert_eq!(stmts[2].field_text(Role::Module), ".");
        let names = stmts[2].field(Role::Names, 0).unwrap();
        assert_eq!(names.items().len(), 1);
        assert!(names.children().iter().any(|c| c.kind() == NodeKind::Separator));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = parse("def f(:\n    pass\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
    }
}
