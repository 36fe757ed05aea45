//! Recursive-descent parser for filter queries.
//!
//! ```text
//! query    = or_expr
//! or_expr  = and_expr ("|" and_expr)*
//! and_expr = unary (("&")? unary)*        adjacency is an implicit AND
//! unary    = "!" unary | primary
//! primary  = "(" or_expr ")" | "@" name | [state] term
//! term     = category ":" value | category op value | phrase | regex | wildcard | word
//! value    = word | number | date | phrase | value ".." value
//! ```
//!
//! The parser never fails. Problems are collected as [`ParseError`]s (bad
//! grammar, recovered at the next boundary) or warnings (degraded but usable
//! interpretation).

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{BoolKind, Category, CatuskotiState, ComparisonOp, FilterNode, FilterTree, ParseError};
use super::compiler::date_period;
use super::lexer::{tokenize, Token, TokenKind};
use crate::stacks::{normalize_name, StackLookup};

const DEFAULT_MAX_DEPTH: usize = 8;

pub struct ParseOptions<'a> {
    /// Store consulted for `@name` references. Without one every reference
    /// stays unresolved.
    pub stacks: Option<&'a dyn StackLookup>,
    /// Maximum nesting of stack references.
    pub max_depth: usize,
    /// Stack whose own query is being parsed; referring back to it is a cycle.
    pub origin: Option<String>,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            stacks: None,
            max_depth: DEFAULT_MAX_DEPTH,
            origin: None,
        }
    }
}

impl<'a> ParseOptions<'a> {
    pub fn with_stacks(stacks: &'a dyn StackLookup) -> Self {
        Self {
            stacks: Some(stacks),
            ..Default::default()
        }
    }
}

/// Parses `input` into a fresh [`FilterTree`].
pub fn parse_query(input: &str, options: &ParseOptions<'_>) -> FilterTree {
    let chain = options
        .origin
        .as_deref()
        .map(|name| vec![normalize_name(name)])
        .unwrap_or_default();

    let output = Parser::new(
        input,
        options.stacks,
        chain,
        options.max_depth.max(1),
        ResolveCache::default(),
    )
    .run();

    FilterTree {
        root: output.root,
        original_query: input.to_string(),
        parse_errors: output.errors,
        parse_warnings: output.warnings,
    }
}

struct ParseOutput {
    root: Option<FilterNode>,
    errors: Vec<ParseError>,
    warnings: Vec<String>,
    cyclic: bool,
    cache: ResolveCache,
}

/// Outcome of expanding one `@name`, kept so repeated references to the
/// same stack share a single subtree.
#[derive(Clone)]
struct Resolution {
    root: Option<Arc<FilterNode>>,
    errors: Vec<String>,
    warnings: Vec<String>,
    cyclic: bool,
}

/// Lives for one top-level parse. Acyclic expansions only depend on how deep
/// the reference sits; expansions that ran into a cycle depend on the whole
/// chain that led to them.
#[derive(Default)]
struct ResolveCache {
    by_depth: HashMap<(String, usize), Resolution>,
    by_chain: HashMap<Vec<String>, Resolution>,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<ParseError>,
    warnings: Vec<String>,
    stacks: Option<&'a dyn StackLookup>,
    /// Stacks currently being expanded, outermost first.
    chain: Vec<String>,
    max_depth: usize,
    /// Set when this parse, or any expansion below it, hit a cycle.
    cyclic: bool,
    cache: ResolveCache,
}

impl<'a> Parser<'a> {
    fn new(
        input: &str,
        stacks: Option<&'a dyn StackLookup>,
        chain: Vec<String>,
        max_depth: usize,
        cache: ResolveCache,
    ) -> Self {
        Self {
            tokens: tokenize(input),
            pos: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            stacks,
            chain,
            max_depth,
            cyclic: false,
            cache,
        }
    }

    fn run(mut self) -> ParseOutput {
        let mut roots = Vec::new();
        loop {
            if let Some(node) = self.parse_or() {
                roots.push(node);
            }
            let tok = self.peek().clone();
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::RParen => {
                    self.error_at(&tok, "unmatched ')'");
                    self.advance();
                }
                _ => {
                    self.error_at(&tok, format!("unexpected {}", tok.kind));
                    self.advance();
                }
            }
        }

        ParseOutput {
            root: FilterNode::join(BoolKind::And, roots),
            errors: self.errors,
            warnings: self.warnings,
            cyclic: self.cyclic,
            cache: self.cache,
        }
    }

    fn peek(&self) -> &Token {
        // tokens always end with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at_boundary(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Or | TokenKind::RParen | TokenKind::Eof
        )
    }

    fn error_at(&mut self, tok: &Token, message: impl Into<String>) {
        self.errors
            .push(ParseError::new(message, tok.position, tok.length.max(1)));
    }

    fn error_span(&mut self, message: impl Into<String>, start: usize, end: usize) {
        self.errors
            .push(ParseError::new(message, start, end.saturating_sub(start).max(1)));
    }

    /// Skips the rest of a malformed term: stops at `&`, `|`, `)`, end of
    /// input, or the next whitespace-separated token.
    fn recover(&mut self) {
        loop {
            let kind = &self.peek().kind;
            if matches!(
                kind,
                TokenKind::And | TokenKind::Or | TokenKind::RParen | TokenKind::Eof
            ) {
                return;
            }
            let separated = self.pos > 0
                && self
                    .tokens
                    .get(self.pos - 1)
                    .is_some_and(|prev| self.peek().position > prev.end());
            if separated {
                return;
            }
            self.advance();
        }
    }

    fn parse_or(&mut self) -> Option<FilterNode> {
        let mut children = Vec::new();
        let before = self.pos;
        if let Some(node) = self.parse_and() {
            children.push(node);
        }
        let mut seen_term = self.pos > before;
        while self.peek().kind == TokenKind::Or {
            let op = self.advance();
            if !seen_term {
                self.error_at(&op, "expected a term before '|'");
            }
            seen_term = true;
            if matches!(
                self.peek().kind,
                TokenKind::Or | TokenKind::RParen | TokenKind::Eof
            ) {
                self.error_at(&op, "expected a term after '|'");
                continue;
            }
            if let Some(node) = self.parse_and() {
                children.push(node);
            }
        }
        FilterNode::join(BoolKind::Or, children)
    }

    fn parse_and(&mut self) -> Option<FilterNode> {
        let mut children = Vec::new();
        let mut seen_term = false;
        loop {
            if self.at_boundary() {
                break;
            }
            if self.peek().kind == TokenKind::And {
                let op = self.advance();
                if !seen_term {
                    self.error_at(&op, "expected a term before '&'");
                }
                if self.at_boundary() || self.peek().kind == TokenKind::And {
                    self.error_at(&op, "expected a term after '&'");
                }
                continue;
            }

            let before = self.pos;
            seen_term = true;
            if let Some(node) = self.parse_unary() {
                children.push(node);
            }
            if self.pos == before {
                self.advance();
            }
        }
        FilterNode::join(BoolKind::And, children)
    }

    fn parse_unary(&mut self) -> Option<FilterNode> {
        if self.peek().kind == TokenKind::Not {
            let op = self.advance();
            if self.at_boundary() || self.peek().kind == TokenKind::And {
                self.error_at(&op, "expected a term after '!'");
                return None;
            }
            return self.parse_unary().map(FilterNode::negate);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<FilterNode> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::LParen => {
                self.advance();
                if self.peek().kind == TokenKind::RParen {
                    self.advance();
                    self.warnings
                        .push(format!("empty group at position {} ignored", tok.position));
                    return None;
                }
                let inner = self.parse_or();
                if self.peek().kind == TokenKind::RParen {
                    self.advance();
                } else {
                    self.error_at(&tok, "unclosed '('");
                }
                inner
            }
            TokenKind::StackRef(ref name) => {
                let name = name.clone();
                self.advance();
                Some(self.resolve_stack(&tok, name))
            }
            TokenKind::State(state) => {
                self.advance();
                if starts_term(&self.peek().kind) {
                    self.parse_term(Some((state, tok)))
                } else {
                    let found = self.peek().kind.to_string();
                    self.error_at(&tok, format!("expected a term after {}, found {found}", tok.kind));
                    None
                }
            }
            TokenKind::Word(_)
            | TokenKind::Number(_)
            | TokenKind::Date(_)
            | TokenKind::Phrase(_)
            | TokenKind::Regex { .. }
            | TokenKind::Wildcard(_) => self.parse_term(None),
            TokenKind::Error(ref msg) => {
                let msg = msg.clone();
                self.advance();
                self.error_at(&tok, msg);
                None
            }
            TokenKind::Not => self.parse_unary(),
            TokenKind::Colon
            | TokenKind::Gt
            | TokenKind::Lt
            | TokenKind::Eq
            | TokenKind::Gte
            | TokenKind::Lte
            | TokenKind::Range => {
                self.advance();
                self.error_at(&tok, format!("unexpected {}", tok.kind));
                self.recover();
                None
            }
            TokenKind::And | TokenKind::Or | TokenKind::RParen | TokenKind::Eof => {
                self.error_at(&tok, format!("expected a term, found {}", tok.kind));
                None
            }
        }
    }

    fn parse_term(&mut self, prefix: Option<(CatuskotiState, Token)>) -> Option<FilterNode> {
        let tok = self.advance();
        let start = prefix.as_ref().map_or(tok.position, |(_, p)| p.position);
        let state = prefix.as_ref().map(|(s, _)| *s);
        let prefix_tok = prefix.as_ref().map(|(_, p)| p);

        match tok.kind {
            TokenKind::Word(ref word) => {
                let next = &self.peek().kind;
                let comparable = Category::from_name(word).is_some_and(|c| c.is_comparable());
                if *next == TokenKind::Colon {
                    self.advance();
                    self.parse_category_value(word, state, prefix_tok, start)
                } else if comparable && is_comparison_op(next) {
                    self.parse_category_value(word, state, prefix_tok, start)
                } else {
                    Some(FilterNode::catuskoti(
                        Category::Content,
                        word.clone(),
                        state.unwrap_or(CatuskotiState::Is),
                    ))
                }
            }
            TokenKind::Number(ref value) | TokenKind::Date(ref value) => Some(FilterNode::catuskoti(
                Category::Content,
                value.clone(),
                state.unwrap_or(CatuskotiState::Is),
            )),
            TokenKind::Phrase(ref phrase) => match state {
                None | Some(CatuskotiState::Is) => Some(FilterNode::Phrase {
                    phrase: phrase.clone(),
                    field: None,
                }),
                Some(other) => Some(FilterNode::catuskoti(Category::Content, phrase.clone(), other)),
            },
            TokenKind::Regex {
                ref pattern,
                ref flags,
            } => {
                let node = self.regex_node(&tok, pattern, flags, None)?;
                self.apply_state(node, state, prefix_tok)
            }
            TokenKind::Wildcard(ref pattern) => {
                let node = FilterNode::Wildcard {
                    pattern: pattern.clone(),
                    field: None,
                };
                self.apply_state(node, state, prefix_tok)
            }
            _ => {
                self.error_at(&tok, format!("expected a term, found {}", tok.kind));
                None
            }
        }
    }

    /// Applies a state prefix to a leaf that has no catuskoti state of its
    /// own: `+` is a no-op, `-` negates, `~`/`?` are errors.
    fn apply_state(
        &mut self,
        node: FilterNode,
        state: Option<CatuskotiState>,
        prefix: Option<&Token>,
    ) -> Option<FilterNode> {
        match state {
            None | Some(CatuskotiState::Is) | Some(CatuskotiState::Neutral) => Some(node),
            Some(CatuskotiState::IsNot) => Some(FilterNode::negate(node)),
            Some(other) => {
                if let Some(tok) = prefix {
                    let ch = other.prefix().unwrap_or('?');
                    self.error_at(
                        tok,
                        format!("'{ch}' only applies to category terms; use '+' or '-' here"),
                    );
                }
                None
            }
        }
    }

    fn regex_node(
        &mut self,
        tok: &Token,
        pattern: &str,
        flags: &str,
        field: Option<String>,
    ) -> Option<FilterNode> {
        if let Err(msg) = validate_regex(pattern, flags) {
            self.error_at(tok, msg);
            return None;
        }
        Some(FilterNode::Regex {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            field,
        })
    }

    /// Everything after `name:` (or `name` directly followed by a comparison
    /// operator).
    fn parse_category_value(
        &mut self,
        name: &str,
        state: Option<CatuskotiState>,
        prefix: Option<&Token>,
        start: usize,
    ) -> Option<FilterNode> {
        let category = Category::from_name(name);
        let value_tok = self.peek().clone();

        if let Some(category) = category.filter(Category::is_comparable) {
            return self.parse_comparison(category, state, prefix, start);
        }

        let field = name.to_lowercase();
        match value_tok.kind {
            TokenKind::Word(ref v)
            | TokenKind::Number(ref v)
            | TokenKind::Date(ref v)
            | TokenKind::Phrase(ref v) => {
                self.advance();
                let state = state.unwrap_or(CatuskotiState::Is);
                match category {
                    Some(category) => {
                        let value = if category.folds_case() {
                            v.to_lowercase()
                        } else {
                            v.clone()
                        };
                        Some(FilterNode::catuskoti(category, value, state))
                    }
                    None if matches!(value_tok.kind, TokenKind::Phrase(_)) => {
                        let node = FilterNode::Phrase {
                            phrase: v.clone(),
                            field: Some(field),
                        };
                        self.apply_state(node, Some(state), prefix)
                    }
                    None => {
                        log::debug!("unknown category {name:?}, degrading to content search");
                        self.warnings.push(format!(
                            "unknown category '{name}', searching content for '{v}' instead"
                        ));
                        Some(FilterNode::catuskoti(Category::Content, v.clone(), state))
                    }
                }
            }
            TokenKind::Regex {
                ref pattern,
                ref flags,
            } => {
                self.advance();
                let field = targeted_field(category, field);
                let node = self.regex_node(&value_tok, pattern, flags, field)?;
                self.apply_state(node, state, prefix)
            }
            TokenKind::Wildcard(ref pattern) => {
                self.advance();
                let node = FilterNode::Wildcard {
                    pattern: pattern.clone(),
                    field: targeted_field(category, field),
                };
                self.apply_state(node, state, prefix)
            }
            _ => {
                self.error_span(
                    format!("expected a value after '{name}:'"),
                    start,
                    value_tok.position,
                );
                self.recover();
                None
            }
        }
    }

    fn parse_comparison(
        &mut self,
        category: Category,
        state: Option<CatuskotiState>,
        prefix: Option<&Token>,
        start: usize,
    ) -> Option<FilterNode> {
        let tok = self.peek().clone();
        let node = match tok.kind {
            TokenKind::Gt | TokenKind::Gte | TokenKind::Lt | TokenKind::Lte | TokenKind::Eq => {
                self.advance();
                let operator = match tok.kind {
                    TokenKind::Gt => ComparisonOp::Gt,
                    TokenKind::Gte => ComparisonOp::Gte,
                    TokenKind::Lt => ComparisonOp::Lt,
                    TokenKind::Lte => ComparisonOp::Lte,
                    _ => ComparisonOp::Eq,
                };
                let value = self.expect_value(category, &tok)?;
                FilterNode::comparison(category, operator, value)
            }
            // `..500` is an open lower bound
            TokenKind::Range => {
                self.advance();
                let value = self.expect_value(category, &tok)?;
                FilterNode::comparison(category, ComparisonOp::Lte, value)
            }
            TokenKind::Word(_) | TokenKind::Number(_) | TokenKind::Date(_) => {
                let value = self.expect_value(category, &tok)?;
                if self.peek().kind == TokenKind::Range {
                    let range = self.advance();
                    if matches!(self.peek().kind, TokenKind::Number(_) | TokenKind::Date(_)) {
                        let end = self.expect_value(category, &range)?;
                        FilterNode::Comparison {
                            category,
                            operator: ComparisonOp::Range,
                            value,
                            end_value: Some(end),
                        }
                    } else {
                        // `100..` is an open upper bound
                        FilterNode::comparison(category, ComparisonOp::Gte, value)
                    }
                } else if category == Category::Date {
                    return Some(FilterNode::catuskoti(
                        category,
                        value,
                        state.unwrap_or(CatuskotiState::Is),
                    ));
                } else {
                    FilterNode::comparison(category, ComparisonOp::Eq, value)
                }
            }
            _ => {
                self.error_span(
                    format!("expected a value or comparison after '{category}:'"),
                    start,
                    tok.position,
                );
                self.recover();
                return None;
            }
        };
        self.apply_state(node, state, prefix)
    }

    /// Reads a value valid for `category`. `after` is the token the value
    /// must follow, used for error positions when the value is missing.
    fn expect_value(&mut self, category: Category, after: &Token) -> Option<String> {
        let tok = self.peek().clone();
        let raw = match tok.kind {
            TokenKind::Number(ref v) | TokenKind::Date(ref v) | TokenKind::Word(ref v) => v.clone(),
            _ => {
                let expected = if category == Category::Date { "a date" } else { "a number" };
                self.error_at(after, format!("expected {expected} after {}", after.text));
                self.recover();
                return None;
            }
        };
        self.advance();

        let valid = match category {
            Category::Date => date_period(&raw).is_some(),
            Category::Words => raw.parse::<u64>().is_ok(),
            _ => matches!(tok.kind, TokenKind::Number(_)) && raw.parse::<f64>().is_ok(),
        };
        if !valid {
            let message = match category {
                Category::Date => format!("invalid date '{raw}'"),
                Category::Words => format!("word count must be a whole number, got '{raw}'"),
                _ => format!("expected a number for {category}, got '{raw}'"),
            };
            self.error_at(&tok, message);
            return None;
        }
        Some(raw)
    }

    fn resolve_stack(&mut self, tok: &Token, raw: String) -> FilterNode {
        let name = normalize_name(&raw);
        let unresolved = FilterNode::StackRef {
            name: raw.clone(),
            resolved: None,
        };

        let Some(stacks) = self.stacks else {
            self.warnings
                .push(format!("stack @{raw} could not be resolved: no stack store available"));
            return unresolved;
        };

        if let Some(first) = self.chain.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = self.chain[first..].iter().map(|n| format!("@{n}")).collect();
            cycle.push(format!("@{name}"));
            self.error_at(tok, format!("cyclic stack reference: {}", cycle.join(" -> ")));
            self.cyclic = true;
            return unresolved;
        }

        if self.chain.len() >= self.max_depth {
            self.error_at(
                tok,
                format!("stack references nested deeper than {} levels", self.max_depth),
            );
            return unresolved;
        }

        let Some(resolution) = self.expand(stacks, &name) else {
            log::debug!("unresolved stack reference @{raw}");
            self.warnings.push(format!("unknown stack @{raw}"));
            return unresolved;
        };

        self.cyclic |= resolution.cyclic;
        for message in &resolution.errors {
            self.error_at(tok, format!("in @{raw}: {message}"));
        }
        for warning in &resolution.warnings {
            self.warnings.push(format!("in @{raw}: {warning}"));
        }

        match resolution.root {
            Some(root) => FilterNode::StackRef {
                name: raw,
                resolved: Some(root),
            },
            None => {
                self.warnings.push(format!("stack @{raw} has an empty query"));
                unresolved
            }
        }
    }

    /// Parses the query of stack `name` one level down, or reuses an earlier
    /// expansion from this parse. `None` if the store has no such stack.
    fn expand(&mut self, stacks: &'a dyn StackLookup, name: &str) -> Option<Resolution> {
        let mut chain = self.chain.clone();
        chain.push(name.to_string());
        let depth_key = (name.to_string(), self.chain.len());

        let cached = self
            .cache
            .by_depth
            .get(&depth_key)
            .or_else(|| self.cache.by_chain.get(&chain));
        if let Some(resolution) = cached {
            return Some(resolution.clone());
        }

        let query = stacks.stack_query(name)?;
        let cache = std::mem::take(&mut self.cache);
        let sub = Parser::new(&query, Some(stacks), chain.clone(), self.max_depth, cache).run();
        self.cache = sub.cache;

        let resolution = Resolution {
            root: sub.root.map(Arc::new),
            errors: sub.errors.into_iter().map(|e| e.message).collect(),
            warnings: sub.warnings,
            cyclic: sub.cyclic,
        };
        if resolution.cyclic {
            self.cache.by_chain.insert(chain, resolution.clone());
        } else {
            self.cache.by_depth.insert(depth_key, resolution.clone());
        }
        Some(resolution)
    }
}

fn starts_term(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Word(_)
            | TokenKind::Number(_)
            | TokenKind::Date(_)
            | TokenKind::Phrase(_)
            | TokenKind::Regex { .. }
            | TokenKind::Wildcard(_)
    )
}

fn is_comparison_op(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Gt | TokenKind::Gte | TokenKind::Lt | TokenKind::Lte | TokenKind::Eq
    )
}

/// Regex/wildcard under `content:` searches the default field.
fn targeted_field(category: Option<Category>, field: String) -> Option<String> {
    match category {
        Some(Category::Content) => None,
        _ => Some(field),
    }
}

fn validate_regex(pattern: &str, flags: &str) -> Result<(), String> {
    let mut builder = regex::RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'u' => {
                builder.unicode(true);
            }
            // global matching is meaningless for a filter
            'g' => {}
            other => return Err(format!("unknown regex flag '{other}'")),
        }
    }
    builder
        .build()
        .map(|_| ())
        .map_err(|e| format!("invalid regular expression: {e}"))
}
