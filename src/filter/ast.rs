use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Category prefixes accepted before `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Source,
    Format,
    Date,
    Words,
    Tags,
    Quality,
    Sim,
    Content,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Source,
        Category::Format,
        Category::Date,
        Category::Words,
        Category::Tags,
        Category::Quality,
        Category::Sim,
        Category::Content,
    ];

    pub fn from_name(name: &str) -> Option<Category> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Source => "source",
            Category::Format => "format",
            Category::Date => "date",
            Category::Words => "words",
            Category::Tags => "tags",
            Category::Quality => "quality",
            Category::Sim => "sim",
            Category::Content => "content",
        }
    }

    /// Categories whose values are compared as numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Category::Words | Category::Quality | Category::Sim)
    }

    /// Categories that accept comparison operators.
    pub fn is_comparable(&self) -> bool {
        self.is_numeric() || *self == Category::Date
    }

    /// Values in these categories are case-insensitive identifiers.
    pub fn folds_case(&self) -> bool {
        matches!(self, Category::Source | Category::Format | Category::Tags)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four catuskoti assertions plus `Neutral` (no assertion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatuskotiState {
    Neutral,
    Is,
    IsNot,
    Both,
    Neither,
}

impl CatuskotiState {
    pub fn from_prefix(ch: char) -> Option<CatuskotiState> {
        match ch {
            '+' => Some(CatuskotiState::Is),
            '-' => Some(CatuskotiState::IsNot),
            '~' => Some(CatuskotiState::Both),
            '?' => Some(CatuskotiState::Neither),
            _ => None,
        }
    }

    pub fn prefix(&self) -> Option<char> {
        match self {
            CatuskotiState::Neutral => None,
            CatuskotiState::Is => Some('+'),
            CatuskotiState::IsNot => Some('-'),
            CatuskotiState::Both => Some('~'),
            CatuskotiState::Neither => Some('?'),
        }
    }

    /// State seen through a `NOT`.
    pub fn negate(self) -> CatuskotiState {
        match self {
            CatuskotiState::Neutral => CatuskotiState::Neutral,
            CatuskotiState::Is => CatuskotiState::IsNot,
            CatuskotiState::IsNot => CatuskotiState::Is,
            CatuskotiState::Both => CatuskotiState::Neither,
            CatuskotiState::Neither => CatuskotiState::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "..")]
    Range,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Eq => "=",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Range => "..",
        }
    }

    /// Operator seen through a `NOT`. `=` and `..` have no single-bound
    /// complement.
    pub fn negate(self) -> Option<ComparisonOp> {
        match self {
            ComparisonOp::Gt => Some(ComparisonOp::Lte),
            ComparisonOp::Gte => Some(ComparisonOp::Lt),
            ComparisonOp::Lt => Some(ComparisonOp::Gte),
            ComparisonOp::Lte => Some(ComparisonOp::Gt),
            ComparisonOp::Eq | ComparisonOp::Range => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoolKind {
    And,
    Or,
}

/// A node of the parsed filter tree.
///
/// The set of variants is closed; every consumer matches exhaustively so a
/// new leaf kind cannot be silently ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FilterNode {
    Catuskoti {
        category: Category,
        value: String,
        state: CatuskotiState,
    },
    Regex {
        pattern: String,
        flags: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Phrase {
        phrase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Wildcard {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    Comparison {
        category: Category,
        operator: ComparisonOp,
        value: String,
        #[serde(rename = "endValue", default, skip_serializing_if = "Option::is_none")]
        end_value: Option<String>,
    },
    /// `@name`. `resolved` is the referenced stack's tree when the lookup
    /// succeeded; an unresolved reference matches everything. References to
    /// the same stack within one parse share the subtree.
    StackRef {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolved: Option<Arc<FilterNode>>,
    },
    Group {
        kind: BoolKind,
        children: Vec<FilterNode>,
        #[serde(default)]
        negated: bool,
    },
}

impl FilterNode {
    pub fn catuskoti(category: Category, value: impl Into<String>, state: CatuskotiState) -> Self {
        FilterNode::Catuskoti {
            category,
            value: value.into(),
            state,
        }
    }

    pub fn comparison(category: Category, operator: ComparisonOp, value: impl Into<String>) -> Self {
        FilterNode::Comparison {
            category,
            operator,
            value: value.into(),
            end_value: None,
        }
    }

    /// Wraps `node` in a `NOT`. Negating a group flips its flag, and a
    /// negated single-child group unwraps, so `!!x` is `x` again.
    pub fn negate(node: FilterNode) -> FilterNode {
        match node {
            FilterNode::Group {
                kind,
                mut children,
                negated,
            } => {
                if negated && children.len() == 1 {
                    if let Some(only) = children.pop() {
                        return only;
                    }
                }
                FilterNode::Group {
                    kind,
                    children,
                    negated: !negated,
                }
            }
            leaf => FilterNode::Group {
                kind: BoolKind::And,
                children: vec![leaf],
                negated: true,
            },
        }
    }

    /// Joins `children` with `kind`, splicing in children of non-negated
    /// groups of the same kind so `a & (b & c)` is a single 3-way AND.
    /// Returns `None` for no children and the child itself for one.
    pub fn join(kind: BoolKind, children: Vec<FilterNode>) -> Option<FilterNode> {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                FilterNode::Group {
                    kind: child_kind,
                    children: grandchildren,
                    negated: false,
                } if child_kind == kind => flat.extend(grandchildren),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(FilterNode::Group {
                kind,
                children: flat,
                negated: false,
            }),
        }
    }

    pub fn children(&self) -> &[FilterNode] {
        match self {
            FilterNode::Group { children, .. } => children,
            _ => &[],
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, FilterNode::Group { .. })
    }
}

/// A span-tagged problem found while parsing. Parsing continues past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (at {position})")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
    pub length: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize, length: usize) -> Self {
        Self {
            message: message.into(),
            position,
            length,
        }
    }
}

/// Result of parsing one query string. Created fresh by every parse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterTree {
    /// `None` means no filter at all (match everything).
    pub root: Option<FilterNode>,
    pub original_query: String,
    #[serde(default)]
    pub parse_errors: Vec<ParseError>,
    #[serde(default)]
    pub parse_warnings: Vec<String>,
}

impl FilterTree {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn has_errors(&self) -> bool {
        !self.parse_errors.is_empty()
    }
}
