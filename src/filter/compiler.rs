//! Flattens a [`FilterTree`] into the backend-facing [`CompiledQuery`].
//!
//! One walk over the tree sorts leaves into buckets by kind, remembering
//! whether each sits under an odd number of `NOT`s. Each bucket is then
//! assembled on its own so inversion can be handled per kind. `OR` groups
//! are flattened like `AND` groups; the compiler does not plan queries.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::ast::{Category, CatuskotiState, ComparisonOp, FilterNode, FilterTree, BoolKind};
use crate::config::{Config, OrderDirection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexPattern {
    pub pattern: String,
    pub flags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Epoch milliseconds, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_source_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spanning_source_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uncategorized_source_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_format_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_search_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regex_patterns: Vec<RegexPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phrases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wildcards: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_words: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_similarity: Option<f64>,

    pub limit: usize,
    pub offset: usize,
    pub order_by: String,
    pub order_direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    pub limit: usize,
    pub offset: usize,
    pub order_by: String,
    pub order_direction: OrderDirection,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CompileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: config.default_limit,
            offset: 0,
            order_by: config.default_order_by.clone(),
            order_direction: config.default_order_direction,
        }
    }
}

impl CompiledQuery {
    /// A query with no filters ("match everything").
    pub fn new(options: &CompileOptions) -> Self {
        Self {
            source_types: Vec::new(),
            exclude_source_types: Vec::new(),
            spanning_source_types: Vec::new(),
            uncategorized_source_types: Vec::new(),
            format_types: Vec::new(),
            exclude_format_types: Vec::new(),
            search_query: None,
            exclude_search_terms: Vec::new(),
            regex_patterns: Vec::new(),
            phrases: Vec::new(),
            wildcards: Vec::new(),
            tags: Vec::new(),
            exclude_tags: Vec::new(),
            date_range: None,
            min_words: None,
            max_words: None,
            min_quality: None,
            max_quality: None,
            min_similarity: None,
            max_similarity: None,
            limit: options.limit,
            offset: options.offset,
            order_by: options.order_by.clone(),
            order_direction: options.order_direction,
        }
    }

    /// True when any filter field is set; pagination is ignored.
    pub fn has_filters(&self) -> bool {
        let empty = CompiledQuery::new(&CompileOptions {
            limit: self.limit,
            offset: self.offset,
            order_by: self.order_by.clone(),
            order_direction: self.order_direction,
        });
        *self != empty
    }
}

pub fn compile_filter_tree(tree: &FilterTree, options: &CompileOptions) -> CompiledQuery {
    compile_node(tree.root.as_ref(), options)
}

pub fn compile_node(root: Option<&FilterNode>, options: &CompileOptions) -> CompiledQuery {
    let mut buckets = Buckets::default();
    if let Some(root) = root {
        buckets.walk(root, false);
    }
    if buckets.or_groups > 0 {
        log::debug!(
            "flattened {} OR group(s); alternatives are sent as arrays",
            buckets.or_groups
        );
    }

    let mut query = CompiledQuery::new(options);
    assemble_catuskoti(&mut query, &buckets.catuskoti);
    assemble_content_matches(&mut query, &buckets.matches);
    assemble_comparisons(&mut query, &buckets.comparisons);
    query
}

struct Leaf<'t> {
    node: &'t FilterNode,
    negated: bool,
}

#[derive(Default)]
struct Buckets<'t> {
    catuskoti: Vec<Leaf<'t>>,
    matches: Vec<Leaf<'t>>,
    comparisons: Vec<Leaf<'t>>,
    or_groups: usize,
    /// Stack subtrees already walked, with the negation they were walked under.
    expanded: HashSet<(*const FilterNode, bool)>,
}

impl<'t> Buckets<'t> {
    fn walk(&mut self, node: &'t FilterNode, negated: bool) {
        let leaf = Leaf { node, negated };
        match node {
            FilterNode::Catuskoti { .. } => self.catuskoti.push(leaf),
            FilterNode::Regex { .. } | FilterNode::Phrase { .. } | FilterNode::Wildcard { .. } => {
                self.matches.push(leaf)
            }
            FilterNode::Comparison { .. } => self.comparisons.push(leaf),
            FilterNode::StackRef { resolved, .. } => {
                // a subtree repeated under the same negation adds nothing new
                if let Some(resolved) = resolved {
                    if self.expanded.insert((Arc::as_ptr(resolved), negated)) {
                        self.walk(resolved, negated);
                    }
                }
            }
            FilterNode::Group {
                kind,
                children,
                negated: group_negated,
            } => {
                if *kind == BoolKind::Or {
                    self.or_groups += 1;
                }
                for child in children {
                    self.walk(child, negated ^ group_negated);
                }
            }
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn assemble_catuskoti(query: &mut CompiledQuery, leaves: &[Leaf<'_>]) {
    let mut search_terms: Vec<String> = Vec::new();

    for leaf in leaves {
        let FilterNode::Catuskoti {
            category,
            value,
            state,
        } = leaf.node
        else {
            continue;
        };
        let state = if leaf.negated { state.negate() } else { *state };

        match (category, state) {
            (_, CatuskotiState::Neutral) => {}

            (Category::Source, CatuskotiState::Is) => push_unique(&mut query.source_types, value),
            (Category::Source, CatuskotiState::IsNot) => {
                push_unique(&mut query.exclude_source_types, value)
            }
            (Category::Source, CatuskotiState::Both) => {
                push_unique(&mut query.spanning_source_types, value)
            }
            (Category::Source, CatuskotiState::Neither) => {
                push_unique(&mut query.uncategorized_source_types, value)
            }

            (Category::Format, CatuskotiState::Is) => push_unique(&mut query.format_types, value),
            (Category::Format, CatuskotiState::IsNot) => {
                push_unique(&mut query.exclude_format_types, value)
            }

            (Category::Tags, CatuskotiState::Is) => push_unique(&mut query.tags, value),
            (Category::Tags, CatuskotiState::IsNot) => push_unique(&mut query.exclude_tags, value),

            (Category::Content, CatuskotiState::Is) => search_terms.push(value.clone()),
            (Category::Content, CatuskotiState::IsNot) => {
                push_unique(&mut query.exclude_search_terms, value)
            }

            (Category::Date, CatuskotiState::Is) => match date_period(value) {
                Some((start, end)) => narrow_dates(query, Some(start), Some(end)),
                None => debug_assert!(false, "unvalidated date value {value:?}"),
            },

            (category, state) => {
                log::debug!("{category}:{value} with state {state:?} has no flat form, dropped");
            }
        }
    }

    if !search_terms.is_empty() {
        query.search_query = Some(search_terms.join(" "));
    }
}

fn assemble_content_matches(query: &mut CompiledQuery, leaves: &[Leaf<'_>]) {
    for leaf in leaves {
        if leaf.negated {
            log::debug!("negated content match {:?} has no flat form, dropped", leaf.node);
            continue;
        }
        match leaf.node {
            FilterNode::Regex {
                pattern,
                flags,
                field,
            } => {
                let regex = RegexPattern {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                    field: field.clone(),
                };
                if !query.regex_patterns.contains(&regex) {
                    query.regex_patterns.push(regex);
                }
            }
            FilterNode::Phrase { phrase, .. } => push_unique(&mut query.phrases, phrase),
            FilterNode::Wildcard { pattern, .. } => push_unique(&mut query.wildcards, pattern),
            _ => {}
        }
    }
}

fn assemble_comparisons(query: &mut CompiledQuery, leaves: &[Leaf<'_>]) {
    for leaf in leaves {
        let FilterNode::Comparison {
            category,
            operator,
            value,
            end_value,
        } = leaf.node
        else {
            continue;
        };

        let operator = if leaf.negated {
            match operator.negate() {
                Some(op) => op,
                None => {
                    log::debug!("negated {category}:{} comparison dropped", operator.symbol());
                    continue;
                }
            }
        } else {
            *operator
        };

        if *category == Category::Date {
            assemble_date(query, operator, value, end_value.as_deref());
        } else {
            assemble_numeric(query, *category, operator, value, end_value.as_deref());
        }
    }
}

fn assemble_date(query: &mut CompiledQuery, operator: ComparisonOp, value: &str, end: Option<&str>) {
    let Some((start, finish)) = date_period(value) else {
        debug_assert!(false, "unvalidated date value {value:?}");
        return;
    };
    match operator {
        ComparisonOp::Gt | ComparisonOp::Gte => narrow_dates(query, Some(start), None),
        ComparisonOp::Lt | ComparisonOp::Lte => narrow_dates(query, None, Some(finish)),
        ComparisonOp::Eq => narrow_dates(query, Some(start), Some(finish)),
        ComparisonOp::Range => {
            let end = end.and_then(date_period).map(|(_, finish)| finish);
            narrow_dates(query, Some(start), end);
        }
    }
}

/// Intersects the query's date range with `[start, end]`.
fn narrow_dates(query: &mut CompiledQuery, start: Option<i64>, end: Option<i64>) {
    let range = query.date_range.get_or_insert_with(DateRange::default);
    range.start = tighter(range.start, start, i64::max);
    range.end = tighter(range.end, end, i64::min);
}

fn tighter<T: Copy>(current: Option<T>, new: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (current, new) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

fn assemble_numeric(
    query: &mut CompiledQuery,
    category: Category,
    operator: ComparisonOp,
    value: &str,
    end: Option<&str>,
) {
    let (min, max) = match operator {
        ComparisonOp::Gt | ComparisonOp::Gte => (Some(value), None),
        ComparisonOp::Lt | ComparisonOp::Lte => (None, Some(value)),
        ComparisonOp::Eq => (Some(value), Some(value)),
        ComparisonOp::Range => (Some(value), end),
    };

    match category {
        Category::Words => {
            let parse = |v: Option<&str>| v.and_then(|v| v.parse::<u64>().ok());
            query.min_words = tighter(query.min_words, parse(min), u64::max);
            query.max_words = tighter(query.max_words, parse(max), u64::min);
        }
        Category::Quality => {
            let parse = |v: Option<&str>| v.and_then(|v| v.parse::<f64>().ok());
            query.min_quality = tighter(query.min_quality, parse(min), f64::max);
            query.max_quality = tighter(query.max_quality, parse(max), f64::min);
        }
        Category::Sim => {
            let parse = |v: Option<&str>| v.and_then(|v| v.parse::<f64>().ok());
            query.min_similarity = tighter(query.min_similarity, parse(min), f64::max);
            query.max_similarity = tighter(query.max_similarity, parse(max), f64::min);
        }
        other => log::debug!("comparison on non-numeric category {other} dropped"),
    }
}

/// The period a date value denotes, as inclusive epoch milliseconds (UTC):
/// `YYYY` a calendar year, `YYYY-MM` a month, `YYYY-MM-DD` a day, and any
/// longer run of digits an exact epoch-millisecond instant.
pub fn date_period(value: &str) -> Option<(i64, i64)> {
    let all_digits = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());

    if all_digits && value.len() > 4 {
        let millis = value.parse::<i64>().ok()?;
        return Some((millis, millis));
    }

    let (first, next) = if all_digits && value.len() == 4 {
        let year = value.parse::<i32>().ok()?;
        (
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        )
    } else if value.len() == 7 {
        let first = NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok()?;
        let next = if first.month() == 12 {
            NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
        };
        (first, next)
    } else if value.len() == 10 {
        let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
        (day, day.succ_opt()?)
    } else {
        return None;
    };

    Some((start_of(first)?, start_of(next)? - 1))
}

fn start_of(date: NaiveDate) -> Option<i64> {
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_period() {
        let (start, end) = date_period("2024").unwrap();
        assert_eq!(start, 1_704_067_200_000); // 2024-01-01T00:00:00Z
        assert_eq!(end, 1_735_689_599_999); // 2024-12-31T23:59:59.999Z
    }

    #[test]
    fn month_and_day_periods() {
        let (start, end) = date_period("2024-02").unwrap();
        assert_eq!(start, 1_706_745_600_000); // 2024-02-01
        assert_eq!(end, 1_709_251_199_999); // 2024-02-29T23:59:59.999 (leap year)

        let (start, end) = date_period("2024-12-31").unwrap();
        assert_eq!(start, 1_735_603_200_000);
        assert_eq!(end, 1_735_689_599_999);
    }

    #[test]
    fn epoch_millis_and_invalid_dates() {
        assert_eq!(date_period("1704067200000"), Some((1_704_067_200_000, 1_704_067_200_000)));
        assert_eq!(date_period("2024-02-30"), None);
        assert_eq!(date_period("2024-13"), None);
        assert_eq!(date_period("yesterday"), None);
        assert_eq!(date_period(""), None);
    }

    #[test]
    fn numeric_bounds_intersect() {
        let root = FilterNode::Group {
            kind: BoolKind::And,
            children: vec![
                FilterNode::comparison(Category::Words, ComparisonOp::Gt, "100"),
                FilterNode::comparison(Category::Words, ComparisonOp::Gte, "200"),
                FilterNode::comparison(Category::Words, ComparisonOp::Lt, "900"),
            ],
            negated: false,
        };
        let q = compile_node(Some(&root), &CompileOptions::default());
        assert_eq!(q.min_words, Some(200));
        assert_eq!(q.max_words, Some(900));
    }

    #[test]
    fn empty_query_has_no_filters() {
        let q = compile_node(None, &CompileOptions::default());
        assert!(!q.has_filters());
        assert_eq!(q.limit, 50);
        assert_eq!(q.order_by, "updated_at");

        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "limit": 50,
                "offset": 0,
                "orderBy": "updated_at",
                "orderDirection": "desc"
            })
        );
    }
}
