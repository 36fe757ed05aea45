//! Canonical query strings, for display and for re-deriving a query after
//! the tree or the compiled query has been edited. The output re-parses to
//! an equivalent result; it need not match what the user typed.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ast::{BoolKind, Category, CatuskotiState, ComparisonOp, FilterNode, FilterTree};
use super::compiler::{date_period, CompiledQuery, DateRange, RegexPattern};

/// Values that lex back as a single bare word.
static PLAIN_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_][\p{L}\p{N}_/-]*$").expect("static regex"));

fn is_plain(value: &str) -> bool {
    PLAIN_VALUE.is_match(value)
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn value_str(value: &str) -> String {
    if is_plain(value) {
        value.to_string()
    } else {
        quote(value)
    }
}

fn field_prefix(field: Option<&str>) -> String {
    field.map(|f| format!("{f}:")).unwrap_or_default()
}

fn regex_literal(pattern: &str, flags: &str) -> String {
    format!("/{}/{flags}", pattern.replace('/', "\\/"))
}

pub fn tree_to_query_string(tree: &FilterTree) -> String {
    tree.root.as_ref().map(to_query_string).unwrap_or_default()
}

/// Serializes a node. Neutral leaves and empty groups produce `""`.
pub fn to_query_string(node: &FilterNode) -> String {
    match node {
        FilterNode::Catuskoti {
            category,
            value,
            state,
        } => catuskoti_term(*category, value, *state),
        FilterNode::Regex {
            pattern,
            flags,
            field,
        } => format!("{}{}", field_prefix(field.as_deref()), regex_literal(pattern, flags)),
        FilterNode::Phrase { phrase, field } => {
            format!("{}{}", field_prefix(field.as_deref()), quote(phrase))
        }
        FilterNode::Wildcard { pattern, field } => {
            format!("{}{pattern}", field_prefix(field.as_deref()))
        }
        FilterNode::Comparison {
            category,
            operator,
            value,
            end_value,
        } => match (operator, end_value) {
            (ComparisonOp::Range, Some(end)) => format!("{category}:{value}..{end}"),
            (ComparisonOp::Range, None) => format!("{category}:>={value}"),
            (op, _) => format!("{category}:{}{value}", op.symbol()),
        },
        FilterNode::StackRef { name, .. } => format!("@{name}"),
        FilterNode::Group {
            kind,
            children,
            negated,
        } => {
            let parts: Vec<String> = children
                .iter()
                .map(|child| match child {
                    FilterNode::Group {
                        kind: BoolKind::Or,
                        negated: false,
                        children: grandchildren,
                    } if *kind == BoolKind::And && grandchildren.len() > 1 => {
                        format!("({})", to_query_string(child))
                    }
                    _ => to_query_string(child),
                })
                .filter(|part| !part.is_empty())
                .collect();

            let joiner = match kind {
                BoolKind::And => " & ",
                BoolKind::Or => " | ",
            };

            match (parts.len(), *negated) {
                (0, _) => String::new(),
                (1, false) => parts.join(""),
                (1, true) if !children.iter().any(FilterNode::is_group) => format!("!{}", parts[0]),
                (_, true) => format!("!({})", parts.join(joiner)),
                (_, false) => parts.join(joiner),
            }
        }
    }
}

fn catuskoti_term(category: Category, value: &str, state: CatuskotiState) -> String {
    let Some(prefix) = state.prefix() else {
        return String::new();
    };
    if category == Category::Content && is_plain(value) {
        return match state {
            CatuskotiState::Is => value.to_string(),
            _ => format!("{prefix}{value}"),
        };
    }
    format!("{prefix}{category}:{}", value_str(value))
}

/// Canonical string for a compiled query, in category order: source,
/// format, content, tags, date, numeric. Pagination is not represented.
pub fn compiled_query_to_string(query: &CompiledQuery) -> String {
    let mut parts: Vec<String> = Vec::new();

    let lists = [
        (Category::Source, CatuskotiState::Is, &query.source_types),
        (Category::Source, CatuskotiState::IsNot, &query.exclude_source_types),
        (Category::Source, CatuskotiState::Both, &query.spanning_source_types),
        (Category::Source, CatuskotiState::Neither, &query.uncategorized_source_types),
        (Category::Format, CatuskotiState::Is, &query.format_types),
        (Category::Format, CatuskotiState::IsNot, &query.exclude_format_types),
    ];
    for (category, state, values) in lists {
        parts.extend(values.iter().map(|v| catuskoti_term(category, v, state)));
    }

    if let Some(search) = &query.search_query {
        parts.extend(
            search
                .split_whitespace()
                .map(|word| catuskoti_term(Category::Content, word, CatuskotiState::Is)),
        );
    }
    parts.extend(
        query
            .exclude_search_terms
            .iter()
            .map(|term| catuskoti_term(Category::Content, term, CatuskotiState::IsNot)),
    );
    parts.extend(query.phrases.iter().map(|p| quote(p)));
    parts.extend(query.regex_patterns.iter().map(|RegexPattern { pattern, flags, field }| {
        format!("{}{}", field_prefix(field.as_deref()), regex_literal(pattern, flags))
    }));
    parts.extend(query.wildcards.iter().cloned());

    parts.extend(query.tags.iter().map(|t| catuskoti_term(Category::Tags, t, CatuskotiState::Is)));
    parts.extend(
        query
            .exclude_tags
            .iter()
            .map(|t| catuskoti_term(Category::Tags, t, CatuskotiState::IsNot)),
    );

    if let Some(range) = &query.date_range {
        parts.extend(date_terms(range));
    }

    parts.extend(bounds("words", query.min_words, query.max_words));
    parts.extend(bounds("quality", query.min_quality, query.max_quality));
    parts.extend(bounds("sim", query.min_similarity, query.max_similarity));

    parts.join(" ")
}

fn bounds<T: PartialEq + std::fmt::Display>(category: &str, min: Option<T>, max: Option<T>) -> Vec<String> {
    match (min, max) {
        (Some(min), Some(max)) if min == max => vec![format!("{category}:={min}")],
        (min, max) => min
            .map(|v| format!("{category}:>={v}"))
            .into_iter()
            .chain(max.map(|v| format!("{category}:<={v}")))
            .collect(),
    }
}

fn date_terms(range: &DateRange) -> Vec<String> {
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if let Some(period) = exact_period(start, end) {
            return vec![format!("date:{period}")];
        }
    }

    let mut terms = Vec::new();
    if let Some(start) = range.start {
        terms.push(format!("date:>={}", date_bound(start, |(first, _)| first)));
    }
    if let Some(end) = range.end {
        terms.push(format!("date:<={}", date_bound(end, |(_, last)| last)));
    }
    terms
}

/// The day when `millis` is exactly that day's first (or last) millisecond,
/// otherwise epoch milliseconds padded to five digits so they never read as a
/// year. Instants before 1970 inside a day have no literal and widen to the
/// whole day.
fn date_bound(millis: i64, edge: fn((i64, i64)) -> i64) -> String {
    let day = day_of(millis);
    if let Some(day) = day.as_deref() {
        if date_period(day).map(edge) == Some(millis) {
            return day.to_string();
        }
    }
    match day {
        Some(day) if millis < 0 => {
            log::debug!("date bound {millis} predates the epoch, widened to {day}");
            day
        }
        _ => format!("{millis:05}"),
    }
}

/// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` when `[start, end]` is exactly that
/// calendar period.
fn exact_period(start: i64, end: i64) -> Option<String> {
    let day = day_of(start)?;
    let found = [day.get(0..4), day.get(0..7), Some(day.as_str())]
        .into_iter()
        .flatten()
        .find(|candidate| date_period(candidate) == Some((start, end)))
        .map(str::to_string);
    found
}

fn day_of(millis: i64) -> Option<String> {
    let datetime = chrono::DateTime::from_timestamp_millis(millis)?;
    Some(datetime.format("%Y-%m-%d").to_string())
}
