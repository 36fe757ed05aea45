//! Linear undo/redo over successive refinements of a result set.

use serde::Serialize;

use crate::{
    eid::Eid,
    filter::{compile_filter_tree, CompileOptions, CompiledQuery, FilterTree},
};

const SEARCH_LABEL_CHARS: usize = 20;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementStep {
    pub id: String,
    pub query: String,
    pub tree: FilterTree,
    pub result_count: u64,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub label: String,
}

impl RefinementStep {
    fn new(tree: FilterTree, result_count: u64, label: String) -> Self {
        Self {
            id: Eid::new().to_string(),
            query: tree.original_query.clone(),
            tree,
            result_count,
            timestamp: chrono::Utc::now().timestamp_millis(),
            label,
        }
    }

    fn root(total: u64) -> Self {
        Self::new(FilterTree::empty(), total, format!("All ({total})"))
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementHistory {
    steps: Vec<RefinementStep>,
    current_index: usize,
    #[serde(skip)]
    cap: usize,
}

impl RefinementHistory {
    /// Starts with a single "no filter" step over `total` items.
    pub fn new(total: u64, cap: usize) -> Self {
        Self {
            steps: vec![RefinementStep::root(total)],
            current_index: 0,
            cap: cap.max(1),
        }
    }

    pub fn steps(&self) -> &[RefinementStep] {
        &self.steps
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> &RefinementStep {
        // steps is never empty and current_index stays in range
        &self.steps[self.current_index]
    }

    /// Steps from the oldest kept one up to the current one.
    pub fn breadcrumbs(&self) -> &[RefinementStep] {
        &self.steps[..=self.current_index]
    }

    pub fn can_undo(&self) -> bool {
        self.current_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_index + 1 < self.steps.len()
    }

    /// Drops any undone steps, appends a new one and makes it current. The
    /// oldest steps are evicted past the cap. Without a `label` one is
    /// generated from the tree's compiled form.
    pub fn push_refinement(&mut self, tree: FilterTree, result_count: u64, label: Option<String>) -> &RefinementStep {
        let label = label.unwrap_or_else(|| {
            let compiled = compile_filter_tree(&tree, &CompileOptions::default());
            generate_label(&compiled, result_count)
        });

        self.steps.truncate(self.current_index + 1);
        self.steps.push(RefinementStep::new(tree, result_count, label));

        if self.steps.len() > self.cap {
            let excess = self.steps.len() - self.cap;
            log::debug!("history over cap {}, evicting {excess} oldest step(s)", self.cap);
            self.steps.drain(..excess);
        }
        self.current_index = self.steps.len() - 1;
        self.current()
    }

    pub fn undo(&mut self) -> Option<&RefinementStep> {
        if !self.can_undo() {
            return None;
        }
        self.current_index -= 1;
        Some(self.current())
    }

    pub fn redo(&mut self) -> Option<&RefinementStep> {
        if !self.can_redo() {
            return None;
        }
        self.current_index += 1;
        Some(self.current())
    }

    pub fn go_to_step(&mut self, index: usize) -> Option<&RefinementStep> {
        if index >= self.steps.len() {
            return None;
        }
        self.current_index = index;
        Some(self.current())
    }

    /// Back to a single root step over `total` items.
    pub fn reset(&mut self, total: u64) {
        self.steps = vec![RefinementStep::root(total)];
        self.current_index = 0;
    }
}

/// Short breadcrumb text naming the query's dominant filters, e.g.
/// `chatgpt, not claude, "rust async" (42)`.
pub fn generate_label(query: &CompiledQuery, result_count: u64) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(source) = query.source_types.first() {
        parts.push(source.clone());
    }
    if let Some(excluded) = query
        .exclude_source_types
        .first()
        .or(query.exclude_tags.first())
        .or(query.exclude_search_terms.first())
    {
        parts.push(format!("not {excluded}"));
    }
    if let Some(search) = &query.search_query {
        let mut short: String = search.chars().take(SEARCH_LABEL_CHARS).collect();
        if search.chars().count() > SEARCH_LABEL_CHARS {
            short.push_str("...");
        }
        parts.push(format!("\"{short}\""));
    }
    if !query.regex_patterns.is_empty() {
        parts.push("regex".to_string());
    }
    match (query.min_words, query.max_words) {
        (Some(min), Some(max)) => parts.push(format!("{min}-{max} words")),
        (Some(min), None) => parts.push(format!(">={min} words")),
        (None, Some(max)) => parts.push(format!("<={max} words")),
        (None, None) => {}
    }
    if query.date_range.is_some() {
        parts.push("date range".to_string());
    }

    if parts.is_empty() {
        format!("All ({result_count})")
    } else {
        format!("{} ({result_count})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse;

    fn push(history: &mut RefinementHistory, query: &str, count: u64) {
        history.push_refinement(parse(query), count, None);
    }

    #[test]
    fn starts_with_root_step() {
        let history = RefinementHistory::new(1200, 20);
        assert_eq!(history.steps().len(), 1);
        assert_eq!(history.current().label, "All (1200)");
        assert!(history.current().tree.is_empty());
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }

    #[test]
    fn cap_evicts_oldest() {
        let mut history = RefinementHistory::new(100, 20);
        for i in 1..=25 {
            push(&mut history, &format!("q{i}"), i);
        }
        assert_eq!(history.steps().len(), 20);
        assert_eq!(history.current_index(), 19);
        // root and q1..q5 are gone
        assert_eq!(history.steps()[0].query, "q6");
        assert_eq!(history.current().query, "q25");
    }

    #[test]
    fn push_after_undo_truncates() {
        let mut history = RefinementHistory::new(100, 20);
        for q in ["a", "b", "c"] {
            push(&mut history, q, 1);
        }
        assert_eq!(history.undo().unwrap().query, "b");
        assert_eq!(history.undo().unwrap().query, "a");
        assert!(history.can_redo());

        push(&mut history, "d", 1);
        let queries: Vec<&str> = history.steps().iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["", "a", "d"]);
        assert!(!history.can_redo());
    }

    #[test]
    fn undo_redo_bounds() {
        let mut history = RefinementHistory::new(10, 20);
        assert!(history.undo().is_none());
        push(&mut history, "a", 5);
        assert!(history.redo().is_none());
        assert_eq!(history.undo().unwrap().result_count, 10);
        assert_eq!(history.redo().unwrap().query, "a");
    }

    #[test]
    fn go_to_step_and_breadcrumbs() {
        let mut history = RefinementHistory::new(10, 20);
        for q in ["a", "b", "c"] {
            push(&mut history, q, 1);
        }
        assert_eq!(history.go_to_step(1).unwrap().query, "a");
        assert_eq!(history.breadcrumbs().len(), 2);
        assert!(history.go_to_step(4).is_none());
        assert_eq!(history.current_index(), 1);

        history.reset(7);
        assert_eq!(history.steps().len(), 1);
        assert_eq!(history.current().label, "All (7)");
    }

    #[test]
    fn explicit_label_wins() {
        let mut history = RefinementHistory::new(10, 20);
        let step = history.push_refinement(parse("+source:x"), 3, Some("mine".into()));
        assert_eq!(step.label, "mine");
    }

    #[test]
    fn generated_labels() {
        let compiled = |q: &str| compile_filter_tree(&parse(q), &CompileOptions::default());

        assert_eq!(generate_label(&compiled(""), 9), "All (9)");
        assert_eq!(
            generate_label(&compiled("+source:chatgpt -source:claude words:100..500"), 42),
            "chatgpt, not claude, 100-500 words (42)"
        );
        assert_eq!(
            generate_label(&compiled("async runtime internals explained /x/ date:2024"), 1),
            "\"async runtime intern...\", regex, date range (1)"
        );
    }
}
