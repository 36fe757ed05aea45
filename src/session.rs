//! Per-session context: the shared stack store, the refinement history and
//! the configuration they were built from.

use std::sync::Arc;

use crate::{
    config::Config,
    filter::{compile_filter_tree, parse_query, CompileOptions, CompiledQuery, FilterNode, FilterTree, ParseOptions},
    history::{RefinementHistory, RefinementStep},
    stacks::{SavedStack, StackError, StackStore},
};

pub struct Session {
    config: Config,
    stacks: Arc<StackStore>,
    history: RefinementHistory,
}

impl Session {
    pub fn new(config: Config, stacks: Arc<StackStore>) -> Self {
        let history = RefinementHistory::new(0, config.history_cap);
        Self {
            config,
            stacks,
            history,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stacks(&self) -> &Arc<StackStore> {
        &self.stacks
    }

    pub fn history(&self) -> &RefinementHistory {
        &self.history
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions::from_config(&self.config)
    }

    /// Parses `query`, resolving `@name` references against the store.
    pub fn parse(&self, query: &str) -> FilterTree {
        let store: &StackStore = &self.stacks;
        let options = ParseOptions {
            stacks: Some(store),
            max_depth: self.config.max_reference_depth,
            origin: None,
        };
        parse_query(query, &options)
    }

    pub fn compile(&self, query: &str) -> (FilterTree, CompiledQuery) {
        let tree = self.parse(query);
        let compiled = compile_filter_tree(&tree, &self.compile_options());
        (tree, compiled)
    }

    /// Parses `query` and pushes it as the next refinement. Stacks the query
    /// refers to are marked as used.
    pub fn refine(&mut self, query: &str, result_count: u64, label: Option<String>) -> &RefinementStep {
        let _span = tracing::info_span!("refine", query).entered();

        let tree = self.parse(query);
        if tree.has_errors() {
            tracing::debug!(errors = tree.parse_errors.len(), "refining with a partially valid query");
        }
        for name in referenced_stacks(tree.root.as_ref()) {
            if let Err(err) = self.stacks.record_usage(&name) {
                log::warn!("could not record usage of @{name}: {err}");
            }
        }

        self.history.push_refinement(tree, result_count, label)
    }

    pub fn undo(&mut self) -> Option<&RefinementStep> {
        self.history.undo()
    }

    pub fn redo(&mut self) -> Option<&RefinementStep> {
        self.history.redo()
    }

    pub fn go_to_step(&mut self, index: usize) -> Option<&RefinementStep> {
        self.history.go_to_step(index)
    }

    /// Starts a fresh history over `total` items.
    pub fn reset(&mut self, total: u64) {
        self.history.reset(total);
    }

    /// Looks up the stack bound to `shortcut`, marks it used and compiles its
    /// query.
    pub fn run_shortcut(&self, shortcut: u8) -> Result<Option<(SavedStack, CompiledQuery)>, StackError> {
        let Some(stack) = self.stacks.get_by_shortcut(shortcut) else {
            return Ok(None);
        };
        let stack = self.stacks.record_usage(&stack.name)?;
        let (_, compiled) = self.compile(&stack.query);
        Ok(Some((stack, compiled)))
    }
}

/// Names of resolved `@name` references written directly in a query, not
/// those pulled in through other stacks.
fn referenced_stacks(node: Option<&FilterNode>) -> Vec<String> {
    let mut names = Vec::new();
    let mut pending: Vec<&FilterNode> = node.into_iter().collect();
    while let Some(node) = pending.pop() {
        match node {
            FilterNode::StackRef {
                name,
                resolved: Some(_),
            } => names.push(name.clone()),
            FilterNode::Group { children, .. } => pending.extend(children),
            _ => {}
        }
    }
    names
}
