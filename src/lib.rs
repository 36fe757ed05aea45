//! Catuskoti filter queries: a small language for four-valued
//! include/exclude/both/neither filters, boolean groups, regexes, phrases,
//! comparisons and references to saved filter stacks, compiled into a flat
//! backend query.

pub mod config;
pub mod eid;
pub mod filter;
pub mod history;
pub mod lock;
pub mod session;
pub mod stacks;
pub mod storage;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use filter::{compile_filter_tree, parse_query, CompileOptions, CompiledQuery, FilterNode, FilterTree};
pub use history::{RefinementHistory, RefinementStep};
pub use session::Session;
pub use stacks::{SavedStack, StackError, StackStore};
