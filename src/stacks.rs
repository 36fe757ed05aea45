//! Named filter stacks: saved queries referenced from other queries as
//! `@name`, optionally bound to a keyboard shortcut.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    eid::Eid,
    filter::{parse_query, FilterTree, ParseOptions},
    storage::{BackendMemory, StorageManager},
};

pub const STACKS_FILE: &str = "stacks.yaml";

const MAX_NAME_LEN: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedStack {
    pub id: String,
    pub name: String,
    pub query: String,
    /// Always re-derived from `query`; never read from or written to disk.
    #[serde(skip)]
    pub tree: FilterTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_count: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    #[serde(default)]
    pub synced_to_remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard_shortcut: Option<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub description: Option<String>,
    pub result_count: Option<u64>,
    pub keyboard_shortcut: Option<u8>,
}

/// Fields left as `None` are not touched.
#[derive(Clone, Debug, Default)]
pub struct StackUpdate {
    pub query: Option<String>,
    pub description: Option<String>,
    pub result_count: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("stack name must contain a letter, digit or '_' and be at most {MAX_NAME_LEN} characters")]
    InvalidName,
    #[error("a stack named @{0} already exists")]
    DuplicateName(String),
    #[error("stack limit reached ({0} stacks)")]
    LimitReached(usize),
    #[error("keyboard shortcut must be between 1 and 9, got {0}")]
    InvalidShortcut(u8),
    #[error("stack not found: @{0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackEvent {
    Created { name: String },
    Updated { name: String },
    Renamed { from: String, to: String },
    Deleted { name: String },
    ShortcutChanged { name: String, shortcut: Option<u8> },
    Used { name: String },
}

pub type Listener = Arc<dyn Fn(&StackEvent) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

/// Handle returned by [`StackStore::subscribe`]. The listener stays
/// registered while the handle is alive; dropping it unsubscribes.
#[must_use = "dropping the subscription removes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keeps the listener registered for as long as the store lives.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Resolves `@name` references for the parser.
pub trait StackLookup {
    /// Query of the stack called `name` (already normalized).
    fn stack_query(&self, name: &str) -> Option<String>;
}

impl StackLookup for Vec<SavedStack> {
    fn stack_query(&self, name: &str) -> Option<String> {
        self.iter().find(|s| s.name == name).map(|s| s.query.clone())
    }
}

/// Lower-cases and replaces anything outside `[a-z0-9_-]` with `-`. A leading
/// `@` and surrounding whitespace are ignored.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_prefix('@').unwrap_or(name);
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '-',
        })
        .collect()
}

fn validate_name(name: &str) -> Result<String, StackError> {
    let normalized = normalize_name(name);
    let meaningful = normalized
        .chars()
        .any(|c| c.is_ascii_alphanumeric() || c == '_');
    if !meaningful || normalized.len() > MAX_NAME_LEN {
        return Err(StackError::InvalidName);
    }
    Ok(normalized)
}

fn validate_shortcut(shortcut: u8) -> Result<u8, StackError> {
    if (1..=9).contains(&shortcut) {
        Ok(shortcut)
    } else {
        Err(StackError::InvalidShortcut(shortcut))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parses every stack's query against the stacks themselves.
fn derive_trees(stacks: &mut Vec<SavedStack>, max_depth: usize) {
    let trees: Vec<FilterTree> = stacks
        .iter()
        .map(|stack| {
            let options = ParseOptions {
                stacks: Some(&*stacks as &dyn StackLookup),
                max_depth,
                origin: Some(stack.name.clone()),
            };
            parse_query(&stack.query, &options)
        })
        .collect();
    for (stack, tree) in stacks.iter_mut().zip(trees) {
        stack.tree = tree;
    }
}

/// Trees only depend on names and queries; usage and sync bookkeeping
/// leaves them as they are.
fn queries_changed(before: &[SavedStack], after: &[SavedStack]) -> bool {
    before.len() != after.len()
        || before
            .iter()
            .zip(after)
            .any(|(a, b)| a.name != b.name || a.query != b.query)
}

fn position(stacks: &[SavedStack], name: &str) -> Result<usize, StackError> {
    stacks
        .iter()
        .position(|s| s.name == name)
        .ok_or_else(|| StackError::NotFound(name.to_string()))
}

/// Takes `shortcut` away from whichever stack holds it, except `keep`.
fn release_shortcut(stacks: &mut [SavedStack], shortcut: u8, keep: &str, events: &mut Vec<StackEvent>) {
    for other in stacks
        .iter_mut()
        .filter(|s| s.keyboard_shortcut == Some(shortcut) && s.name != keep)
    {
        log::info!("shortcut {shortcut} moved from @{} to @{keep}", other.name);
        other.keyboard_shortcut = None;
        other.synced_to_remote = false;
        events.push(StackEvent::ShortcutChanged {
            name: other.name.clone(),
            shortcut: None,
        });
    }
}

/// The single owner of saved stacks. Every write goes through it so name
/// uniqueness, shortcut uniqueness and the stack limit hold across callers.
pub struct StackStore {
    stacks: RwLock<Vec<SavedStack>>,
    storage: Arc<dyn StorageManager>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    max_stacks: usize,
    max_depth: usize,
}

impl StackStore {
    /// A store that keeps everything in memory.
    pub fn in_memory(config: &Config) -> Self {
        Self::with_stacks(Vec::new(), Arc::new(BackendMemory::new()), config)
    }

    /// Loads `stacks.yaml` from `storage`, creating it if absent.
    pub fn open(storage: Arc<dyn StorageManager>, config: &Config) -> Result<Self, StackError> {
        if !storage.exists(STACKS_FILE) {
            let empty: Vec<SavedStack> = vec![];
            let yaml = serde_yml::to_string(&empty).map_err(|e| StackError::Storage(e.to_string()))?;
            storage
                .write(STACKS_FILE, yaml.as_bytes())
                .map_err(|e| StackError::Storage(e.to_string()))?;
        }

        let data = storage
            .read(STACKS_FILE)
            .map_err(|e| StackError::Storage(e.to_string()))?;
        let yaml_str = String::from_utf8(data).map_err(|e| StackError::Storage(e.to_string()))?;
        let stacks: Vec<SavedStack> =
            serde_yml::from_str(&yaml_str).map_err(|e| StackError::Storage(e.to_string()))?;

        log::debug!("loaded {} stack(s) from {STACKS_FILE}", stacks.len());
        if stacks.len() > config.max_stacks {
            log::warn!(
                "{STACKS_FILE} holds {} stacks, more than the limit of {}",
                stacks.len(),
                config.max_stacks
            );
        }

        Ok(Self::with_stacks(stacks, storage, config))
    }

    fn with_stacks(mut stacks: Vec<SavedStack>, storage: Arc<dyn StorageManager>, config: &Config) -> Self {
        derive_trees(&mut stacks, config.max_reference_depth);
        Self {
            stacks: RwLock::new(stacks),
            storage,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            max_stacks: config.max_stacks,
            max_depth: config.max_reference_depth,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Vec<SavedStack>> {
        self.stacks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Vec<SavedStack>> {
        self.stacks.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.read_state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<SavedStack> {
        let name = normalize_name(name);
        self.read_state().iter().find(|s| s.name == name).cloned()
    }

    pub fn get_by_shortcut(&self, shortcut: u8) -> Option<SavedStack> {
        self.read_state()
            .iter()
            .find(|s| s.keyboard_shortcut == Some(shortcut))
            .cloned()
    }

    /// All stacks, sorted by name.
    pub fn list(&self) -> Vec<SavedStack> {
        let mut stacks = self.read_state().clone();
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        stacks
    }

    /// Stacks whose name starts with `prefix`, most recently used first.
    pub fn suggest(&self, prefix: &str) -> Vec<SavedStack> {
        let prefix = normalize_name(prefix);
        let mut matches: Vec<SavedStack> = self
            .read_state()
            .iter()
            .filter(|s| s.name.starts_with(&prefix))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.last_used.cmp(&a.last_used).then_with(|| a.name.cmp(&b.name)));
        matches
    }

    pub fn create(&self, name: &str, query: &str, options: CreateOptions) -> Result<SavedStack, StackError> {
        let name = validate_name(name)?;
        let shortcut = options.keyboard_shortcut.map(validate_shortcut).transpose()?;
        let max_stacks = self.max_stacks;

        self.mutate(|stacks| {
            if stacks.iter().any(|s| s.name == name) {
                return Err(StackError::DuplicateName(name.clone()));
            }
            if stacks.len() >= max_stacks {
                return Err(StackError::LimitReached(max_stacks));
            }

            let mut events = Vec::new();
            if let Some(shortcut) = shortcut {
                release_shortcut(stacks, shortcut, &name, &mut events);
            }

            let now = now_millis();
            stacks.push(SavedStack {
                id: Eid::new().to_string(),
                name: name.clone(),
                query: query.trim().to_string(),
                tree: FilterTree::empty(),
                description: options.description,
                result_count: options.result_count,
                created_at: now,
                updated_at: now,
                last_used: None,
                synced_to_remote: false,
                keyboard_shortcut: shortcut,
            });
            log::info!("created stack @{name}");
            events.insert(0, StackEvent::Created { name: name.clone() });
            Ok((Some(stacks.len() - 1), events))
        })?
        .ok_or_else(|| StackError::NotFound(name.clone()))
    }

    pub fn update(&self, name: &str, update: StackUpdate) -> Result<SavedStack, StackError> {
        let name = normalize_name(name);
        self.mutate(|stacks| {
            let idx = position(stacks, &name)?;
            let stack = &mut stacks[idx];
            if let Some(query) = update.query {
                stack.query = query.trim().to_string();
            }
            if let Some(description) = update.description {
                stack.description = Some(description).filter(|d| !d.trim().is_empty());
            }
            if let Some(count) = update.result_count {
                stack.result_count = Some(count);
            }
            stack.updated_at = now_millis();
            stack.synced_to_remote = false;
            log::info!("updated stack @{name}");
            Ok((Some(idx), vec![StackEvent::Updated { name: name.clone() }]))
        })?
        .ok_or_else(|| StackError::NotFound(name.clone()))
    }

    /// Renames a stack. Queries that refer to the old name are left as they
    /// are and will report an unknown stack.
    pub fn rename(&self, from: &str, to: &str) -> Result<SavedStack, StackError> {
        let from = normalize_name(from);
        let to = validate_name(to)?;
        self.mutate(|stacks| {
            let idx = position(stacks, &from)?;
            if to != from && stacks.iter().any(|s| s.name == to) {
                return Err(StackError::DuplicateName(to.clone()));
            }
            let stack = &mut stacks[idx];
            stack.name = to.clone();
            stack.updated_at = now_millis();
            stack.synced_to_remote = false;
            log::info!("renamed stack @{from} to @{to}");
            let event = StackEvent::Renamed {
                from: from.clone(),
                to: to.clone(),
            };
            Ok((Some(idx), vec![event]))
        })?
        .ok_or_else(|| StackError::NotFound(to.clone()))
    }

    pub fn delete(&self, name: &str) -> Result<(), StackError> {
        let name = normalize_name(name);
        self.mutate(|stacks| {
            let idx = position(stacks, &name)?;
            stacks.remove(idx);
            log::info!("deleted stack @{name}");
            Ok((None, vec![StackEvent::Deleted { name: name.clone() }]))
        })?;
        Ok(())
    }

    /// Binds `shortcut` to the stack, taking it from any other stack that
    /// held it. `None` clears the stack's shortcut.
    pub fn assign_shortcut(&self, name: &str, shortcut: Option<u8>) -> Result<SavedStack, StackError> {
        let name = normalize_name(name);
        let shortcut = shortcut.map(validate_shortcut).transpose()?;
        self.mutate(|stacks| {
            let idx = position(stacks, &name)?;
            let mut events = Vec::new();
            if let Some(shortcut) = shortcut {
                release_shortcut(stacks, shortcut, &name, &mut events);
            }
            let stack = &mut stacks[idx];
            stack.keyboard_shortcut = shortcut;
            stack.updated_at = now_millis();
            stack.synced_to_remote = false;
            events.push(StackEvent::ShortcutChanged {
                name: name.clone(),
                shortcut,
            });
            Ok((Some(idx), events))
        })?
        .ok_or_else(|| StackError::NotFound(name.clone()))
    }

    pub fn record_usage(&self, name: &str) -> Result<SavedStack, StackError> {
        let name = normalize_name(name);
        self.mutate(|stacks| {
            let idx = position(stacks, &name)?;
            stacks[idx].last_used = Some(now_millis());
            Ok((Some(idx), vec![StackEvent::Used { name: name.clone() }]))
        })?
        .ok_or_else(|| StackError::NotFound(name.clone()))
    }

    /// Records that the stack's current state has been pushed to a remote
    /// copy. Any later change clears the flag.
    pub fn mark_synced(&self, name: &str) -> Result<(), StackError> {
        let name = normalize_name(name);
        self.mutate(|stacks| {
            let idx = position(stacks, &name)?;
            stacks[idx].synced_to_remote = true;
            Ok((None, Vec::new()))
        })?;
        Ok(())
    }

    pub fn subscribe(&self, listener: impl Fn(&StackEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Applies `f` to a copy of the stacks, persists the copy and swaps it
    /// in. Returns the stack at the index `f` reports, with its tree
    /// re-derived. Listeners run after the lock is released.
    fn mutate<F>(&self, f: F) -> Result<Option<SavedStack>, StackError>
    where
        F: FnOnce(&mut Vec<SavedStack>) -> Result<(Option<usize>, Vec<StackEvent>), StackError>,
    {
        let (stack, events) = {
            let mut state = self.write_state();
            let mut next = state.clone();
            let (idx, events) = f(&mut next)?;
            if queries_changed(&state, &next) {
                derive_trees(&mut next, self.max_depth);
            }
            self.persist(&next)?;
            let stack = idx.and_then(|i| next.get(i).cloned());
            *state = next;
            (stack, events)
        };
        self.notify(&events);
        Ok(stack)
    }

    fn persist(&self, stacks: &[SavedStack]) -> Result<(), StackError> {
        let yaml = serde_yml::to_string(stacks).map_err(|e| StackError::Storage(e.to_string()))?;
        self.storage
            .write(STACKS_FILE, yaml.as_bytes())
            .map_err(|e| StackError::Storage(e.to_string()))?;
        log::debug!("saved {} stack(s) to {STACKS_FILE}", stacks.len());
        Ok(())
    }

    fn notify(&self, events: &[StackEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for event in events {
            for listener in &listeners {
                listener(event);
            }
        }
    }
}

impl StackLookup for StackStore {
    fn stack_query(&self, name: &str) -> Option<String> {
        self.read_state().stack_query(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Category, CatuskotiState, FilterNode};
    use crate::storage::BackendLocal;

    fn local_store(dir: &std::path::Path) -> StackStore {
        let backend = BackendLocal::new(dir).unwrap();
        StackStore::open(Arc::new(backend), &Config::default()).unwrap()
    }

    fn store() -> StackStore {
        StackStore::in_memory(&Config::default())
    }

    // -- load/save --

    #[test]
    fn open_creates_empty_file_if_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        assert!(store.is_empty());
        assert!(tmp.path().join(STACKS_FILE).exists());
    }

    #[test]
    fn create_and_reload_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        let created = store
            .create("Phil", "+source:chatgpt", CreateOptions::default())
            .unwrap();
        assert_eq!(created.name, "phil");
        assert_eq!(created.id.len(), 26);

        let reloaded = local_store(tmp.path());
        let stack = reloaded.get("phil").unwrap();
        assert_eq!(stack.id, created.id);
        assert_eq!(
            stack.tree.root,
            Some(FilterNode::catuskoti(Category::Source, "chatgpt", CatuskotiState::Is))
        );
    }

    #[test]
    fn tree_is_not_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = local_store(tmp.path());
        store.create("a", "words:>10", CreateOptions::default()).unwrap();

        let yaml = std::fs::read_to_string(tmp.path().join(STACKS_FILE)).unwrap();
        assert!(yaml.contains("createdAt"));
        assert!(yaml.contains("syncedToRemote"));
        assert!(!yaml.contains("tree"));
    }

    #[test]
    fn stale_tree_in_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = r#"
- id: "01J0000000000000000000000A"
  name: "dev"
  query: "+tags:rust"
  tree: "garbage from an old version"
  createdAt: 1
  updatedAt: 1
"#;
        std::fs::write(tmp.path().join(STACKS_FILE), yaml).unwrap();
        let store = local_store(tmp.path());
        let stack = store.get("dev").unwrap();
        assert!(!stack.synced_to_remote);
        assert_eq!(
            stack.tree.root,
            Some(FilterNode::catuskoti(Category::Tags, "rust", CatuskotiState::Is))
        );
    }

    // -- validation --

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("  @My Stack!"), "my-stack-");
        assert_eq!(normalize_name("deep_work-2"), "deep_work-2");
        assert_eq!(normalize_name("Ünïcode"), "-n-code");
    }

    #[test]
    fn duplicate_name_rejected_after_normalizing() {
        let store = store();
        store.create("My Stack", "a", CreateOptions::default()).unwrap();
        let err = store.create("my-stack", "b", CreateOptions::default()).unwrap_err();
        assert!(matches!(err, StackError::DuplicateName(_)));
    }

    #[test]
    fn meaningless_names_rejected() {
        let store = store();
        let long = "a".repeat(101);
        for name in ["", "   ", "@", "---", long.as_str()] {
            let err = store.create(name, "a", CreateOptions::default()).unwrap_err();
            assert!(matches!(err, StackError::InvalidName), "{name:?}");
        }
    }

    #[test]
    fn limit_enforced() {
        let config = Config {
            max_stacks: 2,
            ..Config::default()
        };
        let store = StackStore::in_memory(&config);
        store.create("a", "x", CreateOptions::default()).unwrap();
        store.create("b", "y", CreateOptions::default()).unwrap();
        let err = store.create("c", "z", CreateOptions::default()).unwrap_err();
        assert!(matches!(err, StackError::LimitReached(2)));

        // room again after a delete
        store.delete("a").unwrap();
        store.create("c", "z", CreateOptions::default()).unwrap();
    }

    // -- shortcuts --

    #[test]
    fn shortcut_moves_between_stacks() {
        let store = store();
        store.create("x", "a", CreateOptions::default()).unwrap();
        store.create("y", "b", CreateOptions::default()).unwrap();
        store.assign_shortcut("x", Some(3)).unwrap();

        let y = store.assign_shortcut("y", Some(3)).unwrap();
        assert_eq!(y.keyboard_shortcut, Some(3));
        assert_eq!(store.get("x").unwrap().keyboard_shortcut, None);
        assert_eq!(store.get_by_shortcut(3).unwrap().name, "y");

        store.assign_shortcut("y", None).unwrap();
        assert!(store.get_by_shortcut(3).is_none());
    }

    #[test]
    fn shortcut_on_create_is_unique_too() {
        let store = store();
        let with = |n| CreateOptions {
            keyboard_shortcut: Some(n),
            ..Default::default()
        };
        store.create("x", "a", with(1)).unwrap();
        store.create("y", "b", with(1)).unwrap();
        assert_eq!(store.get("x").unwrap().keyboard_shortcut, None);
        assert_eq!(store.get_by_shortcut(1).unwrap().name, "y");
    }

    #[test]
    fn shortcut_out_of_range_rejected() {
        let store = store();
        store.create("x", "a", CreateOptions::default()).unwrap();
        for n in [0, 10] {
            let err = store.assign_shortcut("x", Some(n)).unwrap_err();
            assert!(matches!(err, StackError::InvalidShortcut(v) if v == n));
        }
    }

    // -- update/rename/delete --

    #[test]
    fn update_rederives_tree_and_clears_sync() {
        let store = store();
        store.create("a", "+source:x", CreateOptions::default()).unwrap();
        store.mark_synced("a").unwrap();
        assert!(store.get("a").unwrap().synced_to_remote);

        let updated = store
            .update(
                "a",
                StackUpdate {
                    query: Some("-source:x".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!updated.synced_to_remote);
        assert_eq!(
            updated.tree.root,
            Some(FilterNode::catuskoti(Category::Source, "x", CatuskotiState::IsNot))
        );
    }

    #[test]
    fn rename_checks_target() {
        let store = store();
        store.create("a", "x", CreateOptions::default()).unwrap();
        store.create("b", "y", CreateOptions::default()).unwrap();

        let err = store.rename("a", "B").unwrap_err();
        assert!(matches!(err, StackError::DuplicateName(_)));

        let renamed = store.rename("a", "c").unwrap();
        assert_eq!(renamed.name, "c");
        assert!(store.get("a").is_none());

        // renaming onto itself is allowed
        store.rename("c", "C").unwrap();
    }

    #[test]
    fn missing_stack_errors() {
        let store = store();
        assert!(matches!(store.delete("nope"), Err(StackError::NotFound(_))));
        assert!(matches!(
            store.update("nope", StackUpdate::default()),
            Err(StackError::NotFound(_))
        ));
        assert!(matches!(store.record_usage("nope"), Err(StackError::NotFound(_))));
    }

    #[test]
    fn dependent_trees_follow_changes() {
        let store = store();
        store.create("outer", "@inner words:>5", CreateOptions::default()).unwrap();
        assert!(!store.get("outer").unwrap().tree.parse_warnings.is_empty());

        store.create("inner", "+tags:x", CreateOptions::default()).unwrap();
        let outer = store.get("outer").unwrap();
        assert!(outer.tree.parse_warnings.is_empty());
    }

    #[test]
    fn cyclic_stacks_report_errors() {
        let store = store();
        store.create("a", "@b", CreateOptions::default()).unwrap();
        store.create("b", "@a", CreateOptions::default()).unwrap();
        assert!(store.get("a").unwrap().tree.has_errors());
        assert!(store.get("b").unwrap().tree.has_errors());
    }

    // -- usage, suggestions, events --

    #[test]
    fn suggest_prefers_recent_use() {
        let store = store();
        for name in ["phil-a", "phil-b", "other"] {
            store.create(name, "x", CreateOptions::default()).unwrap();
        }
        store.record_usage("phil-b").unwrap();

        let names: Vec<String> = store.suggest("@Phil").into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["phil-b", "phil-a"]);
        assert!(store.get("phil-b").unwrap().last_used.is_some());
    }

    #[test]
    fn listeners_receive_events_until_unsubscribed() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = store.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        store.create("a", "x", CreateOptions::default()).unwrap();
        store.rename("a", "b").unwrap();
        subscription.unsubscribe();
        store.delete("b").unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                StackEvent::Created { name: "a".into() },
                StackEvent::Renamed {
                    from: "a".into(),
                    to: "b".into()
                },
            ]
        );
    }

    #[test]
    fn dropped_subscription_stops_listening() {
        let store = store();
        let seen = Arc::new(Mutex::new(0));

        let sink = seen.clone();
        let subscription = store.subscribe(move |_| *sink.lock().unwrap() += 1);
        store.create("a", "x", CreateOptions::default()).unwrap();
        drop(subscription);
        store.create("b", "x", CreateOptions::default()).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);

        let sink = seen.clone();
        store
            .subscribe(move |_| *sink.lock().unwrap() += 10)
            .detach();
        store.delete("a").unwrap();
        store.delete("b").unwrap();
        assert_eq!(*seen.lock().unwrap(), 21);
    }

    #[test]
    fn listener_may_read_store() {
        let store = Arc::new(store());
        let reader = Arc::downgrade(&store);
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        let _subscription = store.subscribe(move |_| {
            if let Some(store) = reader.upgrade() {
                sink.lock().unwrap().push(store.len());
            }
        });
        store.create("a", "x", CreateOptions::default()).unwrap();
        assert_eq!(*counts.lock().unwrap(), vec![1]);
    }

    #[test]
    fn concurrent_creates_respect_limit() {
        let config = Config {
            max_stacks: 5,
            ..Config::default()
        };
        let store = Arc::new(StackStore::in_memory(&config));
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let s = store.clone();
                std::thread::spawn(move || s.create(&format!("s{i}"), "x", CreateOptions::default()).is_ok())
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(created, 5);
        assert_eq!(store.len(), 5);
    }
}
