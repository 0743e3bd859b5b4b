use ratatui::widgets::TableState;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use ua_tree::presentation::{node_ids_text, path_text};
use ua_tree::{
    EntryId, FetchStart, FetchTicket, LazyTreeCache, NodeDescription, NodeId, NodeSource,
    TreeError, TreeResult, friendly_hint,
};

/// Default timeout for a single source round-trip.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Rows skipped by PgUp/PgDn.
const PAGE_SIZE: usize = 20;

/// Size of the message ring buffer.
const MAX_MESSAGES: usize = 10;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CurrentScreen {
    Loading,
    Browse,
    Exiting,
}

/// One visible line of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub id: EntryId,
    pub depth: usize,
}

struct PendingFetch {
    ticket: FetchTicket,
    rx: oneshot::Receiver<TreeResult<Vec<NodeDescription>>>,
}

/// Main application state for the namespace browser TUI.
///
/// Owns the tree cache, the set of expanded entries and the background
/// fetches started for them.
pub struct App {
    pub cache: LazyTreeCache,
    pub root_node_id: NodeId,
    pub current_screen: CurrentScreen,
    pub expanded: HashSet<EntryId>,
    pub rows: Vec<Row>,
    pub selected_index: Option<usize>,
    pub table_state: TableState,
    pub messages: Vec<String>,
    /// Last text placed on the (in-app) clipboard.
    pub clipboard: Option<String>,
    /// Set to rebuild the tree from the root on the next loop iteration.
    pub reload_requested: bool,
    pub timeout: Duration,
    pending: Vec<PendingFetch>,
}

impl App {
    /// Create a new `App`; the root is loaded on the first loop iteration.
    pub fn new(source: Arc<dyn NodeSource>, root_node_id: NodeId, timeout: Duration) -> Self {
        Self {
            cache: LazyTreeCache::new(source),
            root_node_id,
            current_screen: CurrentScreen::Loading,
            expanded: HashSet::new(),
            rows: Vec::new(),
            selected_index: None,
            table_state: TableState::default(),
            messages: Vec::new(),
            clipboard: None,
            reload_requested: true,
            timeout,
            pending: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: String) {
        self.messages.push(message);
        if self.messages.len() > MAX_MESSAGES {
            self.messages.remove(0);
        }
    }

    /// Discard the tree and resolve the root again.
    pub async fn load_root(&mut self) {
        self.current_screen = CurrentScreen::Loading;
        self.pending.clear();
        self.expanded.clear();
        self.add_message(format!("Loading {}...", self.root_node_id));

        let result =
            tokio::time::timeout(self.timeout, self.cache.set_root(&self.root_node_id)).await;
        match result.unwrap_or_else(|e| Err(e.into())) {
            Ok(root) => {
                tracing::info!(root = %self.root_node_id, "Root loaded");
                self.expanded.insert(root);
                self.start_fetch(root);
                self.add_message(format!("Browsing {}", self.root_node_id));
            }
            Err(e) => {
                tracing::error!(error = %e, root = %self.root_node_id, "Failed to load root");
                self.cache.clear();
                self.add_message(format!("Failed to load root: {}", describe_error(&e)));
            }
        }
        self.current_screen = CurrentScreen::Browse;
        self.refresh_rows();
    }

    pub fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    /// Start a background fetch of an entry's children unless one is cached
    /// or already running.
    pub fn start_fetch(&mut self, id: EntryId) {
        let ticket = match self.cache.begin_fetch(id) {
            Ok(FetchStart::Ticket(ticket)) => ticket,
            Ok(FetchStart::Ready | FetchStart::Pending) => return,
            Err(e) => {
                tracing::error!(error = %e, "start_fetch: entry no longer cached");
                self.add_message(format!("Error: {e}"));
                return;
            }
        };

        let source = self.cache.source();
        let node_id = ticket.node_id().clone();
        let timeout = self.timeout;
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, source.get_children_descriptions(&node_id))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(node_id = %node_id, timeout_secs = timeout.as_secs(), "Fetch timed out");
                    Err(e.into())
                });
            let _ = tx.send(result);
        });

        self.pending.push(PendingFetch { ticket, rx });
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Commit every background fetch that has finished.
    pub fn poll_fetch_results(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let mut still_running = Vec::new();
        let mut finished = false;
        for mut fetch in std::mem::take(&mut self.pending) {
            match fetch.rx.try_recv() {
                Ok(result) => {
                    self.finish_fetch(fetch.ticket, result);
                    finished = true;
                }
                Err(oneshot::error::TryRecvError::Empty) => still_running.push(fetch),
                Err(oneshot::error::TryRecvError::Closed) => {
                    tracing::error!(
                        node_id = %fetch.ticket.node_id(),
                        "Fetch background task terminated unexpectedly (sender dropped)"
                    );
                    self.finish_fetch(
                        fetch.ticket,
                        Err(TreeError::SourceUnavailable(
                            "fetch task terminated unexpectedly".into(),
                        )),
                    );
                    finished = true;
                }
            }
        }
        self.pending.extend(still_running);

        if finished {
            self.refresh_rows();
        }
    }

    fn finish_fetch(&mut self, ticket: FetchTicket, result: TreeResult<Vec<NodeDescription>>) {
        let id = ticket.entry();
        let node_id = ticket.node_id().clone();
        match self.cache.complete_fetch(ticket, result) {
            Ok(()) => {}
            Err(TreeError::StaleFetch(_)) => {
                tracing::debug!(node_id = %node_id, "Discarded result of a refreshed entry");
            }
            Err(e) => {
                tracing::error!(error = %e, node_id = %node_id, "Fetch failed");
                self.expanded.remove(&id);
                self.add_message(format!("Error loading {node_id}: {}", describe_error(&e)));
            }
        }
    }

    /// Rebuild the visible rows from the expanded set, keeping the selection
    /// on the same entry where possible.
    pub fn refresh_rows(&mut self) {
        let selected = self.selected_entry();
        self.rows.clear();

        if let Some(root) = self.cache.root() {
            let mut stack = vec![(root, 0)];
            while let Some((id, depth)) = stack.pop() {
                self.rows.push(Row { id, depth });
                if self.expanded.contains(&id) {
                    stack.extend(
                        self.cache
                            .cached_children(id)
                            .iter()
                            .rev()
                            .map(|&child| (child, depth + 1)),
                    );
                }
            }
        }

        let index = if self.rows.is_empty() {
            None
        } else {
            selected
                .and_then(|id| self.rows.iter().position(|row| row.id == id))
                .or_else(|| self.selected_index.map(|i| i.min(self.rows.len() - 1)))
                .or(Some(0))
        };
        self.select(index);
    }

    fn select(&mut self, index: Option<usize>) {
        self.selected_index = index;
        self.table_state.select(index);
    }

    pub fn selected_entry(&self) -> Option<EntryId> {
        self.selected_index
            .and_then(|i| self.rows.get(i))
            .map(|row| row.id)
            .filter(|&id| self.cache.contains(id))
    }

    pub fn select_next(&mut self) {
        let count = self.rows.len();
        if count == 0 {
            return;
        }
        match self.selected_index {
            Some(idx) if idx < count - 1 => self.select(Some(idx + 1)),
            Some(_) => {}
            None => self.select(Some(0)),
        }
    }

    pub fn select_prev(&mut self) {
        if let Some(idx) = self.selected_index
            && idx > 0
        {
            self.select(Some(idx - 1));
        }
    }

    /// Jump forward by `PAGE_SIZE` rows (clamped to end of list).
    pub fn page_down(&mut self) {
        let count = self.rows.len();
        if count == 0 {
            return;
        }
        let new_idx = self
            .selected_index
            .map_or(0, |idx| (idx + PAGE_SIZE).min(count - 1));
        self.select(Some(new_idx));
    }

    /// Jump backward by `PAGE_SIZE` rows (clamped to start of list).
    pub fn page_up(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        let new_idx = self
            .selected_index
            .map_or(0, |idx| idx.saturating_sub(PAGE_SIZE));
        self.select(Some(new_idx));
    }

    /// Expand the selected entry, fetching its children in the background
    /// on first expansion.
    pub fn expand_selected(&mut self) {
        let Some(id) = self.selected_entry() else {
            return;
        };
        if self.cache.is_fetched(id) && self.cache.cached_children(id).is_empty() {
            tracing::debug!("expand_selected: entry has no children");
            return;
        }
        self.expanded.insert(id);
        self.start_fetch(id);
        self.refresh_rows();
    }

    /// Collapse the selected entry, or move to its parent if already collapsed.
    pub fn collapse_selected(&mut self) {
        let Some(id) = self.selected_entry() else {
            return;
        };
        if self.expanded.remove(&id) {
            self.refresh_rows();
        } else if let Some(parent) = self.cache.parent(id)
            && let Some(index) = self.rows.iter().position(|row| row.id == parent)
        {
            self.select(Some(index));
        }
    }

    /// Drop the cached children of the selected entry and load them again
    /// if it was expanded.
    pub fn invalidate_selected(&mut self) {
        let Some(id) = self.selected_entry() else {
            return;
        };
        let Some(entry) = self.cache.get(id) else {
            return;
        };
        let name = entry.display_name().to_owned();
        let was_expanded = self.expanded.contains(&id);

        if let Err(e) = self.cache.invalidate(id) {
            tracing::error!(error = %e, "invalidate_selected failed");
            self.add_message(format!("Error: {e}"));
            return;
        }
        let cache = &self.cache;
        self.expanded.retain(|&other| cache.contains(other));

        // The entry itself survives; only handles below it are gone.
        if was_expanded {
            self.start_fetch(id);
        }
        self.refresh_rows();
        if let Some(index) = self.rows.iter().position(|row| row.id == id) {
            self.select(Some(index));
        }
        self.add_message(format!("Refreshing {name}"));
    }

    /// Copy the browse path of the selected entry.
    pub fn copy_path(&mut self) {
        let Some(id) = self.selected_entry() else {
            return;
        };
        match self.cache.path_to(id) {
            Ok(path) => {
                let text = path_text(&path);
                self.add_message(format!("Copied path: {text}"));
                self.clipboard = Some(text);
            }
            Err(e) => {
                tracing::error!(error = %e, "copy_path failed");
                self.add_message(format!("Error: {e}"));
            }
        }
    }

    /// Copy the node id of the selected entry.
    pub fn copy_node_id(&mut self) {
        let Some(entry) = self.selected_entry().and_then(|id| self.cache.get(id)) else {
            return;
        };
        let text = node_ids_text(std::iter::once(entry.node_id()));
        self.add_message(format!("Copied node id: {text}"));
        self.clipboard = Some(text);
    }

    pub fn quit(&mut self) {
        self.current_screen = CurrentScreen::Exiting;
    }
}

fn describe_error(error: &TreeError) -> String {
    match friendly_hint(error) {
        Some(hint) => format!("{error} ({hint})"),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_tree::{MockNodeSource, NodeClass};

    fn desc(id: &str, name: &str) -> NodeDescription {
        NodeDescription::new(id, name, NodeClass::Object, "i=61")
    }

    fn namespace(mock: &mut MockNodeSource) {
        mock.expect_describe()
            .returning(|id| Ok(desc(id.as_str(), "Root")));
        mock.expect_get_children_descriptions()
            .returning(|id| match id.as_str() {
                "i=84" => Ok(vec![desc("i=86", "Types"), desc("i=85", "Objects")]),
                "i=85" => Ok(vec![desc("i=2253", "Server")]),
                _ => Ok(vec![]),
            });
    }

    fn app_with(mock: MockNodeSource) -> App {
        App::new(
            Arc::new(mock),
            NodeId::new("i=84"),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    async fn settle(app: &mut App) {
        for _ in 0..200 {
            app.poll_fetch_results();
            if !app.has_pending() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("background fetches did not finish");
    }

    fn row_names(app: &App) -> Vec<String> {
        app.rows
            .iter()
            .map(|row| {
                let entry = app.cache.get(row.id).unwrap();
                format!("{}{}", "  ".repeat(row.depth), entry.browse_name())
            })
            .collect()
    }

    async fn loaded_app() -> App {
        let mut mock = MockNodeSource::new();
        namespace(&mut mock);
        let mut app = app_with(mock);
        app.load_root().await;
        settle(&mut app).await;
        app
    }

    #[test]
    fn test_new_app_requests_load() {
        let app = app_with(MockNodeSource::new());
        assert_eq!(app.current_screen, CurrentScreen::Loading);
        assert!(app.reload_requested);
        assert!(app.rows.is_empty());
    }

    #[tokio::test]
    async fn test_load_root_expands_root() {
        let app = loaded_app().await;
        assert_eq!(app.current_screen, CurrentScreen::Browse);
        assert_eq!(row_names(&app), ["Root", "  Objects", "  Types"]);
        assert_eq!(app.selected_index, Some(0));
        assert!(app.messages.last().unwrap().contains("Browsing i=84"));
    }

    #[tokio::test]
    async fn test_load_root_failure_shows_message() {
        let mut mock = MockNodeSource::new();
        mock.expect_describe()
            .returning(|_| Err(TreeError::SourceUnavailable("not connected".into())));
        let mut app = app_with(mock);
        app.load_root().await;

        assert_eq!(app.current_screen, CurrentScreen::Browse);
        assert!(app.rows.is_empty());
        assert_eq!(app.selected_index, None);
        let last = app.messages.last().unwrap();
        assert!(last.contains("Failed to load root"));
        assert!(last.contains("retry"));
    }

    #[tokio::test]
    async fn test_expand_and_collapse() {
        let mut app = loaded_app().await;
        app.select_next();
        app.expand_selected();
        assert!(app.cache.is_loading(app.rows[1].id));
        settle(&mut app).await;
        assert_eq!(
            row_names(&app),
            ["Root", "  Objects", "    Server", "  Types"]
        );

        app.collapse_selected();
        assert_eq!(row_names(&app), ["Root", "  Objects", "  Types"]);
        assert_eq!(app.selected_index, Some(1));

        // Collapsed already: moves to the parent.
        app.collapse_selected();
        assert_eq!(app.selected_index, Some(0));
    }

    #[tokio::test]
    async fn test_expand_leaf_is_noop() {
        let mut app = loaded_app().await;
        app.select_next();
        app.select_next();
        app.expand_selected();
        settle(&mut app).await;
        let types = app.rows[2].id;
        assert!(app.cache.is_fetched(types));

        app.expand_selected();
        assert!(!app.has_pending());
        assert_eq!(row_names(&app), ["Root", "  Objects", "  Types"]);
    }

    #[tokio::test]
    async fn test_fetch_error_collapses_entry() {
        let mut mock = MockNodeSource::new();
        mock.expect_describe()
            .returning(|id| Ok(desc(id.as_str(), "Root")));
        mock.expect_get_children_descriptions()
            .returning(|_| Err(TreeError::SourceUnavailable("connection lost".into())));
        let mut app = app_with(mock);
        app.load_root().await;
        settle(&mut app).await;

        let root = app.rows[0].id;
        assert!(!app.expanded.contains(&root));
        assert!(!app.cache.is_fetched(root));
        assert!(app.messages.last().unwrap().contains("Error loading i=84"));
    }

    #[tokio::test]
    async fn test_poll_closed_channel_releases_entry() {
        let mut app = app_with(MockNodeSource::new());
        app.cache = LazyTreeCache::new(Arc::new(ua_tree::SnapshotSource::demo()));
        let root = app.cache.set_root(&NodeId::new("i=84")).await.unwrap();

        let FetchStart::Ticket(ticket) = app.cache.begin_fetch(root).unwrap() else {
            panic!("expected a ticket");
        };
        let (tx, rx) = oneshot::channel();
        drop(tx);
        app.pending.push(PendingFetch { ticket, rx });
        app.poll_fetch_results();

        assert!(!app.has_pending());
        assert!(!app.cache.is_loading(root));
        assert!(
            app.messages
                .last()
                .unwrap()
                .contains("terminated unexpectedly")
        );
    }

    #[tokio::test]
    async fn test_invalidate_selected_refetches() {
        let mut app = loaded_app().await;
        app.select_next();
        app.expand_selected();
        settle(&mut app).await;
        let objects_before = app.rows[1].id;
        let server_before = app.rows[2].id;

        app.select_prev();
        app.invalidate_selected();
        assert!(!app.cache.contains(objects_before));
        assert!(!app.cache.contains(server_before));
        assert_eq!(app.selected_index, Some(0));
        settle(&mut app).await;

        // Root reloaded; Objects is a new entry and no longer expanded.
        assert_eq!(row_names(&app), ["Root", "  Objects", "  Types"]);
        assert!(app.messages.last().unwrap().contains("Refreshing Root"));
    }

    #[tokio::test]
    async fn test_invalidate_nested_entry_keeps_it_selected() {
        let mut mock = MockNodeSource::new();
        mock.expect_describe()
            .returning(|id| Ok(desc(id.as_str(), "Root")));
        let leaf_fetches = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&leaf_fetches);
        mock.expect_get_children_descriptions()
            .returning(move |id| match id.as_str() {
                "i=84" => Ok(vec![desc("a", "A"), desc("b", "B")]),
                "a" | "b" => Ok(vec![desc("shared", "Shared")]),
                "shared" => {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(vec![desc("leaf", "Leaf")])
                }
                _ => Ok(vec![]),
            });
        let mut app = app_with(mock);
        app.load_root().await;
        settle(&mut app).await;

        // Root, A, B: expand A then its Shared child.
        app.select_next();
        app.expand_selected();
        settle(&mut app).await;
        app.select_next();
        app.expand_selected();
        settle(&mut app).await;
        assert_eq!(row_names(&app), ["Root", "  A", "    Shared", "      Leaf", "  B"]);

        // B lists the identity already cached under A.
        app.select(Some(4));
        app.expand_selected();
        settle(&mut app).await;
        assert!(app.messages.last().unwrap().contains("Error loading b"));
        assert!(!app.expanded.contains(&app.rows[4].id));

        app.select(Some(2));
        let shared = app.rows[2].id;
        app.invalidate_selected();
        settle(&mut app).await;

        assert_eq!(app.selected_entry(), Some(shared));
        assert!(app.cache.is_fetched(shared));
        assert!(app.expanded.contains(&shared));
        assert_eq!(leaf_fetches.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(row_names(&app), ["Root", "  A", "    Shared", "      Leaf", "  B"]);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_discards_result() {
        let mut app = loaded_app().await;
        app.select_next();
        app.expand_selected();
        app.invalidate_selected();
        settle(&mut app).await;

        assert_eq!(
            row_names(&app),
            ["Root", "  Objects", "    Server", "  Types"]
        );
        assert!(!app.messages.iter().any(|m| m.contains("Error")));
    }

    #[tokio::test]
    async fn test_copy_path_and_node_id() {
        let mut app = loaded_app().await;
        app.select_next();
        app.expand_selected();
        settle(&mut app).await;
        app.select_next();

        app.copy_path();
        assert_eq!(app.clipboard.as_deref(), Some("Objects,Server"));
        app.copy_node_id();
        assert_eq!(app.clipboard.as_deref(), Some("i=2253"));
        assert!(app.messages.last().unwrap().contains("i=2253"));
    }

    #[tokio::test]
    async fn test_navigation_bounds() {
        let mut app = loaded_app().await;
        app.page_down();
        assert_eq!(app.selected_index, Some(2));
        app.select_next();
        assert_eq!(app.selected_index, Some(2));
        app.page_up();
        assert_eq!(app.selected_index, Some(0));
        app.select_prev();
        assert_eq!(app.selected_index, Some(0));
        assert_eq!(app.table_state.selected(), Some(0));
    }

    #[test]
    fn test_select_on_empty_list() {
        let mut app = app_with(MockNodeSource::new());
        app.select_next();
        app.page_down();
        app.page_up();
        app.expand_selected();
        app.copy_path();
        assert_eq!(app.selected_index, None);
        assert!(app.messages.is_empty());
    }

    #[test]
    fn test_add_message_ring_buffer() {
        let mut app = app_with(MockNodeSource::new());
        for i in 0..15 {
            app.add_message(format!("msg {i}"));
        }
        assert_eq!(app.messages.len(), MAX_MESSAGES);
        assert_eq!(app.messages[0], "msg 5");
    }
}
