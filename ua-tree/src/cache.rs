//! Lazy, cached tree over a [`NodeSource`].
//!
//! Entries live in an arena owned by [`LazyTreeCache`] and are addressed by
//! generational [`EntryId`] handles. Parent links are plain handles, so the
//! arena is the only owner of every entry. Dropping an entry bumps its
//! slot's generation, which turns every outstanding handle to it into a
//! detectable stale handle.

use crate::error::{TreeError, TreeResult};
use crate::node::{NodeClass, NodeDescription, NodeId};
use crate::source::NodeSource;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// Handle to an entry of a [`LazyTreeCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    index: usize,
    generation: u32,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({}v{})", self.index, self.generation)
    }
}

/// Cached local representation of one namespace node.
#[derive(Debug)]
pub struct Entry {
    description: NodeDescription,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    fetched: bool,
    in_flight: bool,
    /// Bumped on every invalidation; tickets from older epochs are stale.
    epoch: u64,
}

impl Entry {
    fn new(description: NodeDescription, parent: Option<EntryId>) -> Self {
        Self {
            description,
            parent,
            children: Vec::new(),
            fetched: false,
            in_flight: false,
            epoch: 0,
        }
    }

    pub const fn description(&self) -> &NodeDescription {
        &self.description
    }

    pub const fn node_id(&self) -> &NodeId {
        &self.description.node_id
    }

    pub fn display_name(&self) -> &str {
        &self.description.display_name
    }

    pub fn browse_name(&self) -> &str {
        &self.description.browse_name
    }

    pub const fn node_class(&self) -> NodeClass {
        self.description.node_class
    }

    pub const fn type_definition(&self) -> &NodeId {
        &self.description.type_definition
    }

    /// `None` for the root.
    pub const fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Cached children in browse-name order. Empty until fetched.
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub const fn is_fetched(&self) -> bool {
        self.fetched
    }

    /// `true` while a split-phase fetch ticket is outstanding.
    pub const fn is_loading(&self) -> bool {
        self.in_flight
    }
}

/// Proof that a split-phase fetch was started for an entry.
///
/// Obtained from [`LazyTreeCache::begin_fetch`] and consumed by
/// [`LazyTreeCache::complete_fetch`].
#[derive(Debug)]
pub struct FetchTicket {
    entry: EntryId,
    node_id: NodeId,
    epoch: u64,
}

impl FetchTicket {
    pub const fn entry(&self) -> EntryId {
        self.entry
    }

    /// Identity to pass to [`NodeSource::get_children_descriptions`].
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }
}

/// Outcome of [`LazyTreeCache::begin_fetch`].
#[derive(Debug)]
pub enum FetchStart {
    /// Children are already cached.
    Ready,
    /// Another fetch for this entry is in flight.
    Pending,
    /// The caller now owns the fetch and must complete it.
    Ticket(FetchTicket),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Demand-driven tree cache over a remote hierarchical namespace.
///
/// Children of an entry are fetched from the [`NodeSource`] on first request
/// and served from memory afterwards, until the entry is invalidated.
pub struct LazyTreeCache {
    source: Arc<dyn NodeSource>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: Option<EntryId>,
    /// Identity -> the one entry caching it.
    by_node_id: HashMap<NodeId, EntryId>,
}

impl fmt::Debug for LazyTreeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTreeCache")
            .field("root", &self.root)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl LazyTreeCache {
    pub fn new(source: Arc<dyn NodeSource>) -> Self {
        Self {
            source,
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            by_node_id: HashMap::new(),
        }
    }

    /// Shared handle to the underlying source, for split-phase fetches.
    pub fn source(&self) -> Arc<dyn NodeSource> {
        Arc::clone(&self.source)
    }

    /// Replace the whole tree with a fresh root resolved from the source.
    ///
    /// On error the previous tree is left untouched.
    pub async fn set_root(&mut self, node_id: &NodeId) -> TreeResult<EntryId> {
        let span = tracing::info_span!("tree.set_root", node_id = %node_id);
        let description = self
            .source
            .describe(node_id)
            .instrument(span)
            .await
            .inspect_err(|e| {
                tracing::warn!(node_id = %node_id, error = %e, "set_root: describe failed");
            })?;

        self.clear();
        let root = self.alloc(description, None);
        self.root = Some(root);
        tracing::info!(node_id = %node_id, root = %root, "set_root completed");
        Ok(root)
    }

    /// Report whether an entry has children, fetching them first if needed.
    ///
    /// `None` stands for the invisible placeholder above the root and always
    /// reports `true`, so the root is offered for expansion at least once.
    pub async fn has_children(&mut self, entry: Option<EntryId>) -> TreeResult<bool> {
        let Some(id) = entry else {
            return Ok(true);
        };
        Ok(!self.children_of(id).await?.is_empty())
    }

    /// Cached children of an entry, fetching them on first access.
    pub async fn children_of(&mut self, id: EntryId) -> TreeResult<&[EntryId]> {
        self.ensure_fetched(id).await?;
        Ok(&self.entry(id)?.children)
    }

    async fn ensure_fetched(&mut self, id: EntryId) -> TreeResult<()> {
        let entry = self.entry(id)?;
        if entry.fetched {
            tracing::trace!(node_id = %entry.node_id(), "Cache hit");
            return Ok(());
        }
        if entry.in_flight {
            return Err(TreeError::FetchInProgress(entry.node_id().clone()));
        }

        let node_id = entry.node_id().clone();
        tracing::debug!(node_id = %node_id, "Cache miss, fetching children");
        let span = tracing::info_span!("tree.fetch", node_id = %node_id);
        let source = Arc::clone(&self.source);
        let descriptions = source
            .get_children_descriptions(&node_id)
            .instrument(span)
            .await
            .inspect_err(|e| {
                tracing::warn!(node_id = %node_id, error = %e, "Fetch failed; entry left unfetched");
            })?;

        self.commit_children(id, descriptions)
    }

    /// Start a fetch whose source call the caller runs elsewhere.
    ///
    /// At most one ticket per entry is outstanding at a time.
    pub fn begin_fetch(&mut self, id: EntryId) -> TreeResult<FetchStart> {
        let entry = self.entry_mut(id)?;
        if entry.fetched {
            return Ok(FetchStart::Ready);
        }
        if entry.in_flight {
            return Ok(FetchStart::Pending);
        }
        entry.in_flight = true;
        tracing::debug!(node_id = %entry.node_id(), epoch = entry.epoch, "begin_fetch: ticket issued");
        Ok(FetchStart::Ticket(FetchTicket {
            entry: id,
            node_id: entry.node_id().clone(),
            epoch: entry.epoch,
        }))
    }

    /// Commit (or abandon) a fetch started by [`begin_fetch`](Self::begin_fetch).
    ///
    /// A ticket whose entry was invalidated or dropped in the meantime is
    /// rejected with [`TreeError::StaleFetch`] and the result is discarded.
    /// A source error is returned unchanged and leaves the entry unfetched.
    pub fn complete_fetch(
        &mut self,
        ticket: FetchTicket,
        result: TreeResult<Vec<NodeDescription>>,
    ) -> TreeResult<()> {
        let FetchTicket {
            entry: id,
            node_id,
            epoch,
        } = ticket;

        match self.get_mut(id) {
            Some(entry) if entry.in_flight && entry.epoch == epoch => entry.in_flight = false,
            _ => {
                tracing::warn!(node_id = %node_id, "complete_fetch: discarding stale result");
                return Err(TreeError::StaleFetch(node_id));
            }
        }

        let descriptions = result.inspect_err(|e| {
            tracing::warn!(node_id = %node_id, error = %e, "Fetch failed; entry left unfetched");
        })?;
        self.commit_children(id, descriptions)
    }

    fn commit_children(
        &mut self,
        id: EntryId,
        mut descriptions: Vec<NodeDescription>,
    ) -> TreeResult<()> {
        // Stable: equal browse names keep source order.
        descriptions.sort_by(|a, b| a.browse_name.cmp(&b.browse_name));
        self.validate_children(id, &descriptions)?;

        let children: Vec<EntryId> = descriptions
            .into_iter()
            .map(|description| self.alloc(description, Some(id)))
            .collect();
        let count = children.len();

        let entry = self.entry_mut(id)?;
        entry.children = children;
        entry.fetched = true;
        tracing::info!(node_id = %entry.node_id(), count, "Children fetched");
        Ok(())
    }

    fn validate_children(&self, id: EntryId, descriptions: &[NodeDescription]) -> TreeResult<()> {
        let parent = self.entry(id)?;
        if !parent.children.is_empty() {
            return Err(TreeError::InvariantViolation(format!(
                "{} is unfetched but still holds children",
                parent.node_id()
            )));
        }

        let mut seen = HashSet::with_capacity(descriptions.len());
        for description in descriptions {
            if !seen.insert(&description.node_id) {
                return Err(TreeError::InvariantViolation(format!(
                    "duplicate child {} under {}",
                    description.node_id,
                    parent.node_id()
                )));
            }
        }

        // Covers ancestors too, so a reference cycle is rejected here.
        if let Some(description) = descriptions
            .iter()
            .find(|d| self.by_node_id.contains_key(&d.node_id))
        {
            return Err(TreeError::InvariantViolation(format!(
                "{} lists {} which is already cached elsewhere in the tree",
                parent.node_id(),
                description.node_id
            )));
        }
        Ok(())
    }

    /// Drop the cached children of an entry and force a re-fetch on next access.
    ///
    /// Handles to the dropped descendants become stale. Ancestors and
    /// siblings are untouched, and any outstanding ticket for this entry is
    /// rejected when it completes.
    pub fn invalidate(&mut self, id: EntryId) -> TreeResult<()> {
        let entry = self.entry_mut(id)?;
        let children = std::mem::take(&mut entry.children);
        entry.fetched = false;
        entry.in_flight = false;
        entry.epoch += 1;
        let node_id = entry.node_id().clone();

        let before = self.len();
        for child in children {
            self.free_subtree(child);
        }
        tracing::info!(node_id = %node_id, dropped = before - self.len(), "Entry invalidated");
        Ok(())
    }

    /// Drop the entire tree, root included.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index);
            }
        }
        self.by_node_id.clear();
        if self.root.take().is_some() {
            tracing::debug!("Tree cleared");
        }
    }

    /// Browse names from just below the root down to `id`; empty for the root.
    ///
    /// Pure traversal of cached ancestry, never calls the source.
    pub fn path_to(&self, id: EntryId) -> TreeResult<Vec<String>> {
        let mut path = Vec::new();
        let mut current = self.entry(id)?;
        while let Some(parent) = current.parent {
            path.push(current.browse_name().to_owned());
            current = self.entry(parent)?;
        }
        path.reverse();
        Ok(path)
    }

    pub const fn root(&self) -> Option<EntryId> {
        self.root
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.get(id).and_then(Entry::parent)
    }

    /// Children already in the cache, without fetching.
    pub fn cached_children(&self, id: EntryId) -> &[EntryId] {
        self.get(id).map_or(&[], Entry::children)
    }

    pub fn is_fetched(&self, id: EntryId) -> bool {
        self.get(id).is_some_and(Entry::is_fetched)
    }

    pub fn is_loading(&self, id: EntryId) -> bool {
        self.get(id).is_some_and(Entry::is_loading)
    }

    /// Root = 0. Returns 0 for stale handles.
    pub fn depth(&self, id: EntryId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    /// Resolve an identity to the entry currently caching it.
    pub fn find(&self, node_id: &NodeId) -> Option<EntryId> {
        self.by_node_id.get(node_id).copied()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: EntryId) -> TreeResult<&Entry> {
        self.get(id).ok_or_else(|| stale_handle(id))
    }

    fn entry_mut(&mut self, id: EntryId) -> TreeResult<&mut Entry> {
        self.get_mut(id).ok_or_else(|| stale_handle(id))
    }

    fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    fn alloc(&mut self, description: NodeDescription, parent: Option<EntryId>) -> EntryId {
        let node_id = description.node_id.clone();
        let entry = Entry::new(description, parent);
        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.entry = Some(entry);
            EntryId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            EntryId {
                index: self.slots.len() - 1,
                generation: 0,
            }
        };
        self.by_node_id.insert(node_id, id);
        id
    }

    fn free_subtree(&mut self, id: EntryId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(current.index)
                .filter(|slot| slot.generation == current.generation)
            else {
                continue;
            };
            let Some(entry) = slot.entry.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(current.index);

            if self.by_node_id.get(entry.node_id()) == Some(&current) {
                self.by_node_id.remove(entry.node_id());
            }
            stack.extend(entry.children);
        }
    }
}

fn stale_handle(id: EntryId) -> TreeError {
    TreeError::InvariantViolation(format!("{id} is stale or not owned by this cache"))
}
