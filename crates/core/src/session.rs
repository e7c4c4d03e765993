//! Document session
//!
//! [`DocumentSession`] ties window requests to the active document. It owns
//! the render cache, the I/O pool and the loader thread, and it is the only
//! place where the active document changes.
//!
//! Every document change starts a new generation (the render cache epoch)
//! with a page source of its own. Window requests and scroll writes remember
//! the generation they were issued under and are dropped once it is
//! superseded, so a slow render for one document can never show up in the
//! next, nor delay the switch to it.
//!
//! Lock order: `load_lock`, `scroll`, `active`, state hub.

use crate::config::RoadbookConfig;
use crate::error::{PageError, SessionError};
use crate::pager::{LoadParams, PageBatch, PagerConfig, SharedSource, WindowedPager};
use crate::scroll::{ScrollLedger, ScrollPosition};
use crate::state::{LoadState, StateHub};
use crate::store::{keys, JsonFileStore, KeyValueStore, StoreOp};
use parking_lot::{Mutex, RwLock};
use roadbook_cache::{CacheStats, Epoch, RenderCache};
use roadbook_render::{
    ContentHandle, ContentImportSource, DocumentId, FileImporter, OpenError, PageIndex,
    PageRenderSource,
};
use roadbook_scheduler::{CancellationToken, IoPool, IoPoolConfig, SerialExecutor, TaskHandle};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Creates an unopened page source for each document generation
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn PageRenderSource> + Send + Sync>;

/// A window request, keyed for coalescing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct WindowRequest {
    generation: Epoch,
    params: LoadParams,
}

struct ActiveDocument {
    identity: DocumentId,
    generation: Epoch,
    token: CancellationToken,
    pager: Arc<WindowedPager>,
}

/// Sequencing of fire-and-forget scroll writes
struct ScrollWrites {
    generation: Epoch,
    issued: u64,
    written: u64,
}

/// What the presentation needs to restore its view
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub document: Option<DocumentId>,
    pub page_count: u32,
    pub state: LoadState,
    /// Persisted scroll position to apply once the first batch arrives
    pub initial_scroll: ScrollPosition,
}

/// Builder for [`DocumentSession`]
pub struct SessionBuilder {
    config: RoadbookConfig,
    sources: SourceFactory,
    importer: Option<Arc<dyn ContentImportSource>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl SessionBuilder {
    /// Use a custom importer instead of copying into the data directory
    pub fn importer(mut self, importer: Arc<dyn ContentImportSource>) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Use a custom store instead of the session file in the data directory
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<DocumentSession, SessionError> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::open(config.session_file())?),
        };
        let importer: Arc<dyn ContentImportSource> = match self.importer {
            Some(importer) => importer,
            None => Arc::new(FileImporter::new(config.documents_dir())),
        };

        let pool = IoPool::new(
            IoPoolConfig::new(config.io_threads).with_thread_name("roadbook-io"),
        )?;
        let loader = SerialExecutor::new("roadbook-loader")?;
        let cache = Arc::new(RenderCache::new(config.cache_entries));
        let generation = cache.epoch();

        let inner = SessionInner {
            pager_config: config.pager(),
            sources: self.sources,
            ledger: ScrollLedger::new(Arc::clone(&store)),
            importer,
            store,
            cache,
            pool: Arc::new(pool),
            loader,
            hub: StateHub::new(),
            load_lock: Mutex::new(()),
            scroll: Mutex::new(ScrollWrites { generation, issued: 0, written: 0 }),
            active: RwLock::new(None),
            pending: Mutex::new(HashSet::new()),
            shut_down: AtomicBool::new(false),
            config,
        };

        Ok(DocumentSession { inner: Arc::new(inner) })
    }
}

/// The active document, its pager and the load state observed by the UI
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct DocumentSession {
    inner: Arc<SessionInner>,
}

impl DocumentSession {
    /// Start building a session; `sources` is called once per opened document
    pub fn builder<F>(config: RoadbookConfig, sources: F) -> SessionBuilder
    where
        F: Fn() -> Box<dyn PageRenderSource> + Send + Sync + 'static,
    {
        SessionBuilder { config, sources: Arc::new(sources), importer: None, store: None }
    }

    pub fn config(&self) -> &RoadbookConfig {
        &self.inner.config
    }

    /// Current load state
    pub fn state(&self) -> LoadState {
        self.inner.hub.current()
    }

    /// Stream of load states, starting with the current one
    pub fn subscribe(&self) -> Receiver<LoadState> {
        self.inner.hub.subscribe()
    }

    /// Identity of the active document
    pub fn document(&self) -> Option<DocumentId> {
        self.inner.active.read().as_ref().map(|doc| doc.identity.clone())
    }

    /// Page count of the active document, 0 if none
    pub fn page_count(&self) -> u32 {
        self.inner.active.read().as_ref().map_or(0, |doc| doc.pager.page_count())
    }

    /// Persisted scroll position
    pub fn initial_scroll(&self) -> ScrollPosition {
        self.inner.ledger.get()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (document, page_count) = match &*self.inner.active.read() {
            Some(doc) => (Some(doc.identity.clone()), doc.pager.page_count()),
            None => (None, 0),
        };
        SessionSnapshot {
            document,
            page_count,
            state: self.state(),
            initial_scroll: self.initial_scroll(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Reopen the persisted document after a restart
    ///
    /// Loads the window containing the persisted scroll position. If the
    /// document no longer exists, the persisted identity is cleared and the
    /// session stays [`LoadState::NotLoaded`]; other open errors are
    /// returned without touching the persisted state.
    pub fn restore(&self) -> Result<Option<DocumentId>, SessionError> {
        self.inner.restore()
    }

    /// Make the content behind `handle` the active document
    ///
    /// Imports the content and opens it in a fresh page source first; only
    /// then are the scroll position reset and the identity persisted (one
    /// store update), the cache invalidated and the previous pager
    /// cancelled. Renders still running for the previous document do not
    /// hold up the switch. If any step fails the previous document stays
    /// active. Ends by requesting the first window.
    pub fn load_document(&self, handle: ContentHandle) -> Result<DocumentId, SessionError> {
        self.inner.load_document(handle)
    }

    /// Run [`load_document`](Self::load_document) on the loader thread
    pub fn load_document_in_background(
        &self,
        handle: ContentHandle,
    ) -> Result<TaskHandle<Result<DocumentId, SessionError>>, SessionError> {
        self.inner.ensure_running()?;
        let inner = Arc::clone(&self.inner);
        Ok(self.inner.loader.submit(move || inner.load_document(handle))?)
    }

    /// Drop the active document; the state returns to `NotLoaded`
    pub fn clear_document(&self) -> Result<(), SessionError> {
        self.inner.clear_document()
    }

    /// Request the window at `anchor`, or from the refresh key if `None`
    ///
    /// Never blocks on I/O. Without an active document this is a no-op and
    /// the state stays `NotLoaded`.
    pub fn request_window(&self, anchor: Option<PageIndex>) -> Result<(), SessionError> {
        let params = match anchor {
            Some(anchor) => LoadParams::jump(anchor, &self.inner.pager_config),
            None => LoadParams::refresh(&self.inner.pager_config),
        };
        self.inner.request(params)
    }

    /// Request a window with explicit parameters (append/prepend)
    pub fn request(&self, params: LoadParams) -> Result<(), SessionError> {
        self.inner.request(params)
    }

    /// Reload from the refresh key
    pub fn refresh(&self) -> Result<(), SessionError> {
        self.request_window(None)
    }

    /// Request the window containing `position`'s page
    pub fn jump_to(&self, position: ScrollPosition) -> Result<(), SessionError> {
        self.request_window(Some(position.page_index))
    }

    /// Load a window and wait for it
    ///
    /// Runs in order with queued requests and publishes the same state
    /// transitions.
    pub fn load_window_blocking(&self, params: LoadParams) -> Result<Arc<PageBatch>, SessionError> {
        self.inner.load_window_blocking(params)
    }

    /// Persist the scroll position without waiting for the write
    ///
    /// The most recent call wins; writes issued for a previous document are
    /// dropped.
    pub fn persist_scroll(&self, page_index: u32, page_offset: u32) -> Result<(), SessionError> {
        self.inner.persist_scroll(ScrollPosition::new(page_index, page_offset))
    }

    /// Cancel outstanding work, finish queued writes and stop all threads
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("document", &self.document())
            .field("state", &self.state().name())
            .finish()
    }
}

struct SessionInner {
    config: RoadbookConfig,
    pager_config: PagerConfig,
    sources: SourceFactory,
    importer: Arc<dyn ContentImportSource>,
    store: Arc<dyn KeyValueStore>,
    ledger: ScrollLedger,
    cache: Arc<RenderCache>,
    pool: Arc<IoPool>,
    loader: SerialExecutor,
    hub: StateHub,
    load_lock: Mutex<()>,
    scroll: Mutex<ScrollWrites>,
    active: RwLock<Option<ActiveDocument>>,
    pending: Mutex<HashSet<WindowRequest>>,
    shut_down: AtomicBool,
}

impl SessionInner {
    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(SessionError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn active_identity(&self) -> Option<DocumentId> {
        self.active.read().as_ref().map(|doc| doc.identity.clone())
    }

    /// A fresh page source with `identity` open
    fn open_source(&self, identity: &DocumentId) -> Result<SharedSource, OpenError> {
        let mut source = (self.sources)();
        source.open(identity)?;
        Ok(Arc::from(source))
    }

    fn load_document(self: &Arc<Self>, handle: ContentHandle) -> Result<DocumentId, SessionError> {
        self.ensure_running()?;
        let _load = self.load_lock.lock();

        let identity = self.importer.import(handle)?;
        let previous = self.active_identity();

        let source = match self.open_source(&identity) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "failed to open document");
                self.discard_import(&identity, previous.as_ref());
                return Err(err.into());
            }
        };

        let mut scroll = self.scroll.lock();
        let mut ops = vec![StoreOp::set_string(keys::DOCUMENT_URI, identity.as_str())];
        ops.extend(ScrollPosition::ORIGIN.store_ops());
        if let Err(err) = self.store.apply(&ops) {
            drop(scroll);
            tracing::warn!(identity = %identity, error = %err, "failed to persist document switch");
            self.discard_import(&identity, previous.as_ref());
            return Err(err.into());
        }

        let (generation, page_count) = self.activate(&mut scroll, identity.clone(), source);
        drop(scroll);

        if let Some(old) = previous.filter(|old| *old != identity) {
            self.importer.discard(&old);
        }
        tracing::info!(identity = %identity, pages = page_count, generation, "loaded document");

        // The switch is committed; a lost first request must not undo it.
        if let Err(error) = self.request(LoadParams::refresh(&self.pager_config)) {
            tracing::warn!(identity = %identity, %error, "failed to request first window");
        }
        Ok(identity)
    }

    fn restore(self: &Arc<Self>) -> Result<Option<DocumentId>, SessionError> {
        self.ensure_running()?;
        let _load = self.load_lock.lock();

        if let Some(identity) = self.active_identity() {
            return Ok(Some(identity));
        }
        let Some(uri) = self.store.get_string(keys::DOCUMENT_URI) else {
            return Ok(None);
        };
        let identity = DocumentId::new(uri);

        let source = match self.open_source(&identity) {
            Ok(source) => source,
            Err(OpenError::NotFound(_)) => {
                tracing::warn!(identity = %identity, "persisted document is gone, clearing it");
                let _scroll = self.scroll.lock();
                let mut ops = vec![StoreOp::remove(keys::DOCUMENT_URI)];
                ops.extend(ScrollPosition::ORIGIN.store_ops());
                if let Err(err) = self.store.apply(&ops) {
                    tracing::warn!(error = %err, "failed to clear persisted document");
                }
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "failed to reopen persisted document");
                return Err(err.into());
            }
        };

        let mut scroll = self.scroll.lock();
        let position = self.ledger.get();
        let (generation, page_count) = self.activate(&mut scroll, identity.clone(), source);
        drop(scroll);

        tracing::info!(
            identity = %identity,
            pages = page_count,
            generation,
            page = position.page_index,
            "restored document"
        );

        let anchor = position.page_index.min(page_count.saturating_sub(1));
        if let Err(error) = self.request(LoadParams::jump(anchor, &self.pager_config)) {
            tracing::warn!(identity = %identity, %error, "failed to request restored window");
        }
        Ok(Some(identity))
    }

    fn clear_document(&self) -> Result<(), SessionError> {
        self.ensure_running()?;
        let _load = self.load_lock.lock();

        let mut scroll = self.scroll.lock();
        let mut ops = vec![StoreOp::remove(keys::DOCUMENT_URI)];
        ops.extend(ScrollPosition::ORIGIN.store_ops());
        self.store.apply(&ops)?;

        scroll.generation = self.cache.invalidate();

        let previous = {
            let mut active = self.active.write();
            let previous = active.take();
            if let Some(doc) = &previous {
                doc.token.cancel();
            }
            self.hub.publish(LoadState::NotLoaded);
            previous
        };
        drop(scroll);

        if let Some(doc) = previous {
            self.importer.discard(&doc.identity);
            tracing::info!(identity = %doc.identity, "cleared document");
        }
        Ok(())
    }

    /// Switch to a freshly opened document
    ///
    /// Caller holds the scroll lock. Returns the new generation and the
    /// document's page count.
    fn activate(
        &self,
        scroll: &mut ScrollWrites,
        identity: DocumentId,
        source: SharedSource,
    ) -> (Epoch, u32) {
        let generation = self.cache.invalidate();
        scroll.generation = generation;

        let token = CancellationToken::new();
        let pager = WindowedPager::new(
            self.pager_config,
            source,
            Arc::clone(&self.cache),
            Arc::clone(&self.pool),
            token.clone(),
        )
        .with_io_timeout(self.config.io_timeout);
        let page_count = pager.page_count();

        let mut active = self.active.write();
        let document = ActiveDocument { identity, generation, token, pager: Arc::new(pager) };
        if let Some(old) = active.replace(document) {
            old.token.cancel();
        }
        self.hub.publish(LoadState::Loading { anchor: None });
        (generation, page_count)
    }

    fn discard_import(&self, identity: &DocumentId, previous: Option<&DocumentId>) {
        if previous != Some(identity) {
            self.importer.discard(identity);
        }
    }

    fn current_pager(&self) -> Option<(Epoch, Arc<WindowedPager>)> {
        self.active.read().as_ref().map(|doc| (doc.generation, Arc::clone(&doc.pager)))
    }

    fn request(self: &Arc<Self>, params: LoadParams) -> Result<(), SessionError> {
        self.ensure_running()?;
        let Some((generation, pager)) = self.current_pager() else {
            tracing::debug!("no document loaded, ignoring window request");
            return Ok(());
        };

        let request = WindowRequest { generation, params };
        if !self.pending.lock().insert(request) {
            tracing::debug!(generation, anchor = ?params.key, "coalesced duplicate window request");
            return Ok(());
        }

        let inner = Arc::clone(self);
        let queued = self.loader.execute(move || {
            inner.run_window(request, &pager);
            inner.pending.lock().remove(&request);
        });
        if let Err(err) = queued {
            self.pending.lock().remove(&request);
            return Err(err.into());
        }
        Ok(())
    }

    fn load_window_blocking(
        self: &Arc<Self>,
        params: LoadParams,
    ) -> Result<Arc<PageBatch>, SessionError> {
        self.ensure_running()?;
        let (generation, pager) = self.current_pager().ok_or(SessionError::NoDocument)?;
        let request = WindowRequest { generation, params };

        let outcome = if self.loader.is_current() {
            self.run_window(request, &pager)
        } else {
            let inner = Arc::clone(self);
            self.loader
                .submit(move || inner.run_window(request, &pager))?
                .join()
                .map_err(|err| {
                    PageError::from_wait(params.position(), self.config.io_timeout, err)
                })?
        };

        match outcome {
            Some(result) => Ok(result?),
            None => Err(PageError::Cancelled.into()),
        }
    }

    /// Load one window and publish the outcome, unless superseded
    ///
    /// Returns `None` if the request was dropped before it started.
    fn run_window(
        &self,
        request: WindowRequest,
        pager: &WindowedPager,
    ) -> Option<Result<Arc<PageBatch>, PageError>> {
        let generation = request.generation;
        let anchor = request.params.key;

        if !self.publish_if_current(generation, LoadState::Loading { anchor }) {
            tracing::debug!(generation, anchor = ?anchor, "dropped superseded window request");
            return None;
        }

        let result = pager.load(request.params).map(Arc::new);
        match &result {
            Ok(batch) => {
                tracing::debug!(generation, pages = batch.len(), "window loaded");
                self.publish_if_current(generation, LoadState::Loaded { batch: Arc::clone(batch) });
            }
            Err(PageError::Cancelled) => {
                tracing::debug!(generation, anchor = ?anchor, "window load cancelled");
            }
            Err(err) => {
                tracing::warn!(generation, anchor = ?anchor, error = %err, "window load failed");
                self.publish_if_current(
                    generation,
                    LoadState::Error { anchor, kind: err.kind(), message: err.to_string() },
                );
            }
        }
        Some(result)
    }

    fn publish_if_current(&self, generation: Epoch, state: LoadState) -> bool {
        let active = self.active.read();
        match &*active {
            Some(doc) if doc.generation == generation => self.hub.publish(state),
            _ => false,
        }
    }

    fn persist_scroll(self: &Arc<Self>, position: ScrollPosition) -> Result<(), SessionError> {
        self.ensure_running()?;
        let (sequence, generation) = {
            let mut scroll = self.scroll.lock();
            scroll.issued += 1;
            (scroll.issued, scroll.generation)
        };

        let inner = Arc::clone(self);
        self.pool.execute(move || inner.write_scroll(sequence, generation, position))?;
        Ok(())
    }

    fn write_scroll(&self, sequence: u64, generation: Epoch, position: ScrollPosition) {
        let mut scroll = self.scroll.lock();
        if scroll.generation != generation || sequence <= scroll.written {
            tracing::debug!(sequence, generation, "dropped stale scroll write");
            return;
        }

        for attempt in 1..=2 {
            match self.ledger.set(position) {
                Ok(()) => {
                    scroll.written = sequence;
                    tracing::trace!(
                        page = position.page_index,
                        offset = position.page_offset,
                        "persisted scroll position"
                    );
                    return;
                }
                Err(error) if attempt == 1 => {
                    tracing::warn!(%error, "scroll write failed, retrying");
                }
                Err(error) => {
                    tracing::error!(%error, page = position.page_index, "scroll write failed");
                }
            }
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(doc) = &*self.active.read() {
            doc.token.cancel();
        }
        self.loader.shutdown();
        self.pool.shutdown();
        tracing::debug!("session shut down");
    }
}
