//! Background population of a node table from a generator.
//!
//! Generator streams are drained on a bounded rayon pool. Workers never
//! touch the table: they send batches over a crossbeam channel to a single
//! writer thread, the only place nodes are inserted, so racing expansions
//! commit in a strict order and the first committed node of a key wins
//! deduplication. Readers hold the session lock only for one lookup.
//!
//! Every job, commit and expansion message carries the table generation it
//! was issued for; anything from an older generation is dropped on arrival.

use std::collections::HashMap;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, debug_span, info, instrument, trace, warn};

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::events::{row_ranges, EventBus, TreeEvent};
use crate::domain::{
    EntityKey, GeneratorError, Item, NodeId, NodeState, NodeTable, TableOptions, TreeGenerator,
};

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Sizing of the worker pool and commit batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationOptions {
    /// Worker threads; 0 lets rayon pick one per CPU
    pub workers: usize,
    pub batch_size: usize,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// The table together with the generator that fills it.
pub(crate) struct Session {
    pub(crate) table: NodeTable,
    pub(crate) generator: Option<Arc<dyn TreeGenerator>>,
    pub(crate) title: Option<String>,
}

/// One top-level population and everything it triggered.
#[derive(Debug)]
struct Request {
    id: u64,
    generation: u64,
    cancelled: AtomicBool,
}

impl Request {
    fn new(id: u64, generation: u64) -> Self {
        Self {
            id,
            generation,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Expansions only join a live request of their own generation.
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.is_cancelled()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Count of queued expansions, running drains and name lookups.
#[derive(Debug, Default)]
struct Activity {
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Activity {
    fn enter(&self) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn leave(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (pending, _) = self
            .idle
            .wait_timeout_while(pending, timeout, |p| *p > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *pending == 0
    }
}

struct Shared {
    session: RwLock<Session>,
    current: Mutex<Option<Arc<Request>>>,
    activity: Activity,
    events: EventBus,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take and cancel the current request. Lock order is session, then current.
    fn cancel_current(&self) -> bool {
        let request = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match request {
            Some(request) => {
                request.cancel();
                debug!(request = request.id, "cancelled request");
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
enum DrainOutcome {
    Completed,
    Cancelled,
    Failed(GeneratorError),
}

struct Commit {
    generation: u64,
    node: NodeId,
    request: Arc<Request>,
    items: Vec<Item>,
    /// Set on the last commit of a drain
    outcome: Option<DrainOutcome>,
}

enum Mutation {
    Expand {
        generation: u64,
        node: NodeId,
        depth: usize,
    },
    Commit(Commit),
    Named {
        generation: u64,
        name: String,
    },
    Shutdown,
}

/// Work item for one node's stream.
struct Job {
    generation: u64,
    node: NodeId,
    key: EntityKey,
    is_root: bool,
    /// Items already present from a cancelled earlier drain
    skip: usize,
    request: Arc<Request>,
    generator: Arc<dyn TreeGenerator>,
}

impl Job {
    fn commit(&self, items: Vec<Item>, outcome: Option<DrainOutcome>) -> Commit {
        Commit {
            generation: self.generation,
            node: self.node,
            request: Arc::clone(&self.request),
            items,
            outcome,
        }
    }
}

/// Drives generators into the shared table.
pub struct Population {
    shared: Arc<Shared>,
    mutations: Sender<Mutation>,
    writer: Option<JoinHandle<()>>,
}

impl Population {
    pub fn new(options: PopulationOptions) -> ApplicationResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|i| format!("lazytree-worker-{}", i))
            .build()
            .map_err(ApplicationError::ThreadPool)?;

        let shared = Arc::new(Shared {
            session: RwLock::new(Session {
                table: NodeTable::default(),
                generator: None,
                title: None,
            }),
            current: Mutex::new(None),
            activity: Activity::default(),
            events: EventBus::new(),
        });

        let (sender, receiver) = unbounded();
        let writer = Writer {
            shared: Arc::clone(&shared),
            pool,
            sender: sender.clone(),
            receiver,
            batch_size: options.batch_size.max(1),
            depths: HashMap::new(),
            depth_generation: 0,
            outstanding: HashMap::new(),
            next_request: 1,
            named_generation: None,
        };
        let handle = thread::Builder::new()
            .name("lazytree-writer".to_string())
            .spawn(move || writer.run())
            .map_err(ApplicationError::Writer)?;

        info!(
            workers = options.workers,
            batch_size = options.batch_size,
            "population started"
        );
        Ok(Self {
            shared,
            mutations: sender,
            writer: Some(handle),
        })
    }

    pub(crate) fn session(&self) -> RwLockReadGuard<'_, Session> {
        self.shared.read()
    }

    pub fn generation(&self) -> u64 {
        self.shared.read().table.generation()
    }

    /// Replace the table with a fresh one fed by `generator` and start the
    /// initial expansion.
    #[instrument(level = "debug", skip_all)]
    pub fn install(&self, generator: Arc<dyn TreeGenerator>) -> u64 {
        let depth = generator.initial_expansion_depth();
        let (generation, root) = {
            let mut session = self.shared.write();
            self.shared.cancel_current();
            session.table.reconfigure(TableOptions {
                deduplicate: generator.enable_deduplication(),
                sort_column: generator.sort_column(),
            });
            session.generator = Some(generator);
            session.title = None;
            (session.table.generation(), session.table.root())
        };
        info!(generation, depth, "installed generator");
        self.shared.events.emit(TreeEvent::ModelReset { generation });
        self.expand(generation, root, depth);
        generation
    }

    /// Replace the table with a fully built one (e.g. from a path builder).
    #[instrument(level = "debug", skip_all)]
    pub fn install_table(&self, mut table: NodeTable) -> u64 {
        let generation = {
            let mut session = self.shared.write();
            self.shared.cancel_current();
            table.succeed(session.table.generation());
            let generation = table.generation();
            session.table = table;
            session.generator = None;
            session.title = None;
            generation
        };
        info!(generation, "installed prebuilt table");
        self.shared.events.emit(TreeEvent::ModelReset { generation });
        generation
    }

    /// Drop all nodes but the root; the generator stays installed.
    pub fn reset(&self) -> u64 {
        let generation = {
            let mut session = self.shared.write();
            self.shared.cancel_current();
            let options = session.table.options();
            session.table.reconfigure(options);
            session.title = None;
            session.table.generation()
        };
        debug!(generation, "reset table");
        self.shared.events.emit(TreeEvent::ModelReset { generation });
        generation
    }

    /// Queue expansion of `node` to `depth` levels. Returns immediately.
    pub fn expand(&self, generation: u64, node: NodeId, depth: usize) {
        if depth == 0 {
            return;
        }
        self.shared.activity.enter();
        let queued = self.mutations.send(Mutation::Expand {
            generation,
            node,
            depth,
        });
        if queued.is_err() {
            self.shared.activity.leave();
        }
    }

    /// Cancel the running top-level population, if any.
    pub fn cancel_running_request(&self) -> bool {
        self.shared.cancel_current()
    }

    /// Block until nothing is queued or draining. False on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.shared.activity.wait_idle(timeout)
    }

    pub fn subscribe(&self) -> Receiver<TreeEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for Population {
    fn drop(&mut self) {
        self.cancel_running_request();
        let _ = self.mutations.send(Mutation::Shutdown);
        if let Some(handle) = self.writer.take() {
            if handle.join().is_err() {
                warn!("writer thread panicked");
            }
        }
    }
}

/// The single mutation context.
struct Writer {
    shared: Arc<Shared>,
    pool: ThreadPool,
    sender: Sender<Mutation>,
    receiver: Receiver<Mutation>,
    batch_size: usize,
    /// Remaining expansion depth of nodes being drained
    depths: HashMap<NodeId, usize>,
    depth_generation: u64,
    /// Running jobs per request
    outstanding: HashMap<u64, usize>,
    next_request: u64,
    named_generation: Option<u64>,
}

impl Writer {
    fn run(mut self) {
        debug!("writer running");
        while let Ok(mutation) = self.receiver.recv() {
            match mutation {
                Mutation::Expand {
                    generation,
                    node,
                    depth,
                } => {
                    self.handle_expand(generation, node, depth);
                    self.shared.activity.leave();
                }
                Mutation::Commit(commit) => self.handle_commit(commit),
                Mutation::Named { generation, name } => {
                    self.handle_named(generation, name);
                    self.shared.activity.leave();
                }
                Mutation::Shutdown => break,
            }
        }
        debug!("writer stopped");
    }

    fn sync_generation(&mut self, generation: u64) {
        if self.depth_generation != generation {
            self.depths.clear();
            self.depth_generation = generation;
        }
    }

    fn handle_expand(&mut self, generation: u64, node: NodeId, depth: usize) {
        let mut jobs = Vec::new();
        let mut events = Vec::new();
        let shared = Arc::clone(&self.shared);
        let request = {
            let mut session = shared.write();
            if session.table.generation() != generation {
                debug!(generation, %node, "ignoring expansion for stale generation");
                return;
            }
            self.sync_generation(generation);
            let request = self.request_for_expansion(generation);
            self.expand_locked(
                &mut session,
                &request,
                generation,
                node,
                depth,
                &mut jobs,
                &mut events,
            );
            request
        };
        self.spawn_all(jobs);
        self.shared.events.emit_all(events);
        self.finish_if_idle(&request);
    }

    /// Join the running request or start a new one.
    fn request_for_expansion(&mut self, generation: u64) -> Arc<Request> {
        let mut current = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(request) if request.accepts(generation) => return Arc::clone(request),
            Some(request) => request.cancel(),
            None => {}
        }
        let request = Arc::new(Request::new(self.next_request, generation));
        self.next_request += 1;
        self.outstanding.insert(request.id, 0);
        *current = Some(Arc::clone(&request));
        debug!(request = request.id, "request started");
        self.shared
            .events
            .emit(TreeEvent::RequestStarted { request: request.id });
        request
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_locked(
        &mut self,
        session: &mut Session,
        request: &Arc<Request>,
        generation: u64,
        node: NodeId,
        depth: usize,
        jobs: &mut Vec<Job>,
        events: &mut Vec<TreeEvent>,
    ) {
        if depth == 0 {
            return;
        }
        let Some(entry) = session.table.get(node) else {
            return;
        };
        if entry.is_duplicate() {
            return;
        }
        let state = entry.state();
        let children = entry.children().to_vec();
        let key = entry.item().key.clone();

        match state {
            NodeState::NotStarted | NodeState::Cancelled => {
                let Some(generator) = session.generator.clone() else {
                    return;
                };
                if request.is_cancelled() {
                    return;
                }
                session.table.set_state(node, NodeState::InProgress);
                self.depths.insert(node, depth);
                events.push(TreeEvent::NodeStateChanged {
                    generation,
                    node,
                    state: NodeState::InProgress,
                });
                jobs.push(Job {
                    generation,
                    node,
                    key,
                    is_root: node == session.table.root(),
                    skip: children.len(),
                    request: Arc::clone(request),
                    generator,
                });
                // rows kept from a cancelled drain
                for child in children {
                    self.expand_locked(session, request, generation, child, depth - 1, jobs, events);
                }
            }
            NodeState::InProgress => {
                let pending = self.depths.get(&node).copied().unwrap_or(0);
                if depth > pending {
                    self.depths.insert(node, depth);
                    for child in children {
                        self.expand_locked(
                            session,
                            request,
                            generation,
                            child,
                            depth - 1,
                            jobs,
                            events,
                        );
                    }
                }
            }
            NodeState::Done => {
                for child in children {
                    self.expand_locked(session, request, generation, child, depth - 1, jobs, events);
                }
            }
        }
    }

    fn spawn_all(&mut self, jobs: Vec<Job>) {
        for job in jobs {
            *self.outstanding.entry(job.request.id).or_insert(0) += 1;
            self.shared.activity.enter();
            let sender = self.sender.clone();
            let batch_size = self.batch_size;
            trace!(node = %job.node, skip = job.skip, "spawning drain");
            self.pool.spawn(move || drain(job, &sender, batch_size));
        }
    }

    fn handle_commit(&mut self, commit: Commit) {
        let Commit {
            generation,
            node,
            request,
            items,
            outcome,
        } = commit;
        let finished = outcome.is_some();
        let mut jobs = Vec::new();
        let mut events = Vec::new();
        let shared = Arc::clone(&self.shared);
        {
            let mut session = shared.write();
            if session.table.generation() == generation {
                self.sync_generation(generation);
                self.apply_commit(
                    &mut session,
                    &request,
                    (generation, node),
                    items,
                    outcome,
                    &mut jobs,
                    &mut events,
                );
            } else {
                trace!(generation, %node, "discarding stale result");
            }
        }
        self.spawn_all(jobs);
        self.shared.events.emit_all(events);
        if finished {
            self.job_finished(&request);
            self.shared.activity.leave();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_commit(
        &mut self,
        session: &mut Session,
        request: &Arc<Request>,
        (generation, node): (u64, NodeId),
        items: Vec<Item>,
        outcome: Option<DrainOutcome>,
        jobs: &mut Vec<Job>,
        events: &mut Vec<TreeEvent>,
    ) {
        let depth = self.depths.get(&node).copied().unwrap_or(0);
        let mut rows = Vec::with_capacity(items.len());
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            match session.table.insert_with_row(node, item) {
                Ok((id, row)) => {
                    rows.push(row);
                    inserted.push(id);
                }
                Err(error) => {
                    warn!(%node, %error, "dropping rest of batch");
                    break;
                }
            }
        }
        for (first, last) in row_ranges(&rows) {
            events.push(TreeEvent::RowsInserted {
                generation,
                parent: node,
                first,
                last,
            });
        }

        if depth > 1 && !request.is_cancelled() {
            for id in inserted {
                self.expand_locked(session, request, generation, id, depth - 1, jobs, events);
            }
        }

        if let Some(outcome) = outcome {
            self.depths.remove(&node);
            let state = match outcome {
                DrainOutcome::Completed => NodeState::Done,
                DrainOutcome::Cancelled => NodeState::Cancelled,
                DrainOutcome::Failed(error) => {
                    session.table.mark_failed(node, error.message);
                    NodeState::Done
                }
            };
            if session.table.set_state(node, state) {
                events.push(TreeEvent::NodeStateChanged {
                    generation,
                    node,
                    state,
                });
            }
        }
    }

    fn job_finished(&mut self, request: &Arc<Request>) {
        if let Some(count) = self.outstanding.get_mut(&request.id) {
            *count = count.saturating_sub(1);
        }
        self.finish_if_idle(request);
    }

    fn finish_if_idle(&mut self, request: &Arc<Request>) {
        if self.outstanding.get(&request.id).copied().unwrap_or(0) > 0 {
            return;
        }
        if self.outstanding.remove(&request.id).is_none() {
            return;
        }
        {
            let mut current = self
                .shared
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, request)) {
                *current = None;
            }
        }
        let cancelled = request.is_cancelled();
        debug!(request = request.id, cancelled, "request finished");
        self.shared.events.emit(TreeEvent::RequestFinished {
            request: request.id,
            cancelled,
        });
        if !cancelled {
            self.resolve_name();
        }
    }

    /// Ask the generator for its name once per generation, off this thread.
    fn resolve_name(&mut self) {
        let (generation, generator) = {
            let session = self.shared.read();
            (session.table.generation(), session.generator.clone())
        };
        if self.named_generation == Some(generation) {
            return;
        }
        let Some(generator) = generator else {
            return;
        };
        self.named_generation = Some(generation);
        self.shared.activity.enter();
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let name = panic::catch_unwind(AssertUnwindSafe(|| generator.name()))
                .unwrap_or_else(|_| {
                    warn!("generator panicked while naming the tree");
                    String::new()
                });
            let _ = sender.send(Mutation::Named { generation, name });
        });
    }

    fn handle_named(&mut self, generation: u64, name: String) {
        {
            let mut session = self.shared.write();
            if session.table.generation() != generation {
                return;
            }
            session.title = Some(name.clone());
        }
        debug!(generation, %name, "tree name resolved");
        self.shared
            .events
            .emit(TreeEvent::TreeNameResolved { generation, name });
    }
}

/// Pull one node's stream on a worker and forward it in batches.
fn drain(job: Job, mutations: &Sender<Mutation>, batch_size: usize) {
    let span = debug_span!(
        "drain",
        node = %job.node,
        generation = job.generation,
        request = job.request.id
    );
    let _entered = span.enter();

    let mut batch = Vec::with_capacity(batch_size);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pull(&job, mutations, batch_size, &mut batch)
    }))
    .unwrap_or_else(|_| {
        warn!("generator panicked");
        DrainOutcome::Failed(GeneratorError::new("generator panicked"))
    });
    trace!(?outcome, "drain finished");

    let last = job.commit(mem::take(&mut batch), Some(outcome));
    if mutations.send(Mutation::Commit(last)).is_err() {
        debug!("writer gone, dropping drain result");
    }
}

/// Cancellation is checked before the first pull and after every item.
fn pull(
    job: &Job,
    mutations: &Sender<Mutation>,
    batch_size: usize,
    batch: &mut Vec<Item>,
) -> DrainOutcome {
    if job.request.is_cancelled() {
        return DrainOutcome::Cancelled;
    }
    let stream = if job.is_root {
        job.generator.roots()
    } else {
        job.generator.children(&job.key)
    };

    for next in stream.skip(job.skip) {
        if job.request.is_cancelled() {
            return DrainOutcome::Cancelled;
        }
        match next {
            Ok(item) => {
                batch.push(item);
                if batch.len() >= batch_size {
                    let items = mem::take(batch);
                    if mutations
                        .send(Mutation::Commit(job.commit(items, None)))
                        .is_err()
                    {
                        return DrainOutcome::Cancelled;
                    }
                }
            }
            Err(error) => {
                warn!(%error, "stream failed mid-drain");
                return DrainOutcome::Failed(error);
            }
        }
    }
    DrainOutcome::Completed
}
