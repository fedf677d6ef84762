//! Concurrent graph traversals and copy-on-write transforms
//!
//! Both directions run the same scheduler: each node carries an atomic
//! count of unfinished blockers (down-edge targets for bottom-up, up-edge
//! sources for top-down) and a FIFO ready queue feeds a fixed-size worker
//! pool. Completing a node decrements its dependents' counters; a counter
//! reaching zero enqueues that node. For any edge `a -> b`, the visit of
//! `b` completes before the visit of `a` begins; unrelated siblings run
//! concurrently in any order.

use crate::graph::Graph;
use crate::id::NodeId;
use log::debug;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

/// How long a starved worker sleeps before rechecking for cancellation
const WAKE_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation for traversals and resource operations
///
/// Cloning shares the token. Once triggered it stays triggered: no new
/// nodes start, in-flight visits complete naturally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options shared by every traversal
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Worker pool size; 1 forces serial execution
    pub concurrency: usize,
    /// Cancellation token checked before each node starts
    pub cancel: CancelToken,
}

impl WalkOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Self::default()
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(1, |n| n.get()),
            cancel: CancelToken::new(),
        }
    }
}

/// Aggregate failure of a traversal
///
/// Visitor errors are collected per node rather than aborting the run;
/// sibling subgraphs keep going. `cancelled` marks a cooperative shutdown
/// and `stalled` an engine invariant violation (unvisitable nodes).
#[derive(Debug)]
pub struct TraversalError {
    pub errors: Vec<(NodeId, anyhow::Error)>,
    pub cancelled: bool,
    pub stalled: bool,
}

impl TraversalError {
    /// Find a graph-level error recorded for any node
    pub fn graph_error(&self) -> Option<&crate::Error> {
        self.errors
            .iter()
            .find_map(|(_, e)| e.downcast_ref::<crate::Error>())
    }
}

impl fmt::Display for TraversalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled {
            write!(f, "traversal cancelled")?;
        } else if self.stalled {
            write!(f, "traversal stalled: graph has unvisitable nodes")?;
        } else {
            write!(f, "traversal failed")?;
        }
        for (id, err) in &self.errors {
            write!(f, "\n  {id}: {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TraversalError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    BottomUp,
    TopDown,
}

/// Read access to already-visited nodes' derived values during a transform
///
/// The ordering guarantee makes these reads race-free: a visitor may read
/// any node it has an edge to, because that node has already completed.
pub struct TransformView<W> {
    done: RwLock<BTreeMap<NodeId, Arc<W>>>,
}

impl<W> TransformView<W> {
    fn new() -> Self {
        Self {
            done: RwLock::new(BTreeMap::new()),
        }
    }

    /// The derived value of a completed node, if any
    pub fn get(&self, id: &NodeId) -> Option<Arc<W>> {
        self.done.read().expect("transform view poisoned").get(id).cloned()
    }

    fn insert(&self, id: NodeId, value: Arc<W>) {
        self.done.write().expect("transform view poisoned").insert(id, value);
    }

    fn into_inner(self) -> BTreeMap<NodeId, Arc<W>> {
        self.done.into_inner().expect("transform view poisoned")
    }
}

/// The outcome of one transform visit: the node's derived value plus any
/// dependency edges to add from the visited node
pub struct Transformed<W> {
    value: Arc<W>,
    deps: Vec<NodeId>,
}

impl<W> Transformed<W> {
    /// Derive a new value
    pub fn new(value: W) -> Self {
        Self::shared(Arc::new(value))
    }

    /// Keep or pass along an already-shared value
    pub fn shared(value: Arc<W>) -> Self {
        Self {
            value,
            deps: Vec::new(),
        }
    }

    /// Request dependency edges from the visited node to each target
    pub fn with_deps(mut self, deps: Vec<NodeId>) -> Self {
        self.deps = deps;
        self
    }
}

struct Scheduler {
    ready: Mutex<VecDeque<NodeId>>,
    wake: Condvar,
    blockers: HashMap<NodeId, AtomicUsize>,
    dependents: HashMap<NodeId, Vec<NodeId>>,
    outstanding: AtomicUsize,
    in_flight: AtomicUsize,
    stalled: AtomicBool,
}

impl Scheduler {
    fn build<V>(g: &Graph<V>, dir: Direction) -> Self {
        let mut blockers = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut ready = VecDeque::new();

        for id in g.ids() {
            let blocking = match dir {
                Direction::BottomUp => g.down_edges(&id),
                Direction::TopDown => g.up_edges(&id),
            };
            if blocking.is_empty() {
                ready.push_back(id.clone());
            }
            for blocker in &blocking {
                dependents.entry(blocker.clone()).or_default().push(id.clone());
            }
            blockers.insert(id, AtomicUsize::new(blocking.len()));
        }

        Self {
            outstanding: AtomicUsize::new(blockers.len()),
            ready: Mutex::new(ready),
            wake: Condvar::new(),
            blockers,
            dependents,
            in_flight: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
        }
    }

    /// Pop the next ready node, or `None` when the traversal is over
    fn next(&self, cancel: &CancelToken) -> Option<NodeId> {
        let mut queue = self.ready.lock().expect("ready queue poisoned");
        loop {
            if cancel.is_cancelled()
                || self.stalled.load(Ordering::SeqCst)
                || self.outstanding.load(Ordering::SeqCst) == 0
            {
                return None;
            }
            if let Some(id) = queue.pop_front() {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                return Some(id);
            }
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                // Nothing running and nothing ready: unvisitable nodes.
                self.stalled.store(true, Ordering::SeqCst);
                self.wake.notify_all();
                return None;
            }
            let (q, _) = self
                .wake
                .wait_timeout(queue, WAKE_INTERVAL)
                .expect("ready queue poisoned");
            queue = q;
        }
    }

    /// Mark a node complete and enqueue any dependents it unblocked
    fn complete(&self, id: &NodeId) {
        let mut unblocked = Vec::new();
        for dependent in self.dependents.get(id).map_or(&[][..], Vec::as_slice) {
            let was = self.blockers[dependent].fetch_sub(1, Ordering::SeqCst);
            if was == 1 {
                unblocked.push(dependent.clone());
            }
        }

        let mut queue = self.ready.lock().expect("ready queue poisoned");
        queue.extend(unblocked);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.wake.notify_all();
    }
}

fn run<V, F>(
    g: &Graph<V>,
    dir: Direction,
    opts: &WalkOptions,
    visit: F,
) -> Result<(), TraversalError>
where
    V: Send + Sync,
    F: Fn(&NodeId, &Arc<V>) -> anyhow::Result<()> + Send + Sync,
{
    let sched = Scheduler::build(g, dir);
    let errors: Mutex<Vec<(NodeId, anyhow::Error)>> = Mutex::new(Vec::new());
    let workers = opts.concurrency.max(1).min(g.len().max(1));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| TraversalError {
            errors: vec![(NodeId::root(), anyhow::anyhow!("worker pool: {e}"))],
            cancelled: false,
            stalled: false,
        })?;

    pool.scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                while let Some(id) = sched.next(&opts.cancel) {
                    match g.value(&id) {
                        Some(value) => {
                            if let Err(err) = visit(&id, &value) {
                                debug!("visit failed at {id}: {err:#}");
                                errors
                                    .lock()
                                    .expect("error sink poisoned")
                                    .push((id.clone(), err));
                            }
                        }
                        None => {
                            errors.lock().expect("error sink poisoned").push((
                                id.clone(),
                                anyhow::anyhow!("node disappeared during traversal"),
                            ));
                        }
                    }
                    sched.complete(&id);
                }
            });
        }
    });

    let errors = errors.into_inner().expect("error sink poisoned");
    let cancelled = opts.cancel.is_cancelled();
    let stalled = sched.stalled.load(Ordering::SeqCst);
    if errors.is_empty() && !cancelled && !stalled {
        Ok(())
    } else {
        Err(TraversalError {
            errors,
            cancelled,
            stalled,
        })
    }
}

impl<V: Send + Sync> Graph<V> {
    /// Read-only bottom-up visit: children and dependencies before parents
    /// and dependents
    pub fn walk<F>(&self, opts: &WalkOptions, f: F) -> Result<(), TraversalError>
    where
        F: Fn(&NodeId, &V) -> anyhow::Result<()> + Send + Sync,
    {
        run(self, Direction::BottomUp, opts, |id, value| f(id, value.as_ref()))
    }

    /// Read-only top-down visit: the mirror order of [`Graph::walk`]
    pub fn root_first_walk<F>(&self, opts: &WalkOptions, f: F) -> Result<(), TraversalError>
    where
        F: Fn(&NodeId, &V) -> anyhow::Result<()> + Send + Sync,
    {
        run(self, Direction::TopDown, opts, |id, value| f(id, value.as_ref()))
    }

    /// Bottom-up copy-on-write transform producing a new graph
    ///
    /// The visitor derives each node's new value and may request dependency
    /// edges from the visited node. It may read any completed node's new
    /// value through the [`TransformView`]; the ordering guarantee makes
    /// those reads safe. Edges are applied after the traversal in sorted
    /// order, so the result is deterministic; an edge that would close a
    /// cycle fails the whole transform and no graph is produced.
    pub fn transform<W, F>(&self, opts: &WalkOptions, f: F) -> Result<Graph<W>, TraversalError>
    where
        W: Send + Sync,
        F: Fn(&NodeId, &Arc<V>, &TransformView<W>) -> anyhow::Result<Transformed<W>> + Send + Sync,
    {
        self.transform_in(Direction::BottomUp, opts, f)
    }

    /// Top-down copy-on-write transform: the mirror of [`Graph::transform`]
    pub fn root_first_transform<W, F>(
        &self,
        opts: &WalkOptions,
        f: F,
    ) -> Result<Graph<W>, TraversalError>
    where
        W: Send + Sync,
        F: Fn(&NodeId, &Arc<V>, &TransformView<W>) -> anyhow::Result<Transformed<W>> + Send + Sync,
    {
        self.transform_in(Direction::TopDown, opts, f)
    }

    fn transform_in<W, F>(
        &self,
        dir: Direction,
        opts: &WalkOptions,
        f: F,
    ) -> Result<Graph<W>, TraversalError>
    where
        W: Send + Sync,
        F: Fn(&NodeId, &Arc<V>, &TransformView<W>) -> anyhow::Result<Transformed<W>> + Send + Sync,
    {
        let view = TransformView::new();
        let requested: Mutex<Vec<(NodeId, NodeId)>> = Mutex::new(Vec::new());

        run(self, dir, opts, |id, value| {
            let out = f(id, value, &view)?;
            if !out.deps.is_empty() {
                let mut edges = requested.lock().expect("edge sink poisoned");
                for dep in out.deps {
                    edges.push((id.clone(), dep));
                }
            }
            view.insert(id.clone(), out.value);
            Ok(())
        })?;

        let mut next = self.with_values(view.into_inner());
        let mut edges = requested.into_inner().expect("edge sink poisoned");
        edges.sort();
        edges.dedup();

        let mut errors = Vec::new();
        for (from, to) in edges {
            match next.connect(&from, &to) {
                Ok(()) | Err(crate::Error::DuplicateEdge { .. }) => {}
                Err(err) => errors.push((from.clone(), anyhow::Error::new(err))),
            }
        }
        if errors.is_empty() {
            Ok(next)
        } else {
            Err(TraversalError {
                errors,
                cancelled: false,
                stalled: false,
            })
        }
    }
}
