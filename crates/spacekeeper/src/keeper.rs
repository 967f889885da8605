//! The space keeper itself: catalogs plots, provisions new ones, schedules
//! plotting strictly serially and answers challenge lookups in parallel.

mod planner;
mod plotter;

use crate::plot::{PlotBackendFactory, PlotError};
use crate::proof::{ProofReader, WorkSpaceProof};
use crate::proof_cache::ProofCache;
use crate::queue::{PlotterQueue, QueuedWorkSpace};
use crate::space_id::SpaceId;
use crate::utils::AbortingJoinHandle;
use crate::wallet::{PoCWallet, WalletError};
use crate::worker_pool::WorkerPool;
use crate::workspace::{Action, StateFlags, WorkSpace, WorkSpaceInfo, WorkSpaceState};
use crate::{MAX_POOL_WORKERS, PLOTTER_MAX_CHAN_SIZE, PROOF_CACHE_SIZE};
use parking_lot::{Mutex, RwLock};
use poc_primitives::{BitLength, Challenge};
use schnorrkel::Signature;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often the file watcher re-scans the data directories.
pub const FILE_WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Errors surfaced by the keeper's public operations.
#[derive(Debug, Error)]
pub enum SpaceKeeperError {
    /// Operation requires an unlocked wallet
    #[error("poc wallet is locked")]
    WalletIsLocked,
    /// Operation requires the keeper to be stopped
    #[error("spacekeeper is running")]
    IsRunning,
    /// Operation requires the keeper to be started
    #[error("spacekeeper is not running")]
    IsNotRunning,
    /// Another configuration is in progress
    #[error("spacekeeper is configuring")]
    IsConfiguring,
    /// Data directories cannot change once the index is seeded
    #[error("spacekeeper db dirs cannot be changed")]
    ChangeDbDirs,
    /// Configuration produced no work spaces
    #[error("spacekeeper configured nothing")]
    ConfiguredNothing,
    /// Work space is unknown or not part of the configured fleet
    #[error("work space does not exist")]
    WorkSpaceDoesNotExist,
    /// Verb targets the in-flight plot but another work space is plotting
    #[error("work space is not plotting")]
    WorkSpaceIsNotPlotting,
    /// Verb requires a still (`registered` or `ready`) work space
    #[error("work space is not still")]
    WorkSpaceIsNotStill,
    /// Generation of new work spaces is disabled
    #[error("work space cannot be generated")]
    WorkSpaceCannotGenerate,
    /// Size target is below the smallest usable plot
    #[error("configure size target is too small")]
    ConfigUnderSizeTarget,
    /// Disk requirement is negative
    #[error("invalid required bytes")]
    InvalidRequiredBytes,
    /// Primary data directory has too little free space
    #[error("os disk size is not enough")]
    OsDiskSizeNotEnough,
    /// Requested action is not a known verb
    #[error("invalid action")]
    InvalidAction,
    /// Requested action is known but not implemented
    #[error("unimplemented action")]
    UnimplementedAction,
    /// No data directories are configured
    #[error("no plot directories are configured")]
    NoPlotDirs,
    /// Wallet failure other than a locked wallet
    #[error("wallet error: {0}")]
    Wallet(WalletError),
    /// Plot backend failure outside of proof lookups
    #[error("plot error: {0}")]
    Plot(#[from] PlotError),
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Worker pool could not be built
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<WalletError> for SpaceKeeperError {
    fn from(error: WalletError) -> Self {
        match error {
            WalletError::Locked => Self::WalletIsLocked,
            other => Self::Wallet(other),
        }
    }
}

/// Messages handed from action verbs to the plotter loop.
#[derive(Debug)]
pub(crate) enum PlotterRequest {
    /// Schedule one plot job
    Plot(QueuedWorkSpace),
    /// Wake the loop so it observes the quit flag
    Exit,
}

/// Per-state buckets plus the `all` aggregate.
///
/// Every live work space sits in exactly one real-state bucket and in `all`;
/// buckets map the string form of the space id to the work space.
#[derive(Debug, Default)]
pub(crate) struct WorkSpaceIndex {
    buckets: [HashMap<String, Arc<WorkSpace>>; WorkSpaceState::COUNT],
    all: HashMap<String, Arc<WorkSpace>>,
}

impl WorkSpaceIndex {
    pub(crate) fn get_all(&self, sid: &str) -> Option<Arc<WorkSpace>> {
        self.all.get(sid).cloned()
    }

    pub(crate) fn get_in(&self, state: WorkSpaceState, sid: &str) -> Option<Arc<WorkSpace>> {
        self.buckets[state.rank() as usize].get(sid).cloned()
    }

    pub(crate) fn all_work_spaces(&self) -> impl Iterator<Item = &Arc<WorkSpace>> {
        self.all.values()
    }

    pub(crate) fn state_work_spaces(
        &self,
        state: WorkSpaceState,
    ) -> impl Iterator<Item = &Arc<WorkSpace>> {
        self.buckets[state.rank() as usize].values()
    }

    pub(crate) fn state_len(&self, state: WorkSpaceState) -> usize {
        self.buckets[state.rank() as usize].len()
    }

    /// Registers a work space under its current state; a second insert for
    /// the same id is ignored.
    pub(crate) fn insert(&mut self, ws: Arc<WorkSpace>) {
        let sid = ws.sid();
        if self.all.contains_key(&sid) {
            return;
        }
        self.buckets[ws.state().rank() as usize].insert(sid.clone(), Arc::clone(&ws));
        self.all.insert(sid, ws);
    }

    /// Drops a work space from its state bucket and from `all`.
    pub(crate) fn remove(&mut self, sid: &str) -> Option<Arc<WorkSpace>> {
        let ws = self.all.remove(sid)?;
        self.buckets[ws.state().rank() as usize].remove(sid);
        Some(ws)
    }

    /// Moves a work space between state buckets and updates its state field.
    pub(crate) fn transition(&mut self, ws: &Arc<WorkSpace>, to: WorkSpaceState) {
        let sid = ws.sid();
        self.buckets[ws.state().rank() as usize].remove(&sid);
        self.buckets[to.rank() as usize].insert(sid, Arc::clone(ws));
        ws.set_state(to);
    }
}

/// Mutable keeper state behind the single reader-writer lock.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) index: WorkSpaceIndex,
    pub(crate) list: Vec<Arc<WorkSpace>>,
    pub(crate) queue: PlotterQueue,
    pub(crate) db_dirs: Vec<PathBuf>,
}

impl Shared {
    /// Live work spaces matching `flags`, drawn from the configured fleet.
    pub(crate) fn select_by_flags(&self, flags: StateFlags) -> Vec<Arc<WorkSpace>> {
        if flags.is_all() {
            return self.list.clone();
        }
        self.list
            .iter()
            .filter(|ws| flags.matches(ws.state()))
            .cloned()
            .collect()
    }

    /// Marks a work space as part of the configured fleet.
    pub(crate) fn use_work_space(&mut self, ws: &Arc<WorkSpace>) {
        let sid = ws.sid();
        if self.list.iter().any(|existing| existing.sid() == sid) {
            return;
        }
        ws.set_using(true);
        self.list.push(Arc::clone(ws));
    }

    /// Drops a work space from the configured fleet.
    pub(crate) fn disuse_work_space(&mut self, ws: &Arc<WorkSpace>) {
        ws.set_using(false);
        let sid = ws.sid();
        self.list.retain(|existing| existing.sid() != sid);
    }
}

struct RunningTasks {
    plotter: JoinHandle<()>,
    _watcher: AbortingJoinHandle<()>,
}

pub(crate) struct Inner {
    started: AtomicBool,
    pub(crate) quit: AtomicBool,
    configuring: AtomicBool,
    configured: AtomicBool,
    pub(crate) allow_generate_new_space: bool,
    pub(crate) watch_interval: Duration,
    pub(crate) wallet: Arc<dyn PoCWallet>,
    pub(crate) backends: Arc<dyn PlotBackendFactory>,
    pub(crate) shared: RwLock<Shared>,
    plotter_tx: Mutex<Option<SyncSender<PlotterRequest>>>,
    pub(crate) proof_cache: ProofCache,
    worker_pool: WorkerPool,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Inner {
    pub(crate) fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Registers scanned plots that are not indexed yet as `registered`,
    /// outside of the configured fleet.
    pub(crate) fn register_scanned(&self, plots: Vec<crate::plot::ScannedPlot>) {
        let mut shared = self.shared.write();
        let mut registered = 0usize;
        for plot in plots {
            let sid = plot.id.to_string();
            if shared.index.get_all(&sid).is_some() {
                continue;
            }
            shared
                .index
                .insert(Arc::new(WorkSpace::new(plot.id, plot.backend)));
            registered += 1;
        }
        if registered > 0 {
            info!(count = registered, "registered plots found on disk");
        }
    }

    /// Memoized proof lookup for one work space, blocking on cache miss.
    pub(crate) fn lookup_proof(&self, ws: &Arc<WorkSpace>, challenge: &Challenge) -> Arc<WorkSpaceProof> {
        let sid = ws.sid();
        let key = ProofCache::key(&sid, challenge);
        if let Some(record) = self.proof_cache.get(&key) {
            return record;
        }

        let record = Arc::new(WorkSpaceProof {
            space_id: sid,
            public_key: ws.id().public_key(),
            ordinal: ws.id().ordinal(),
            proof: ws.backend().get_proof(challenge),
        });
        self.proof_cache.insert(key, Arc::clone(&record));
        record
    }

    /// Memoized proof lookup over many work spaces, fanning cache misses
    /// across the worker pool and blocking until every job completed.
    pub(crate) fn lookup_proofs(
        self: &Arc<Self>,
        targets: Vec<Arc<WorkSpace>>,
        challenge: &Challenge,
    ) -> HashMap<String, Arc<WorkSpaceProof>> {
        debug!(count = targets.len(), "generating proof lookup jobs");
        let mut result = HashMap::new();
        let mut submitted = Vec::new();
        let (done_sender, done_receiver) = mpsc::channel::<()>();

        for ws in targets {
            let sid = ws.sid();
            let key = ProofCache::key(&sid, challenge);
            if let Some(record) = self.proof_cache.get(&key) {
                result.insert(sid, record);
                continue;
            }

            submitted.push((sid, key.clone()));
            let inner = Arc::clone(self);
            let challenge = *challenge;
            let done_sender = done_sender.clone();
            self.worker_pool.submit(move || {
                let record = Arc::new(WorkSpaceProof {
                    space_id: ws.sid(),
                    public_key: ws.id().public_key(),
                    ordinal: ws.id().ordinal(),
                    proof: ws.backend().get_proof(&challenge),
                });
                inner.proof_cache.insert(key, record);
                drop(done_sender);
            });
        }

        // join on every submitted job, trivially satisfied when none were
        drop(done_sender);
        while done_receiver.recv().is_ok() {}

        for (sid, key) in submitted {
            if let Some(record) = self.proof_cache.get(&key) {
                result.insert(sid, record);
            }
        }
        result
    }

    /// Hands a job to the plotter loop. Falls back to a direct queue push
    /// when the loop is not running or the channel is saturated, so the call
    /// never blocks while the state lock is held.
    pub(crate) fn hand_to_plotter(&self, shared: &mut Shared, qws: QueuedWorkSpace) {
        let sender = self.plotter_tx.lock().clone();
        match sender {
            Some(sender) => {
                if let Err(TrySendError::Full(request) | TrySendError::Disconnected(request)) =
                    sender.try_send(PlotterRequest::Plot(qws))
                {
                    if let PlotterRequest::Plot(qws) = request {
                        shared.queue.push(qws);
                    }
                }
            }
            None => shared.queue.push(qws),
        }
    }

    /// Checks free bytes on the primary data directory against `required_bytes`.
    pub(crate) fn check_os_disk_size(
        &self,
        db_dirs: &[PathBuf],
        required_bytes: i64,
    ) -> Result<(), SpaceKeeperError> {
        if required_bytes < 0 {
            return Err(SpaceKeeperError::InvalidRequiredBytes);
        }
        let primary = db_dirs.first().ok_or(SpaceKeeperError::NoPlotDirs)?;
        let free = fs4::available_space(primary)?;
        if required_bytes as u64 >= free {
            return Err(SpaceKeeperError::OsDiskSizeNotEnough);
        }
        Ok(())
    }

    /// Draws a fresh public key from the wallet and opens a new plot backend
    /// for it in the primary data directory.
    pub(crate) fn generate_new_work_space(
        &self,
        db_dirs: &[PathBuf],
        bit_length: BitLength,
    ) -> Result<Arc<WorkSpace>, SpaceKeeperError> {
        let primary = db_dirs.first().ok_or(SpaceKeeperError::NoPlotDirs)?;
        let (public_key, ordinal) = self.wallet.generate_new_public_key()?;
        let id = SpaceId::new(ordinal, public_key, bit_length);
        let backend = self.backends.open(primary, id)?;
        Ok(Arc::new(WorkSpace::new(id, backend)))
    }

    /// All indexed work spaces grouped by bit length, each group sorted by
    /// plot priority.
    pub(crate) fn indexed_by_bit_length(
        &self,
        shared: &Shared,
    ) -> std::collections::BTreeMap<BitLength, Vec<Arc<WorkSpace>>> {
        let mut queues = std::collections::BTreeMap::<BitLength, PlotterQueue>::new();
        for ws in shared.index.all_work_spaces() {
            queues
                .entry(ws.id().bit_length())
                .or_default()
                .push(QueuedWorkSpace::new(Arc::clone(ws), false));
        }

        queues
            .into_iter()
            .map(|(bit_length, mut queue)| {
                let mut sorted = Vec::with_capacity(queue.len());
                while let Some(qws) = queue.pop() {
                    sorted.push(Arc::clone(qws.work_space()));
                }
                (bit_length, sorted)
            })
            .collect()
    }
}

/// Options used to create a [`SpaceKeeper`].
pub struct SpaceKeeperOptions {
    /// Plot data directories; the first one is the primary where new plots
    /// are created.
    pub db_dirs: Vec<PathBuf>,
    /// Whether configuration strategies may generate new plots.
    pub allow_generate_new_space: bool,
    /// Wallet issuing public keys and signatures.
    pub wallet: Arc<dyn PoCWallet>,
    /// Factory over the on-disk plot format.
    pub backends: Arc<dyn PlotBackendFactory>,
    /// How often the file watcher re-scans the data directories.
    pub watch_interval: Duration,
}

impl std::fmt::Debug for SpaceKeeperOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceKeeperOptions")
            .field("db_dirs", &self.db_dirs)
            .field("allow_generate_new_space", &self.allow_generate_new_space)
            .field("watch_interval", &self.watch_interval)
            .finish_non_exhaustive()
    }
}

impl SpaceKeeperOptions {
    /// Options with the default watch interval and generation enabled.
    pub fn new(wallet: Arc<dyn PoCWallet>, backends: Arc<dyn PlotBackendFactory>) -> Self {
        Self {
            db_dirs: Vec::new(),
            allow_generate_new_space: true,
            wallet,
            backends,
            watch_interval: FILE_WATCH_INTERVAL,
        }
    }
}

/// Manages the fleet of on-disk plots.
///
/// Cheap to clone; all clones share the same state. Queries take the shared
/// side of one reader-writer lock, state-changing verbs the exclusive side.
#[derive(Clone)]
pub struct SpaceKeeper {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SpaceKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.read();
        f.debug_struct("SpaceKeeper")
            .field("started", &self.inner.started())
            .field("indexed", &shared.index.all.len())
            .field("using", &shared.list.len())
            .finish_non_exhaustive()
    }
}

impl SpaceKeeper {
    /// Creates a keeper and seeds the index from the configured directories.
    pub fn new(options: SpaceKeeperOptions) -> Result<Self, SpaceKeeperError> {
        let SpaceKeeperOptions {
            db_dirs,
            allow_generate_new_space,
            wallet,
            backends,
            watch_interval,
        } = options;

        let inner = Arc::new(Inner {
            started: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            configuring: AtomicBool::new(false),
            configured: AtomicBool::new(false),
            allow_generate_new_space,
            watch_interval,
            wallet,
            backends,
            shared: RwLock::new(Shared {
                db_dirs,
                ..Shared::default()
            }),
            plotter_tx: Mutex::new(None),
            proof_cache: ProofCache::new(PROOF_CACHE_SIZE),
            worker_pool: WorkerPool::new(MAX_POOL_WORKERS)?,
            tasks: Mutex::new(None),
        });

        let keeper = Self { inner };
        let db_dirs = keeper.inner.shared.read().db_dirs.clone();
        if !db_dirs.is_empty() {
            keeper.generate_initial_index(&db_dirs)?;
        }
        Ok(keeper)
    }

    /// Whether the keeper is started.
    pub fn started(&self) -> bool {
        self.inner.started()
    }

    /// Whether the last configuration attempt concluded successfully.
    pub fn configured(&self) -> bool {
        self.inner.configured.load(Ordering::SeqCst)
    }

    /// Starts the plotter loop and the file watcher.
    ///
    /// Must be called from within a tokio runtime; refuses to start with a
    /// locked wallet.
    pub async fn start(&self) -> Result<(), SpaceKeeperError> {
        if self.inner.wallet.is_locked() {
            error!("can not start spacekeeper with locked poc wallet");
            return Err(SpaceKeeperError::WalletIsLocked);
        }
        if self.inner.configuring.load(Ordering::SeqCst) {
            return Err(SpaceKeeperError::IsRunning);
        }
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SpaceKeeperError::IsRunning);
        }

        self.inner.quit.store(false, Ordering::SeqCst);
        let (sender, receiver) = mpsc::sync_channel(PLOTTER_MAX_CHAN_SIZE);
        self.inner.plotter_tx.lock().replace(sender);

        let plotter = tokio::task::spawn_blocking({
            let inner = Arc::clone(&self.inner);
            move || plotter::plotter_loop(inner, receiver)
        });
        let watcher = AbortingJoinHandle::new(tokio::spawn(plotter::file_watcher(Arc::clone(
            &self.inner,
        ))));
        self.inner.tasks.lock().replace(RunningTasks {
            plotter,
            _watcher: watcher,
        });

        info!("spacekeeper started");
        Ok(())
    }

    /// Stops background tasks, interrupting an in-flight plot. Jobs that were
    /// queued but not plotted stay scheduled for the next start.
    pub async fn stop(&self) -> Result<(), SpaceKeeperError> {
        if !self.inner.started() {
            return Err(SpaceKeeperError::IsNotRunning);
        }

        self.inner.quit.store(true, Ordering::SeqCst);
        if let Some(sender) = self.inner.plotter_tx.lock().take() {
            let _ = sender.try_send(PlotterRequest::Exit);
        }
        if let Some(qws) = self.inner.shared.read().queue.popped() {
            qws.work_space().backend().stop_plot();
        }

        let tasks = self.inner.tasks.lock().take();
        if let Some(tasks) = tasks {
            if let Err(error) = tasks.plotter.await {
                error!(%error, "space plotter task failed");
            }
        }

        self.inner.started.store(false, Ordering::SeqCst);
        info!("spacekeeper stopped");
        Ok(())
    }

    /// Ids of live work spaces matching `flags`.
    pub fn work_space_ids(&self, flags: StateFlags) -> Vec<String> {
        let shared = self.inner.shared.read();
        shared
            .select_by_flags(flags)
            .iter()
            .map(|ws| ws.sid())
            .collect()
    }

    /// Snapshots of live work spaces matching `flags`.
    pub fn work_space_infos(&self, flags: StateFlags) -> Vec<WorkSpaceInfo> {
        let shared = self.inner.shared.read();
        shared
            .select_by_flags(flags)
            .iter()
            .map(|ws| ws.info())
            .collect()
    }

    /// Proof lookup for a single work space. Blocking on cache miss.
    pub fn get_proof(
        &self,
        sid: &str,
        challenge: &Challenge,
    ) -> Result<Arc<WorkSpaceProof>, SpaceKeeperError> {
        if !self.inner.started() {
            return Err(SpaceKeeperError::IsNotRunning);
        }

        let ws = {
            let shared = self.inner.shared.read();
            shared.index.get_all(sid).filter(|ws| ws.is_using())
        }
        .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        Ok(self.inner.lookup_proof(&ws, challenge))
    }

    /// Proof lookups across every live work space matching `flags`, fanned
    /// over the worker pool. Blocking until all lookups completed.
    pub fn get_proofs(
        &self,
        flags: StateFlags,
        challenge: &Challenge,
    ) -> Result<HashMap<String, Arc<WorkSpaceProof>>, SpaceKeeperError> {
        if !self.inner.started() {
            return Err(SpaceKeeperError::IsNotRunning);
        }

        let targets = self.inner.shared.read().select_by_flags(flags);
        Ok(self.inner.lookup_proofs(targets, challenge))
    }

    /// Streaming variant of [`Self::get_proof`]; the single proof is written
    /// by a background task.
    pub fn get_proof_reader(
        &self,
        sid: &str,
        challenge: &Challenge,
    ) -> Result<ProofReader, SpaceKeeperError> {
        if !self.inner.started() {
            return Err(SpaceKeeperError::IsNotRunning);
        }

        let ws = {
            let shared = self.inner.shared.read();
            shared.index.get_all(sid).filter(|ws| ws.is_using())
        }
        .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        let (mut writer, reader) = ProofReader::channel(1);
        let inner = Arc::clone(&self.inner);
        let challenge = *challenge;
        let sid = sid.to_string();
        tokio::spawn(async move {
            let lookup =
                tokio::task::spawn_blocking(move || inner.lookup_proof(&ws, &challenge)).await;
            match lookup {
                Ok(record) => {
                    if let Err(error) = writer.write(record) {
                        warn!(%error, %sid, "failed to write proof to reader");
                    }
                }
                Err(error) => error!(%error, %sid, "proof lookup task failed"),
            }
        });
        Ok(reader)
    }

    /// Streaming variant of [`Self::get_proofs`]; proofs are written by a
    /// background task and the producer stops once the reader is dropped.
    pub fn get_proofs_reader(
        &self,
        flags: StateFlags,
        challenge: &Challenge,
    ) -> Result<ProofReader, SpaceKeeperError> {
        if !self.inner.started() {
            return Err(SpaceKeeperError::IsNotRunning);
        }

        let targets = self.inner.shared.read().select_by_flags(flags);
        let (mut writer, reader) = ProofReader::channel(targets.len());
        let inner = Arc::clone(&self.inner);
        let challenge = *challenge;
        tokio::spawn(async move {
            let lookup = tokio::task::spawn_blocking(move || {
                let records = inner.lookup_proofs(targets, &challenge);
                records.into_values().collect::<Vec<_>>()
            })
            .await;
            match lookup {
                Ok(records) => {
                    let count = records.len();
                    for (index, record) in records.into_iter().enumerate() {
                        if let Err(error) = writer.write(record) {
                            warn!(%error, index, count, "failed to write proofs to reader");
                            break;
                        }
                    }
                }
                Err(error) => error!(%error, "proof lookup task failed"),
            }
        });
        Ok(reader)
    }

    /// Applies one action verb to one work space.
    pub fn act_on_work_space(&self, sid: &str, action: Action) -> Result<(), SpaceKeeperError> {
        match action {
            Action::Plot => self.plot_ws(sid),
            Action::Mine => self.mine_ws(sid),
            Action::Stop => self.stop_ws(sid),
            Action::Remove => self.remove_ws(sid),
            Action::Delete => self.delete_ws(sid),
        }
    }

    /// Applies one action verb across every live work space matching `flags`,
    /// returning the per-id outcome.
    pub fn act_on_work_spaces(
        &self,
        flags: StateFlags,
        action: Action,
    ) -> HashMap<String, Result<(), SpaceKeeperError>> {
        let sids = {
            let shared = self.inner.shared.read();
            shared
                .select_by_flags(flags)
                .iter()
                .map(|ws| ws.sid())
                .collect::<Vec<_>>()
        };

        sids.into_iter()
            .map(|sid| {
                let result = self.act_on_work_space(&sid, action);
                (sid, result)
            })
            .collect()
    }

    /// Signs `hash` with the wallet key the work space is bound to.
    pub fn sign_hash(&self, sid: &str, hash: [u8; 32]) -> Result<Signature, SpaceKeeperError> {
        let ws = self
            .inner
            .shared
            .read()
            .index
            .get_all(sid)
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;
        Ok(self
            .inner
            .wallet
            .sign_message(&ws.id().public_key(), &hash)?)
    }

    /// Seeds the index on first call; later calls only accept permutations
    /// of the existing directory set.
    pub fn reset_db_dirs(&self, db_dirs: Vec<PathBuf>) -> Result<(), SpaceKeeperError> {
        if self.inner.started() {
            return Err(SpaceKeeperError::IsRunning);
        }

        let existing = self.inner.shared.read().db_dirs.clone();
        if existing.is_empty() {
            self.inner.shared.write().db_dirs = db_dirs.clone();
            return self.generate_initial_index(&db_dirs);
        }

        let same_set = existing.len() == db_dirs.len()
            && db_dirs.iter().all(|dir| existing.contains(dir));
        if !same_set {
            return Err(SpaceKeeperError::ChangeDbDirs);
        }
        Ok(())
    }

    fn generate_initial_index(&self, db_dirs: &[PathBuf]) -> Result<(), SpaceKeeperError> {
        let scanned = self.inner.backends.scan(db_dirs)?;
        self.inner.register_scanned(scanned);
        Ok(())
    }

    /// Plot verb: `registered` work spaces are scheduled to land in `ready`,
    /// an in-flight plot is re-steered to `ready`, anything else is a no-op.
    fn plot_ws(&self, sid: &str) -> Result<(), SpaceKeeperError> {
        let mut shared = self.inner.shared.write();

        let ws = shared
            .index
            .get_all(sid)
            .filter(|ws| ws.is_using())
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        if shared.index.get_in(WorkSpaceState::Registered, sid).is_some() {
            let qws = QueuedWorkSpace::new(ws, false);
            self.inner.hand_to_plotter(&mut shared, qws);
            return Ok(());
        }

        if shared.index.get_in(WorkSpaceState::Plotting, sid).is_some() {
            // at most one work space plots at a time
            let qws = shared
                .queue
                .popped()
                .filter(|qws| qws.work_space().sid() == sid)
                .ok_or(SpaceKeeperError::WorkSpaceIsNotPlotting)?;
            qws.set_would_mine(false);
            return Ok(());
        }

        // ready and mining stay where they are
        Ok(())
    }

    /// Mine verb: schedules or re-steers plotting to land in `mining`,
    /// promotes `ready` to `mining` directly.
    fn mine_ws(&self, sid: &str) -> Result<(), SpaceKeeperError> {
        let mut shared = self.inner.shared.write();

        let ws = shared
            .index
            .get_all(sid)
            .filter(|ws| ws.is_using())
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        if shared.index.get_in(WorkSpaceState::Registered, sid).is_some() {
            let qws = QueuedWorkSpace::new(ws, true);
            self.inner.hand_to_plotter(&mut shared, qws);
            return Ok(());
        }

        if shared.index.get_in(WorkSpaceState::Plotting, sid).is_some() {
            let qws = shared
                .queue
                .popped()
                .filter(|qws| qws.work_space().sid() == sid)
                .ok_or(SpaceKeeperError::WorkSpaceIsNotPlotting)?;
            qws.set_would_mine(true);
            return Ok(());
        }

        if let Some(ws) = shared.index.get_in(WorkSpaceState::Ready, sid) {
            shared.index.transition(&ws, WorkSpaceState::Mining);
            return Ok(());
        }

        // already mining
        Ok(())
    }

    /// Stop verb: unschedules, interrupts an in-flight plot, or demotes
    /// `mining` to `ready`.
    fn stop_ws(&self, sid: &str) -> Result<(), SpaceKeeperError> {
        let mut shared = self.inner.shared.write();

        shared
            .index
            .get_all(sid)
            .filter(|ws| ws.is_using())
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        shared.queue.delete(sid);

        if shared.index.get_in(WorkSpaceState::Plotting, sid).is_some() {
            let qws = shared
                .queue
                .popped()
                .filter(|qws| qws.work_space().sid() == sid)
                .ok_or(SpaceKeeperError::WorkSpaceIsNotPlotting)?;
            qws.set_would_mine(false);
            qws.work_space().backend().stop_plot();
            return Ok(());
        }

        if let Some(ws) = shared.index.get_in(WorkSpaceState::Mining, sid) {
            shared.index.transition(&ws, WorkSpaceState::Ready);
            return Ok(());
        }

        Ok(())
    }

    /// Remove verb: drops a still work space from the configured fleet while
    /// keeping it indexed for later reuse.
    fn remove_ws(&self, sid: &str) -> Result<(), SpaceKeeperError> {
        let mut shared = self.inner.shared.write();

        shared
            .index
            .get_all(sid)
            .filter(|ws| ws.is_using())
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        shared.queue.delete(sid);

        let ws = shared
            .index
            .get_in(WorkSpaceState::Registered, sid)
            .or_else(|| shared.index.get_in(WorkSpaceState::Ready, sid))
            .ok_or(SpaceKeeperError::WorkSpaceIsNotStill)?;

        shared.disuse_work_space(&ws);
        Ok(())
    }

    /// Delete verb: drops a still work space entirely and erases its plot
    /// data. Irreversible.
    fn delete_ws(&self, sid: &str) -> Result<(), SpaceKeeperError> {
        let mut shared = self.inner.shared.write();

        shared
            .index
            .get_all(sid)
            .filter(|ws| ws.is_using())
            .ok_or(SpaceKeeperError::WorkSpaceDoesNotExist)?;

        shared.queue.delete(sid);

        let ws = shared
            .index
            .get_in(WorkSpaceState::Registered, sid)
            .or_else(|| shared.index.get_in(WorkSpaceState::Ready, sid))
            .ok_or(SpaceKeeperError::WorkSpaceIsNotStill)?;

        shared.index.remove(sid);
        shared.disuse_work_space(&ws);
        ws.backend().delete()?;
        Ok(())
    }
}
