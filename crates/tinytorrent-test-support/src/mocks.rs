//! In-memory engine and host doubles with recording counters.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tinytorrent_recovery_core::{
    EngineError, EngineResult, FaultDescriptor, FreeSpace, FsErrorKind, HostMode, HostProbe,
    RecoveryEngine, TorrentActivity,
};
use uuid::Uuid;

/// Free space reported for paths without an explicit override (1 TiB).
const DEFAULT_FREE_BYTES: u64 = 1 << 40;

/// Engine call recorded by [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    /// `resume` for the listed torrents.
    Resume(Vec<Uuid>),
    /// `verify` for one torrent.
    Verify(Uuid),
    /// `set_location` for one torrent.
    SetLocation {
        /// Torrent relocated.
        id: Uuid,
        /// New location.
        path: String,
        /// Whether data was moved.
        move_data: bool,
    },
    /// `remove` for the listed torrents.
    Remove {
        /// Torrents removed.
        ids: Vec<Uuid>,
        /// Whether data was deleted.
        delete_data: bool,
    },
    /// `check_free_space` for a path.
    CheckFreeSpace(String),
}

impl EngineCall {
    /// Whether the call changes engine state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        !matches!(self, Self::CheckFreeSpace(_))
    }
}

struct EngineState {
    faults: HashMap<Uuid, FaultDescriptor>,
    activity: HashMap<Uuid, TorrentActivity>,
    free_space: HashMap<String, u64>,
    default_free_space: Option<u64>,
    missing_paths: HashSet<String>,
    fs_failures: HashMap<&'static str, FsErrorKind>,
    transport_failures: HashSet<&'static str>,
    calls: Vec<EngineCall>,
    resume_clears_fault: bool,
    resume_activity: TorrentActivity,
    call_delay: Duration,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            faults: HashMap::new(),
            activity: HashMap::new(),
            free_space: HashMap::new(),
            default_free_space: Some(DEFAULT_FREE_BYTES),
            missing_paths: HashSet::new(),
            fs_failures: HashMap::new(),
            transport_failures: HashSet::new(),
            calls: Vec::new(),
            resume_clears_fault: true,
            resume_activity: TorrentActivity::Active,
            call_delay: Duration::ZERO,
        }
    }
}

impl EngineState {
    fn check(&self, operation: &'static str) -> EngineResult<()> {
        if self.transport_failures.contains(operation) {
            return Err(EngineError::transport(
                operation,
                io::Error::other("injected transport failure"),
            ));
        }
        if let Some(kind) = self.fs_failures.get(operation) {
            return Err(EngineError::filesystem(operation, *kind, None));
        }
        Ok(())
    }
}

/// Scriptable engine double.
///
/// By default `resume` clears the fault and marks the torrent active, and every path
/// reports 1 TiB of free space.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
}

impl FakeEngine {
    /// Create an engine with no faulted torrents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a torrent into the faulted state.
    pub fn set_fault(&self, id: Uuid, descriptor: FaultDescriptor) {
        let mut state = self.lock();
        state.faults.insert(id, descriptor);
        state.activity.insert(id, TorrentActivity::Faulted);
    }

    /// Clear a torrent's fault and mark it active.
    pub fn clear_fault(&self, id: Uuid) {
        let mut state = self.lock();
        state.faults.remove(&id);
        state.activity.insert(id, TorrentActivity::Active);
    }

    /// Current descriptor for a torrent.
    #[must_use]
    pub fn fault(&self, id: Uuid) -> Option<FaultDescriptor> {
        self.lock().faults.get(&id).cloned()
    }

    /// Override the activity reported for a torrent.
    pub fn set_activity(&self, id: Uuid, activity: TorrentActivity) {
        self.lock().activity.insert(id, activity);
    }

    /// Report `bytes` of free space at `path`.
    pub fn set_free_space(&self, path: &str, bytes: u64) {
        let mut state = self.lock();
        state.missing_paths.remove(path);
        state.free_space.insert(path.to_string(), bytes);
    }

    /// Free space for paths without an override; `None` reports them missing.
    pub fn set_default_free_space(&self, bytes: Option<u64>) {
        self.lock().default_free_space = bytes;
    }

    /// Make free-space queries for `path` fail as missing.
    pub fn mark_path_missing(&self, path: &str) {
        self.lock().missing_paths.insert(path.to_string());
    }

    /// Undo [`FakeEngine::mark_path_missing`].
    pub fn restore_path(&self, path: &str) {
        self.lock().missing_paths.remove(path);
    }

    /// Fail an operation with a filesystem error until cleared.
    pub fn fail_operation(&self, operation: &'static str, kind: FsErrorKind) {
        self.lock().fs_failures.insert(operation, kind);
    }

    /// Fail an operation with a transport error until cleared.
    pub fn fail_transport(&self, operation: &'static str) {
        self.lock().transport_failures.insert(operation);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fs_failures.clear();
        state.transport_failures.clear();
    }

    /// Whether `resume` clears the fault.
    pub fn set_resume_clears_fault(&self, clears: bool) {
        self.lock().resume_clears_fault = clears;
    }

    /// Activity a successful `resume` leaves the torrent in.
    pub fn set_resume_activity(&self, activity: TorrentActivity) {
        self.lock().resume_activity = activity;
    }

    /// Delay applied before mutating calls take effect.
    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = delay;
    }

    /// Every recorded call, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Number of `resume` calls.
    #[must_use]
    pub fn resume_calls(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Resume(_)))
    }

    /// Number of `verify` calls.
    #[must_use]
    pub fn verify_calls(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Verify(_)))
    }

    /// Number of `set_location` calls.
    #[must_use]
    pub fn set_location_calls(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::SetLocation { .. }))
    }

    /// Number of `remove` calls.
    #[must_use]
    pub fn remove_calls(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::Remove { .. }))
    }

    /// Number of calls that change engine state.
    #[must_use]
    pub fn mutating_calls(&self) -> usize {
        self.count(EngineCall::is_mutating)
    }

    /// Number of free-space queries.
    #[must_use]
    pub fn free_space_queries(&self) -> usize {
        self.count(|call| matches!(call, EngineCall::CheckFreeSpace(_)))
    }

    async fn delay(&self) {
        let delay = self.lock().call_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RecoveryEngine for FakeEngine {
    async fn fault_descriptor(&self, id: Uuid) -> EngineResult<Option<FaultDescriptor>> {
        let state = self.lock();
        state.check("fault_descriptor")?;
        Ok(state.faults.get(&id).cloned())
    }

    async fn faulted_targets(&self) -> EngineResult<Vec<Uuid>> {
        let state = self.lock();
        state.check("faulted_targets")?;
        let mut ids: Vec<Uuid> = state.faults.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn activity(&self, id: Uuid) -> EngineResult<TorrentActivity> {
        let state = self.lock();
        state.check("activity")?;
        let fallback = if state.faults.contains_key(&id) {
            TorrentActivity::Faulted
        } else {
            TorrentActivity::Active
        };
        Ok(state.activity.get(&id).copied().unwrap_or(fallback))
    }

    async fn resume(&self, ids: &[Uuid]) -> EngineResult<()> {
        {
            let mut state = self.lock();
            state.calls.push(EngineCall::Resume(ids.to_vec()));
            state.check("resume")?;
        }
        self.delay().await;
        let mut state = self.lock();
        if state.resume_clears_fault {
            let activity = state.resume_activity;
            for id in ids {
                state.faults.remove(id);
                state.activity.insert(*id, activity);
            }
        }
        Ok(())
    }

    async fn verify(&self, id: Uuid) -> EngineResult<()> {
        {
            let mut state = self.lock();
            state.calls.push(EngineCall::Verify(id));
            state.check("verify")?;
        }
        self.delay().await;
        self.lock().activity.insert(id, TorrentActivity::Checking);
        Ok(())
    }

    async fn set_location(&self, id: Uuid, path: &str, move_data: bool) -> EngineResult<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::SetLocation {
            id,
            path: path.to_string(),
            move_data,
        });
        state.check("set_location")?;
        if let Some(descriptor) = state.faults.get_mut(&id) {
            path.clone_into(&mut descriptor.path);
        }
        Ok(())
    }

    async fn check_free_space(&self, path: &str) -> EngineResult<FreeSpace> {
        let mut state = self.lock();
        state.calls.push(EngineCall::CheckFreeSpace(path.to_string()));
        state.check("check_free_space")?;
        if state.missing_paths.contains(path) {
            return Err(EngineError::filesystem(
                "check_free_space",
                FsErrorKind::Missing,
                Some(path),
            ));
        }
        state
            .free_space
            .get(path)
            .copied()
            .or(state.default_free_space)
            .map(|size_bytes| FreeSpace { size_bytes })
            .ok_or_else(|| {
                EngineError::filesystem("check_free_space", FsErrorKind::Missing, Some(path))
            })
    }

    async fn remove(&self, ids: &[Uuid], delete_data: bool) -> EngineResult<()> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Remove {
            ids: ids.to_vec(),
            delete_data,
        });
        state.check("remove")?;
        for id in ids {
            state.faults.remove(id);
            state.activity.remove(id);
        }
        Ok(())
    }
}

#[derive(Default)]
struct HostState {
    existing: HashSet<String>,
    volumes: HashMap<String, bool>,
    unwritable: HashSet<String>,
    created: Vec<String>,
    fail_create: bool,
}

/// Scriptable host filesystem double.
///
/// Paths under a volume scripted as unmounted never exist. A remote host answers every
/// probe with `None` and refuses to create directories.
pub struct FakeHost {
    mode: HostMode,
    state: Mutex<HostState>,
}

impl FakeHost {
    /// Host sharing the engine's filesystem.
    #[must_use]
    pub fn local() -> Self {
        Self {
            mode: HostMode::Local,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Host with no filesystem access.
    #[must_use]
    pub fn remote() -> Self {
        Self {
            mode: HostMode::Remote,
            state: Mutex::new(HostState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a path exist.
    pub fn add_path(&self, path: &str) {
        self.lock().existing.insert(path.to_string());
    }

    /// Make a path disappear.
    pub fn remove_path(&self, path: &str) {
        self.lock().existing.remove(path);
    }

    /// Script the mount state of a volume root.
    pub fn set_volume(&self, root: &str, mounted: bool) {
        self.lock().volumes.insert(root.to_string(), mounted);
    }

    /// Script whether a path is writable.
    pub fn set_writable(&self, path: &str, writable: bool) {
        let mut state = self.lock();
        if writable {
            state.unwritable.remove(path);
        } else {
            state.unwritable.insert(path.to_string());
        }
    }

    /// Make `create_directory` fail.
    pub fn fail_create_directory(&self, fail: bool) {
        self.lock().fail_create = fail;
    }

    /// Directories created so far.
    #[must_use]
    pub fn created_directories(&self) -> Vec<String> {
        self.lock().created.clone()
    }
}

impl HostState {
    fn exists(&self, path: &str) -> bool {
        let on_unmounted_volume = self
            .volumes
            .iter()
            .any(|(root, mounted)| !mounted && path.starts_with(root.as_str()));
        !on_unmounted_volume && self.existing.contains(path)
    }
}

impl HostProbe for FakeHost {
    fn mode(&self) -> HostMode {
        self.mode
    }

    fn path_exists(&self, path: &str) -> Option<bool> {
        match self.mode {
            HostMode::Local => Some(self.lock().exists(path)),
            HostMode::Remote => None,
        }
    }

    fn volume_mounted(&self, root: &str) -> Option<bool> {
        match self.mode {
            HostMode::Local => self.lock().volumes.get(root).copied(),
            HostMode::Remote => None,
        }
    }

    fn is_writable(&self, path: &str) -> Option<bool> {
        if self.mode == HostMode::Remote {
            return None;
        }
        let state = self.lock();
        state
            .exists(path)
            .then(|| !state.unwritable.contains(path))
    }

    fn create_directory(&self, path: &str) -> io::Result<()> {
        if self.mode == HostMode::Remote {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "remote host has no filesystem access",
            ));
        }
        let mut state = self.lock();
        if state.fail_create {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "injected create_directory failure",
            ));
        }
        state.existing.insert(path.to_string());
        state.created.push(path.to_string());
        Ok(())
    }
}
