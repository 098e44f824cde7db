//! Window-thread pool.
//!
//! Every window runs its message pump on a dedicated thread owned by this
//! pool. On platforms where window creation is expensive, a closed window's
//! thread is not torn down but "refrigerated": parked in an idle list, ready
//! to be "reheated" with a future window request without paying the
//! thread/window creation cost again.
//!
//! Locking: the active list is a reader-writer lock (icon recomputation and
//! menu building read concurrently; publish/remove write), the fridge is a
//! plain mutex, and the live-window count lives in the shutdown coordinator
//! as a lock-free atomic.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use crate::config::AppConfig;
use crate::handoff::HandoffPayload;
use crate::shutdown::ShutdownCoordinator;
use crate::tray::WindowSummary;

/// Window placement carried by a request, when the caller knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Everything needed to produce (or select) one window. Consumed exactly
/// once by the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowRequest {
    pub args: Vec<String>,
    pub cwd: String,
    pub show_command: u32,
    /// NUL-separated environment entries, as captured at launch.
    pub environment: String,
    pub target_window_name: Option<String>,
    pub initial_bounds: Option<Bounds>,
    /// Serialized content (e.g. a detached pane) to re-attach in the new
    /// window.
    pub content_to_attach: Option<String>,
}

impl WindowRequest {
    /// Builds a request from a raw command line, as both the initial launch
    /// and a handed-off launch arrive.
    pub fn from_command_line(
        command_line: &str,
        environment: String,
        cwd: String,
        show_command: u32,
    ) -> Self {
        WindowRequest {
            args: split_command_line(command_line),
            cwd,
            show_command,
            environment,
            target_window_name: None,
            initial_bounds: None,
            content_to_attach: None,
        }
    }

    pub fn from_handoff(payload: HandoffPayload) -> Self {
        Self::from_command_line(
            &payload.command_line,
            payload.environment,
            payload.working_directory,
            payload.show_command,
        )
    }
}

/// Splits a raw command line into argv, honoring double quotes. Only the
/// subset of quoting the shell alias actually produces is supported.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    args.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        args.push(current);
    }
    args
}

/// The application logic living inside one window. The terminal side of the
/// shell implements this; tests use lightweight fakes.
pub trait WindowHost: Send {
    /// Creates the OS window for `request` and runs its message pump until
    /// the user closes that window. Called once per warm cycle; a
    /// refrigerated thread calls it again with the next request on reheat.
    fn run_message_pump(&mut self, request: &WindowRequest);
}

/// Handle given to each [`WindowHost`] for publishing per-window state back
/// to the pool.
pub struct WindowLink {
    record: Arc<WindowRecord>,
    pool: Weak<WindowPool>,
}

impl WindowLink {
    pub fn id(&self) -> u64 {
        self.record.id
    }

    /// Flags this window as a quake window (always-on-call, hotkey-summoned).
    /// The notification icon must stay visible while any such window lives.
    pub fn set_quake_window(&self, quake: bool) {
        let previous = self.record.quake.swap(quake, Ordering::Relaxed);
        if previous != quake {
            if let Some(pool) = self.pool.upgrade() {
                pool.notify_windows_changed();
            }
        }
    }

    pub fn set_title(&self, title: &str) {
        *self.record.title.lock() = title.to_string();
    }
}

pub type HostFactory = Arc<dyn Fn(WindowLink) -> Box<dyn WindowHost> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Created,
    Running,
    Draining,
    Refrigerated,
    /// Absorbing: a terminated record is never reused.
    Terminated,
}

/// Per-window-thread bookkeeping. Owned by the pool while Running or
/// Refrigerated; moved between the active list and the fridge, never copied.
pub struct WindowRecord {
    id: u64,
    /// Bumped on every reheat so a stale reference can never revive a
    /// discarded record.
    generation: AtomicU64,
    state: Mutex<WindowState>,
    quake: AtomicBool,
    title: Mutex<String>,
    name: Mutex<Option<String>>,
    reheat_tx: Sender<ReheatSignal>,
}

impl WindowRecord {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> WindowState {
        *self.state.lock()
    }

    pub fn is_quake_window(&self) -> bool {
        self.quake.load(Ordering::Relaxed)
    }
}

enum ReheatSignal {
    Reheat(WindowRequest),
    Discard,
}

/// Whether closed windows keep their thread around for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReusePolicy {
    Refrigerate,
    TearDown,
}

impl ReusePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        match config.reuse_window_threads {
            Some(true) => ReusePolicy::Refrigerate,
            Some(false) => ReusePolicy::TearDown,
            None => Self::detect(),
        }
    }

    /// Windows 11 (build 22000+) recreates windows cheaply enough to tear
    /// threads down normally; older builds refrigerate.
    #[cfg(windows)]
    fn detect() -> Self {
        let build = sysinfo::System::kernel_version()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        if build >= 22000 {
            ReusePolicy::TearDown
        } else {
            ReusePolicy::Refrigerate
        }
    }

    #[cfg(not(windows))]
    fn detect() -> Self {
        ReusePolicy::TearDown
    }
}

pub struct WindowPool {
    active: RwLock<Vec<Arc<WindowRecord>>>,
    fridge: Mutex<Vec<Arc<WindowRecord>>>,
    policy: ReusePolicy,
    factory: HostFactory,
    shutdown: Arc<ShutdownCoordinator>,
    /// Invoked whenever the active list or a window's quake state changes;
    /// the dispatch loop uses it to requeue an icon recomputation.
    on_windows_changed: Box<dyn Fn() + Send + Sync>,
    next_id: AtomicU64,
    threads_spawned: AtomicU64,
}

impl WindowPool {
    pub fn new(
        policy: ReusePolicy,
        factory: HostFactory,
        shutdown: Arc<ShutdownCoordinator>,
        on_windows_changed: Box<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(WindowPool {
            active: RwLock::new(Vec::new()),
            fridge: Mutex::new(Vec::new()),
            policy,
            factory,
            shutdown,
            on_windows_changed,
            next_id: AtomicU64::new(0),
            threads_spawned: AtomicU64::new(0),
        })
    }

    /// Produces a window for `request`: reheats the most recently
    /// refrigerated thread if one exists, otherwise spawns a new one.
    pub fn request_window(self: &Arc<Self>, mut request: WindowRequest) {
        loop {
            let Some(record) = self.fridge.lock().pop() else {
                break;
            };
            record.generation.fetch_add(1, Ordering::Relaxed);
            match record.reheat_tx.send(ReheatSignal::Reheat(request)) {
                Ok(()) => {
                    self.shutdown.on_window_spawned();
                    tracing::debug!(
                        id = record.id,
                        generation = record.generation(),
                        "reheating refrigerated window thread"
                    );
                    return;
                }
                Err(failed) => {
                    // The parked thread is gone; drop the stale record and
                    // try the next one.
                    tracing::warn!(id = record.id, "refrigerated window thread was dead");
                    request = match failed.into_inner() {
                        ReheatSignal::Reheat(r) => r,
                        ReheatSignal::Discard => unreachable!(),
                    };
                }
            }
        }
        self.spawn_window_thread(request);
    }

    fn spawn_window_thread(self: &Arc<Self>, request: WindowRequest) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reheat_tx, reheat_rx) = bounded::<ReheatSignal>(1);
        let record = Arc::new(WindowRecord {
            id,
            generation: AtomicU64::new(0),
            state: Mutex::new(WindowState::Created),
            quake: AtomicBool::new(false),
            title: Mutex::new(String::new()),
            name: Mutex::new(None),
            reheat_tx,
        });

        self.shutdown.on_window_spawned();
        self.threads_spawned.fetch_add(1, Ordering::Relaxed);

        let pool = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let factory = Arc::clone(&self.factory);
        let policy = self.policy;
        let thread_record = Arc::clone(&record);

        let spawned = thread::Builder::new()
            .name(format!("window-{id}"))
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    Self::warm_loop(pool, thread_record, reheat_rx, factory, policy, shutdown);
                }));
                if result.is_err() {
                    tracing::error!(id, "window thread terminated by panic");
                }
            });
        if let Err(err) = spawned {
            tracing::error!(id, %err, "failed to spawn window thread");
            self.shutdown.on_window_terminated();
            return;
        }

        // The thread waits for its first request on the reheat channel,
        // exactly like a reheat, so spawn and reuse share one code path.
        let _ = record.reheat_tx.send(ReheatSignal::Reheat(request));
    }

    /// Body of one window thread: publish, pump, withdraw, then refrigerate
    /// or tear down per policy.
    fn warm_loop(
        pool: Weak<WindowPool>,
        record: Arc<WindowRecord>,
        reheat_rx: Receiver<ReheatSignal>,
        factory: HostFactory,
        policy: ReusePolicy,
        shutdown: Arc<ShutdownCoordinator>,
    ) {
        let link = WindowLink {
            record: Arc::clone(&record),
            pool: pool.clone(),
        };
        let mut host = (factory)(link);

        loop {
            let request = match reheat_rx.recv() {
                Ok(ReheatSignal::Reheat(request)) => request,
                Ok(ReheatSignal::Discard) | Err(_) => {
                    *record.state.lock() = WindowState::Terminated;
                    tracing::debug!(id = record.id, "discarding refrigerated window thread");
                    return;
                }
            };

            *record.name.lock() = request.target_window_name.clone();
            *record.state.lock() = WindowState::Running;
            let Some(strong) = pool.upgrade() else {
                *record.state.lock() = WindowState::Terminated;
                shutdown.on_window_terminated();
                return;
            };
            strong.active.write().push(Arc::clone(&record));
            strong.notify_windows_changed();
            drop(strong);

            // One window's logic must not take down its siblings: a panic in
            // the pump ends this warm cycle like a normal close.
            let pump = catch_unwind(AssertUnwindSafe(|| host.run_message_pump(&request)));
            if pump.is_err() {
                tracing::error!(id = record.id, "window logic panicked; treating as close");
            }

            *record.state.lock() = WindowState::Draining;
            if let Some(strong) = pool.upgrade() {
                strong.remove_active(record.id);
            }

            match policy {
                ReusePolicy::TearDown => {
                    *record.state.lock() = WindowState::Terminated;
                    shutdown.on_window_terminated();
                    return;
                }
                ReusePolicy::Refrigerate => {
                    *record.state.lock() = WindowState::Refrigerated;
                    record.quake.store(false, Ordering::Relaxed);
                    match pool.upgrade() {
                        Some(strong) => {
                            strong.fridge.lock().push(Arc::clone(&record));
                            shutdown.on_window_terminated();
                        }
                        None => {
                            *record.state.lock() = WindowState::Terminated;
                            shutdown.on_window_terminated();
                            return;
                        }
                    }
                    // loop back to the blocking recv: refrigerated until
                    // reheated or discarded
                }
            }
        }
    }

    fn remove_active(&self, id: u64) {
        self.active.write().retain(|record| record.id != id);
        self.notify_windows_changed();
    }

    fn notify_windows_changed(&self) {
        (self.on_windows_changed)();
    }

    /// True when any running window is a quake window. Shared-lock read,
    /// safe concurrently with list mutation.
    pub fn any_quake_window(&self) -> bool {
        self.active
            .read()
            .iter()
            .any(|record| record.quake.load(Ordering::Relaxed))
    }

    /// Snapshot of the live windows for menu building.
    pub fn window_summaries(&self) -> Vec<WindowSummary> {
        self.active
            .read()
            .iter()
            .map(|record| WindowSummary {
                id: record.id,
                title: record.title.lock().clone(),
                name: record.name.lock().clone(),
            })
            .collect()
    }

    pub fn active_windows(&self) -> usize {
        self.active.read().len()
    }

    pub fn idle_windows(&self) -> usize {
        self.fridge.lock().len()
    }

    /// Total OS threads this pool ever created.
    pub fn threads_spawned(&self) -> u64 {
        self.threads_spawned.load(Ordering::Relaxed)
    }

    /// Tells every refrigerated thread to exit. Used on quit so parked
    /// threads don't keep the process alive.
    pub fn drain_idle(&self) {
        let drained: Vec<_> = std::mem::take(&mut *self.fridge.lock());
        for record in drained {
            let _ = record.reheat_tx.send(ReheatSignal::Discard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{EmperorMessage, LifetimeToken, MainThreadHandle};
    use crossbeam_channel::unbounded;
    use std::time::{Duration, Instant};

    /// Host that blocks in its "pump" until the test closes it.
    struct GatedHost {
        close_rx: Receiver<()>,
    }

    impl WindowHost for GatedHost {
        fn run_message_pump(&mut self, _request: &WindowRequest) {
            let _ = self.close_rx.recv();
        }
    }

    struct Fixture {
        pool: Arc<WindowPool>,
        shutdown: Arc<ShutdownCoordinator>,
        closers: Arc<Mutex<Vec<Sender<()>>>>,
        quit_rx: Receiver<EmperorMessage>,
    }

    fn fixture(policy: ReusePolicy, headless_allowed: bool) -> Fixture {
        let (tx, quit_rx) = unbounded();
        let handle = MainThreadHandle::new(tx, LifetimeToken::new());
        let shutdown = ShutdownCoordinator::new(headless_allowed, handle);
        let closers: Arc<Mutex<Vec<Sender<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let closers_in_factory = Arc::clone(&closers);
        let factory: HostFactory = Arc::new(move |_link| {
            let (close_tx, close_rx) = unbounded();
            closers_in_factory.lock().push(close_tx);
            Box::new(GatedHost { close_rx })
        });
        let pool = WindowPool::new(policy, factory, Arc::clone(&shutdown), Box::new(|| {}));
        Fixture {
            pool,
            shutdown,
            closers,
            quit_rx,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met within 5s");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn request() -> WindowRequest {
        WindowRequest {
            args: vec!["emp".to_string()],
            show_command: crate::SHOW_DEFAULT,
            ..Default::default()
        }
    }

    #[test]
    fn split_command_line_honors_quotes() {
        assert_eq!(
            split_command_line("emp new-tab -p \"Power Shell\"  -d C:\\src"),
            vec!["emp", "new-tab", "-p", "Power Shell", "-d", "C:\\src"]
        );
        assert_eq!(split_command_line("   "), Vec::<String>::new());
        assert_eq!(split_command_line("\"\""), vec![""]);
    }

    #[test]
    fn refrigerated_threads_are_reused_before_spawning() {
        let f = fixture(ReusePolicy::Refrigerate, true);
        let w = 3;
        for _ in 0..w {
            f.pool.request_window(request());
        }
        wait_until(|| f.pool.active_windows() == w);
        assert_eq!(f.pool.threads_spawned(), w as u64);

        for closer in f.closers.lock().iter() {
            let _ = closer.send(());
        }
        wait_until(|| f.pool.idle_windows() == w);
        assert_eq!(f.pool.active_windows(), 0);
        assert_eq!(f.shutdown.live_windows(), 0);

        // W new requests: all served from the fridge, zero new threads
        for _ in 0..w {
            f.pool.request_window(request());
        }
        wait_until(|| f.pool.active_windows() == w);
        assert_eq!(f.pool.idle_windows(), 0);
        assert_eq!(f.pool.threads_spawned(), w as u64);

        // the (W+1)-th request needs exactly one new thread
        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == w + 1);
        assert_eq!(f.pool.threads_spawned(), w as u64 + 1);
    }

    #[test]
    fn reheat_bumps_the_generation() {
        let f = fixture(ReusePolicy::Refrigerate, true);
        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == 1);
        let record = Arc::clone(&f.pool.active.read()[0]);
        assert_eq!(record.generation(), 0);

        f.closers.lock()[0].send(()).unwrap();
        wait_until(|| f.pool.idle_windows() == 1);
        assert_eq!(record.state(), WindowState::Refrigerated);

        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == 1);
        assert_eq!(record.generation(), 1);
        assert_eq!(record.state(), WindowState::Running);
    }

    #[test]
    fn teardown_policy_terminates_threads() {
        let f = fixture(ReusePolicy::TearDown, true);
        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == 1);
        let record = Arc::clone(&f.pool.active.read()[0]);

        f.closers.lock()[0].send(()).unwrap();
        wait_until(|| f.shutdown.live_windows() == 0);
        wait_until(|| record.state() == WindowState::Terminated);
        assert_eq!(f.pool.idle_windows(), 0);
    }

    #[test]
    fn last_window_closing_posts_quit_when_headless_disallowed() {
        let f = fixture(ReusePolicy::TearDown, false);
        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == 1);
        f.closers.lock()[0].send(()).unwrap();

        let msg = f.quit_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(msg, EmperorMessage::Quit));
        assert!(f.quit_rx.try_recv().is_err(), "exactly one quit expected");
    }

    #[test]
    fn discarding_idle_threads_leaves_the_counter_alone() {
        let f = fixture(ReusePolicy::Refrigerate, true);
        f.pool.request_window(request());
        wait_until(|| f.pool.active_windows() == 1);
        f.closers.lock()[0].send(()).unwrap();
        wait_until(|| f.pool.idle_windows() == 1);
        assert_eq!(f.shutdown.live_windows(), 0);

        let record = Arc::clone(&f.pool.fridge.lock()[0]);
        f.pool.drain_idle();
        wait_until(|| record.state() == WindowState::Terminated);
        assert_eq!(f.pool.idle_windows(), 0);
        assert_eq!(f.shutdown.live_windows(), 0);
    }

    #[test]
    fn panicking_window_logic_does_not_poison_the_pool() {
        struct PanickyHost;
        impl WindowHost for PanickyHost {
            fn run_message_pump(&mut self, _request: &WindowRequest) {
                panic!("window logic exploded");
            }
        }
        let (tx, _quit_rx) = unbounded();
        let handle = MainThreadHandle::new(tx, LifetimeToken::new());
        let shutdown = ShutdownCoordinator::new(true, handle);
        let factory: HostFactory = Arc::new(|_link| Box::new(PanickyHost));
        let pool = WindowPool::new(
            ReusePolicy::TearDown,
            factory,
            Arc::clone(&shutdown),
            Box::new(|| {}),
        );
        pool.request_window(request());
        wait_until(|| shutdown.live_windows() == 0);
        assert_eq!(pool.active_windows(), 0);
    }
}
