//! Main-thread message dispatch.
//!
//! Every cross-thread interaction with the coordinator funnels through one
//! channel into [`run`]. Window threads, the message window's wndproc, and
//! tray callbacks post [`EmperorMessage`]s through a [`MainThreadHandle`];
//! the main thread drains them in order. One misbehaving message must never
//! take the loop down, so each dispatch is wrapped in a panic guard.

use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{load_config, AppConfig};
use crate::handoff;
use crate::hotkeys::{bindings_from_config, HotkeyManager};
use crate::pool::{WindowPool, WindowRequest};
use crate::shutdown::ShutdownCoordinator;
use crate::summon::{SummonArgs, WindowSummoner};
use crate::tray::{NotificationIconArbiter, TrayMenuAction};

pub enum EmperorMessage {
    /// The settings file changed on disk; reload and reapply.
    SettingsChanged,
    /// The set of live windows (or a window's quake flag) changed.
    WindowsChanged,
    /// Raw WM_COPYDATA payload from a secondary launch.
    HandoffReceived(Vec<u8>),
    /// WM_HOTKEY fired; the id is the binding index.
    HotkeyPressed(u32),
    TrayMenu(TrayMenuAction),
    ThemeChanged { dark: bool },
    /// The taskbar restarted and dropped all notification icons.
    TaskbarCreated,
    /// Arbitrary work marshalled onto the main thread.
    Task(Box<dyn FnOnce(&mut Emperor) + Send>),
    Quit,
}

impl EmperorMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            EmperorMessage::SettingsChanged => "settings-changed",
            EmperorMessage::WindowsChanged => "windows-changed",
            EmperorMessage::HandoffReceived(_) => "handoff-received",
            EmperorMessage::HotkeyPressed(_) => "hotkey-pressed",
            EmperorMessage::TrayMenu(_) => "tray-menu",
            EmperorMessage::ThemeChanged { .. } => "theme-changed",
            EmperorMessage::TaskbarCreated => "taskbar-created",
            EmperorMessage::Task(_) => "task",
            EmperorMessage::Quit => "quit",
        }
    }
}

/// Marker for "the main loop is still running". Once invalidated at loop
/// exit, posts become silent no-ops, so late callbacks from window threads
/// can't land work on a dead loop.
#[derive(Clone)]
pub struct LifetimeToken(Arc<AtomicBool>);

impl LifetimeToken {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        LifetimeToken(Arc::new(AtomicBool::new(true)))
    }

    pub fn invalidate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cheap, cloneable handle for posting messages to the main thread.
#[derive(Clone)]
pub struct MainThreadHandle {
    tx: Sender<EmperorMessage>,
    token: LifetimeToken,
}

impl MainThreadHandle {
    pub fn new(tx: Sender<EmperorMessage>, token: LifetimeToken) -> Self {
        MainThreadHandle { tx, token }
    }

    pub fn post(&self, message: EmperorMessage) {
        if !self.token.is_live() {
            tracing::debug!(kind = message.kind(), "dropping message for dead main loop");
            return;
        }
        let _ = self.tx.send(message);
    }

    /// Queues a closure to run on the main thread with full coordinator
    /// access. Ordered with respect to all other posts.
    pub fn run_on_main(&self, work: impl FnOnce(&mut Emperor) + Send + 'static) {
        self.post(EmperorMessage::Task(Box::new(work)));
    }
}

/// The coordinator state owned by the main thread.
pub struct Emperor {
    config: AppConfig,
    pool: Arc<WindowPool>,
    shutdown: Arc<ShutdownCoordinator>,
    hotkeys: HotkeyManager,
    icon: NotificationIconArbiter,
    summoner: Box<dyn WindowSummoner>,
    current_theme_is_dark: Option<bool>,
}

impl Emperor {
    pub fn new(
        config: AppConfig,
        pool: Arc<WindowPool>,
        shutdown: Arc<ShutdownCoordinator>,
        hotkeys: HotkeyManager,
        icon: NotificationIconArbiter,
        summoner: Box<dyn WindowSummoner>,
    ) -> Self {
        Emperor {
            config,
            pool,
            shutdown,
            hotkeys,
            icon,
            summoner,
            current_theme_is_dark: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WindowPool> {
        &self.pool
    }

    pub fn theme_is_dark(&self) -> Option<bool> {
        self.current_theme_is_dark
    }

    /// Applies the current settings: hotkey table and icon state.
    pub fn apply_settings(&mut self) {
        self.hotkeys.resync(bindings_from_config(&self.config));
        self.refresh_icon();
    }

    /// Dispatches one message, containing any panic to that message.
    pub fn dispatch(&mut self, message: EmperorMessage) {
        let kind = message.kind();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.handle_message(message)));
        if outcome.is_err() {
            tracing::error!(kind, "message handler panicked; loop continues");
        }
    }

    fn handle_message(&mut self, message: EmperorMessage) {
        match message {
            EmperorMessage::SettingsChanged => self.reload_settings(),
            EmperorMessage::WindowsChanged => self.refresh_icon(),
            EmperorMessage::HandoffReceived(bytes) => self.handle_handoff(&bytes),
            EmperorMessage::HotkeyPressed(index) => self.handle_hotkey(index),
            EmperorMessage::TrayMenu(action) => self.handle_tray_menu(action),
            EmperorMessage::ThemeChanged { dark } => {
                if self.current_theme_is_dark != Some(dark) {
                    self.current_theme_is_dark = Some(dark);
                    tracing::info!(dark, "system theme changed; reapplying settings");
                    self.reload_settings();
                }
            }
            EmperorMessage::TaskbarCreated => {
                self.icon
                    .handle_taskbar_recreated(self.config.requests_tray_icon(), &self.pool);
            }
            EmperorMessage::Task(work) => work(self),
            // Quit ends the loop in `run` before dispatch sees it.
            EmperorMessage::Quit => {}
        }
    }

    fn reload_settings(&mut self) {
        self.config = load_config();
        self.apply_settings();
    }

    fn refresh_icon(&mut self) {
        self.icon.update_windows(&self.pool.window_summaries());
        self.icon
            .recompute(self.config.requests_tray_icon(), &self.pool);
    }

    /// A secondary launch arrived. A payload that doesn't decode is logged
    /// and discarded; nothing about the primary changes.
    fn handle_handoff(&mut self, bytes: &[u8]) {
        match handoff::decode(bytes) {
            Ok(payload) => {
                tracing::info!(
                    command_line = %payload.command_line,
                    "accepted handed-off launch"
                );
                self.pool.request_window(WindowRequest::from_handoff(payload));
            }
            Err(err) => {
                tracing::warn!(%err, len = bytes.len(), "rejected malformed handoff payload");
            }
        }
    }

    /// A registered hotkey fired: summon its window, or open a new one when
    /// nothing matches.
    fn handle_hotkey(&mut self, index: u32) {
        let Some(binding) = self.hotkeys.binding(index).cloned() else {
            tracing::warn!(index, "hotkey fired with no binding at that index");
            return;
        };
        if self.summoner.summon(&binding.summon.to_args()) {
            return;
        }
        let name = binding
            .summon
            .window_name
            .clone()
            .unwrap_or_else(|| "new".to_string());
        tracing::debug!(%name, "no window matched hotkey; opening one");
        self.pool.request_window(WindowRequest {
            args: vec![crate::branding::LAUNCH_ALIAS.to_string(), name],
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            show_command: crate::SHOW_DEFAULT,
            environment: handoff::capture_environment_block(),
            target_window_name: binding.summon.window_name,
            initial_bounds: None,
            content_to_attach: None,
        });
    }

    fn handle_tray_menu(&mut self, action: TrayMenuAction) {
        match action {
            TrayMenuAction::FocusMostRecent => {
                self.summoner.summon(&SummonArgs::default());
            }
            TrayMenuAction::SummonWindow(id) => {
                self.summoner.summon(&SummonArgs {
                    window_id: Some(id),
                    ..Default::default()
                });
            }
            TrayMenuAction::Quit => self.request_quit(),
        }
    }

    /// Begins shutdown: no new windows are produced, refrigerated threads
    /// are released, and the process exits once the live count hits zero.
    pub fn request_quit(&mut self) {
        tracing::info!("quit requested");
        self.shutdown.request_quit();
        self.pool.drain_idle();
    }
}

/// Drains messages until [`EmperorMessage::Quit`] arrives.
pub fn run(emperor: &mut Emperor, rx: &Receiver<EmperorMessage>) {
    while let Ok(message) = rx.recv() {
        if matches!(message, EmperorMessage::Quit) {
            tracing::info!("main loop exiting");
            break;
        }
        emperor.dispatch(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkeys::{HotkeyBinding, KeyChord, NullHotkeyBackend, MOD_WIN};
    use crate::pool::{HostFactory, ReusePolicy, WindowHost};
    use crate::summon::{NoopSummoner, SummonDescriptor};
    use crate::tray::{IconSurface, WindowSummary};
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    struct RecordingHost {
        seen_args: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl WindowHost for RecordingHost {
        fn run_message_pump(&mut self, request: &WindowRequest) {
            self.seen_args.lock().push(request.args.clone());
        }
    }

    struct Fixture {
        emperor: Emperor,
        tx: Sender<EmperorMessage>,
        rx: Receiver<EmperorMessage>,
        seen_args: Arc<Mutex<Vec<Vec<String>>>>,
        menu_updates: Arc<Mutex<usize>>,
    }

    struct CountingSurface(Arc<Mutex<usize>>);

    impl IconSurface for CountingSurface {
        fn show(&mut self) {}
        fn hide(&mut self) {}
        fn update_windows(&mut self, _windows: &[WindowSummary]) {
            *self.0.lock() += 1;
        }
    }

    fn fixture() -> Fixture {
        let (tx, rx) = unbounded();
        let handle = MainThreadHandle::new(tx.clone(), LifetimeToken::new());
        let shutdown = ShutdownCoordinator::new(true, handle);
        let seen_args: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_factory = Arc::clone(&seen_args);
        let factory: HostFactory = Arc::new(move |_link| {
            Box::new(RecordingHost {
                seen_args: Arc::clone(&seen_in_factory),
            })
        });
        let pool = WindowPool::new(ReusePolicy::TearDown, factory, shutdown.clone(), Box::new(|| {}));
        let menu_updates: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
        let mut hotkeys = HotkeyManager::new(Box::new(NullHotkeyBackend));
        hotkeys.resync(vec![HotkeyBinding {
            chord: KeyChord {
                modifiers: MOD_WIN,
                vkey: 0x51,
            },
            summon: SummonDescriptor {
                window_name: Some("_quake".to_string()),
                ..Default::default()
            },
        }]);
        let icon = NotificationIconArbiter::new(Box::new(CountingSurface(Arc::clone(
            &menu_updates,
        ))));
        let emperor = Emperor::new(
            AppConfig::default(),
            pool,
            shutdown,
            hotkeys,
            icon,
            Box::new(NoopSummoner),
        );
        Fixture {
            emperor,
            tx,
            rx,
            seen_args,
            menu_updates,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met within 5s");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn malformed_handoff_does_not_stop_the_loop() {
        let mut f = fixture();
        let reached = Arc::new(Mutex::new(false));
        let reached_in_task = Arc::clone(&reached);
        f.tx.send(EmperorMessage::HandoffReceived(vec![0xFF, 0x01, 0x02]))
            .unwrap();
        f.tx.send(EmperorMessage::Task(Box::new(move |_| {
            *reached_in_task.lock() = true;
        })))
        .unwrap();
        f.tx.send(EmperorMessage::Quit).unwrap();
        run(&mut f.emperor, &f.rx);
        assert!(*reached.lock(), "loop died on the malformed payload");
        assert_eq!(f.emperor.pool().threads_spawned(), 0);
    }

    #[test]
    fn well_formed_handoff_produces_a_window() {
        let mut f = fixture();
        let payload = crate::handoff::HandoffPayload {
            command_line: "emp new-tab".to_string(),
            environment: String::new(),
            working_directory: "C:\\".to_string(),
            show_command: 1,
        };
        f.tx.send(EmperorMessage::HandoffReceived(crate::handoff::encode(&payload)))
            .unwrap();
        f.tx.send(EmperorMessage::Quit).unwrap();
        run(&mut f.emperor, &f.rx);
        wait_until(|| !f.seen_args.lock().is_empty());
        assert_eq!(f.seen_args.lock()[0], vec!["emp", "new-tab"]);
    }

    #[test]
    fn tasks_posted_across_threads_run_in_fifo_order() {
        let mut f = fixture();
        let order: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let handle = MainThreadHandle::new(f.tx.clone(), LifetimeToken::new());
        let worker = {
            let order = Arc::clone(&order);
            let handle = handle.clone();
            std::thread::spawn(move || {
                for n in 0..10 {
                    let order = Arc::clone(&order);
                    handle.run_on_main(move |_| order.lock().push(n));
                }
                handle.post(EmperorMessage::Quit);
            })
        };
        worker.join().unwrap();
        run(&mut f.emperor, &f.rx);
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn invalidated_token_silently_drops_posts() {
        let (tx, rx) = unbounded();
        let token = LifetimeToken::new();
        let handle = MainThreadHandle::new(tx, token.clone());
        handle.post(EmperorMessage::SettingsChanged);
        assert_eq!(rx.len(), 1);
        token.invalidate();
        handle.post(EmperorMessage::SettingsChanged);
        assert_eq!(rx.len(), 1, "post after invalidation must be dropped");
    }

    #[test]
    fn unmatched_hotkey_falls_back_to_a_new_window() {
        let mut f = fixture();
        f.tx.send(EmperorMessage::HotkeyPressed(0)).unwrap();
        f.tx.send(EmperorMessage::Quit).unwrap();
        run(&mut f.emperor, &f.rx);
        wait_until(|| !f.seen_args.lock().is_empty());
        assert_eq!(f.seen_args.lock()[0], vec!["emp", "_quake"]);
    }

    #[test]
    fn hotkey_with_no_binding_is_ignored() {
        let mut f = fixture();
        f.tx.send(EmperorMessage::HotkeyPressed(99)).unwrap();
        f.tx.send(EmperorMessage::Quit).unwrap();
        run(&mut f.emperor, &f.rx);
        assert_eq!(f.emperor.pool().threads_spawned(), 0);
    }

    #[test]
    fn theme_change_reapplies_settings_only_on_transitions() {
        let mut f = fixture();
        assert_eq!(f.emperor.theme_is_dark(), None);
        f.emperor.dispatch(EmperorMessage::ThemeChanged { dark: true });
        let after_first = *f.menu_updates.lock();
        assert!(after_first > 0);
        assert_eq!(f.emperor.theme_is_dark(), Some(true));

        f.emperor.dispatch(EmperorMessage::ThemeChanged { dark: true });
        assert_eq!(*f.menu_updates.lock(), after_first, "same theme is a no-op");

        f.emperor.dispatch(EmperorMessage::ThemeChanged { dark: false });
        assert!(*f.menu_updates.lock() > after_first);
        assert_eq!(f.emperor.theme_is_dark(), Some(false));
    }

    #[test]
    fn tray_quit_drains_the_pool() {
        let mut f = fixture();
        f.emperor
            .dispatch(EmperorMessage::TrayMenu(TrayMenuAction::Quit));
        // quit with zero windows posts Quit immediately
        let quits = f
            .rx
            .try_iter()
            .filter(|m| matches!(m, EmperorMessage::Quit))
            .count();
        assert_eq!(quits, 1);
    }
}
