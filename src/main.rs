#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    windows_main::run()
}

#[cfg(not(windows))]
fn main() {
    eprintln!("emperor is a Windows shell coordinator; this build target has no entry point");
    std::process::exit(1);
}

#[cfg(windows)]
mod windows_main {
    use anyhow::Result;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    use emperor::config::{self, load_config};
    use emperor::dispatch::{Emperor, EmperorMessage, LifetimeToken, MainThreadHandle};
    use emperor::handoff::{capture_environment_block, HandoffPayload};
    use emperor::hotkeys::{HotkeyManager, Win32HotkeyBackend};
    use emperor::host::Win32WindowHost;
    use emperor::instance::{acquire_or_handoff, StartupOutcome};
    use emperor::message_window::{system_uses_dark_theme, MessageWindow};
    use emperor::persistence;
    use emperor::pool::{ReusePolicy, WindowPool, WindowRequest};
    use emperor::shutdown::ShutdownCoordinator;
    use emperor::summon::NoopSummoner;
    use emperor::tray::{action_from_menu_id, NotificationIconArbiter, TraySurface, TrayMenuAction};

    pub fn run() -> Result<()> {
        tracing_subscriber::fmt::init();

        let config = load_config();
        let show_command = startup_show_command();
        let launch = HandoffPayload {
            command_line: raw_command_line(),
            environment: capture_environment_block(),
            working_directory: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            show_command,
        };

        let claim = match acquire_or_handoff(config.isolated_mode, &launch) {
            StartupOutcome::BecamePrimary(claim) => claim,
            StartupOutcome::HandoffSucceeded => return Ok(()),
            StartupOutcome::HandoffFailed => {
                // Transient-environment failure: another instance holds the
                // claim but never became reachable. Do nothing further.
                tracing::error!("could not reach the running instance; giving up");
                return Ok(());
            }
        };

        let (tx, rx) = unbounded();
        let token = LifetimeToken::new();
        let handle = MainThreadHandle::new(tx, token.clone());

        let message_window = MessageWindow::create(handle.clone())?;

        let shutdown = ShutdownCoordinator::new(config.allow_headless, handle.clone());
        let pool = WindowPool::new(
            ReusePolicy::from_config(&config),
            Win32WindowHost::factory(),
            shutdown.clone(),
            Box::new({
                let handle = handle.clone();
                move || handle.post(EmperorMessage::WindowsChanged)
            }),
        );

        let hotkeys = HotkeyManager::new(Box::new(Win32HotkeyBackend {
            hwnd: message_window.raw_hwnd(),
        }));
        let icon = NotificationIconArbiter::new(Box::new(TraySurface::new()));
        wire_tray_events(handle.clone());

        // Orphaned session buffers are swept at exit only when saved layouts
        // existed at launch; a fresh profile has nothing to reconcile.
        let had_layouts_at_launch = persistence::load_state().has_layouts();

        let mut emperor = Emperor::new(
            config,
            pool.clone(),
            shutdown,
            hotkeys,
            icon,
            Box::new(NoopSummoner),
        );
        emperor.apply_settings();
        emperor.dispatch(EmperorMessage::ThemeChanged {
            dark: system_uses_dark_theme(),
        });

        pool.request_window(WindowRequest {
            args: std::env::args().collect(),
            cwd: launch.working_directory.clone(),
            show_command,
            environment: launch.environment.clone(),
            target_window_name: None,
            initial_bounds: None,
            content_to_attach: None,
        });

        relocate_working_directory();

        main_loop(&mut emperor, &rx, &handle);
        token.invalidate();

        finalize(had_layouts_at_launch);

        // Window threads may be parked in blocking pumps; state is flushed,
        // so end the process without waiting for them.
        drop(message_window);
        drop(claim);
        persistence::hard_exit(0)
    }

    /// Interleaves the Win32 message pump (wndproc traffic for the message
    /// window and tray) with the coordinator channel.
    fn main_loop(
        emperor: &mut Emperor,
        rx: &crossbeam_channel::Receiver<EmperorMessage>,
        handle: &MainThreadHandle,
    ) {
        use windows::Win32::UI::WindowsAndMessaging::{
            DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE, WM_QUIT,
        };

        let mut last_config_mtime = config::config_modified_time();
        let mut ticks: u32 = 0;
        loop {
            unsafe {
                let mut msg = MSG::default();
                while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                    if msg.message == WM_QUIT {
                        return;
                    }
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }

            while let Ok(message) = rx.try_recv() {
                if matches!(message, EmperorMessage::Quit) {
                    tracing::info!("main loop exiting");
                    return;
                }
                emperor.dispatch(message);
            }

            // Settings edits are picked up by polling the file's mtime about
            // once a second.
            ticks = ticks.wrapping_add(1);
            if ticks % 100 == 0 {
                let mtime = config::config_modified_time();
                if mtime != last_config_mtime {
                    last_config_mtime = mtime;
                    handle.post(EmperorMessage::SettingsChanged);
                }
            }

            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn wire_tray_events(handle: MainThreadHandle) {
        use tray_icon::menu::MenuEvent;
        use tray_icon::{MouseButton, MouseButtonState, TrayIconEvent};

        let menu_handle = handle.clone();
        MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
            if let Some(action) = action_from_menu_id(event.id.0.as_str()) {
                menu_handle.post(EmperorMessage::TrayMenu(action));
            }
        }));
        TrayIconEvent::set_event_handler(Some(move |event: TrayIconEvent| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                handle.post(EmperorMessage::TrayMenu(TrayMenuAction::FocusMostRecent));
            }
        }));
    }

    /// Flushes persisted state and sweeps orphaned session buffers.
    fn finalize(had_layouts_at_launch: bool) {
        let state = persistence::load_state();
        if let Err(err) = persistence::save_state(&state) {
            tracing::warn!(%err, "failed to flush persisted state");
        }
        if had_layouts_at_launch {
            if let Ok(dir) = config::get_data_directory() {
                match persistence::sweep_session_buffers(&dir, &state.live_session_ids()) {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "swept orphaned session buffers");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(%err, "session buffer sweep failed"),
                }
            }
        }
    }

    fn raw_command_line() -> String {
        use windows::Win32::System::Environment::GetCommandLineW;
        unsafe { GetCommandLineW().to_string().unwrap_or_default() }
    }

    /// Show command the launcher asked for, usually set by shell shortcuts.
    fn startup_show_command() -> u32 {
        use windows::Win32::System::Threading::{GetStartupInfoW, STARTF_USESHOWWINDOW, STARTUPINFOW};
        let mut info = STARTUPINFOW::default();
        unsafe { GetStartupInfoW(&mut info) };
        if (info.dwFlags & STARTF_USESHOWWINDOW) != windows::Win32::System::Threading::STARTUPINFOW_FLAGS(0)
        {
            info.wShowWindow as u32
        } else {
            emperor::SHOW_DEFAULT
        }
    }

    /// Long-lived processes must not pin the directory they were launched
    /// from; move to a stable system directory instead.
    fn relocate_working_directory() {
        let system_root = std::env::var("SystemRoot").unwrap_or_else(|_| "C:\\Windows".to_string());
        let target = format!("{system_root}\\System32");
        if let Err(err) = std::env::set_current_dir(&target) {
            tracing::warn!(%err, %target, "failed to relocate working directory");
        }
    }
}
