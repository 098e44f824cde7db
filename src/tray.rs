//! Notification-area icon.
//!
//! The icon is demand-driven: it exists while settings ask for it or while
//! any quake window lives, and disappears otherwise. The arbiter recomputes
//! that condition on every windows/settings change but touches the OS only on
//! actual transitions. The shell notification area forgets icons when the
//! taskbar process restarts, so a TaskbarCreated broadcast re-adds ours.

use crate::pool::WindowPool;

/// One live window as shown in the icon's context menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSummary {
    pub id: u64,
    pub title: String,
    pub name: Option<String>,
}

/// Menu label: `#<id>: <title>`, with the window name appended when set.
pub fn menu_label(summary: &WindowSummary) -> String {
    match &summary.name {
        Some(name) if !name.is_empty() => {
            format!("#{}: {} [{}]", summary.id, summary.title, name)
        }
        _ => format!("#{}: {}", summary.id, summary.title),
    }
}

/// What a click in the icon menu asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayMenuAction {
    /// Left click or the top menu item: focus the most recently used window.
    FocusMostRecent,
    SummonWindow(u64),
    Quit,
}

pub const MENU_ID_FOCUS: &str = "focus-mru";
pub const MENU_ID_QUIT: &str = "quit";

pub fn summon_menu_id(window_id: u64) -> String {
    format!("summon-{window_id}")
}

/// Parses a menu item id back into its action.
pub fn action_from_menu_id(id: &str) -> Option<TrayMenuAction> {
    match id {
        MENU_ID_FOCUS => Some(TrayMenuAction::FocusMostRecent),
        MENU_ID_QUIT => Some(TrayMenuAction::Quit),
        other => other
            .strip_prefix("summon-")
            .and_then(|raw| raw.parse().ok())
            .map(TrayMenuAction::SummonWindow),
    }
}

/// The OS-facing side of the icon. Swappable for tests and non-Windows
/// builds; the arbiter owns the show/hide policy. The arbiter lives inside
/// the main-thread coordinator and never crosses threads, so the surface
/// need not be `Send` (the real tray icon is not).
pub trait IconSurface {
    fn show(&mut self);
    fn hide(&mut self);
    /// Refreshes the per-window entries in the context menu.
    fn update_windows(&mut self, _windows: &[WindowSummary]) {}
}

pub struct NullIconSurface;

impl IconSurface for NullIconSurface {
    fn show(&mut self) {}
    fn hide(&mut self) {}
}

pub struct NotificationIconArbiter {
    surface: Box<dyn IconSurface>,
    shown: bool,
}

impl NotificationIconArbiter {
    pub fn new(surface: Box<dyn IconSurface>) -> Self {
        NotificationIconArbiter {
            surface,
            shown: false,
        }
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }

    /// Re-evaluates whether the icon should exist and applies the result on
    /// transitions only.
    pub fn recompute(&mut self, settings_request_icon: bool, pool: &WindowPool) {
        let wanted = settings_request_icon || pool.any_quake_window();
        if wanted == self.shown {
            return;
        }
        if wanted {
            tracing::debug!("showing notification icon");
            self.surface.show();
        } else {
            tracing::debug!("hiding notification icon");
            self.surface.hide();
        }
        self.shown = wanted;
    }

    pub fn update_windows(&mut self, windows: &[WindowSummary]) {
        self.surface.update_windows(windows);
    }

    /// The taskbar restarted and dropped every icon; if ours should exist,
    /// add it again.
    pub fn handle_taskbar_recreated(&mut self, settings_request_icon: bool, pool: &WindowPool) {
        self.shown = false;
        self.recompute(settings_request_icon, pool);
    }
}

/// Real notification icon backed by the `tray-icon` crate. Lives on the main
/// thread only.
#[cfg(windows)]
pub struct TraySurface {
    icon: Option<tray_icon::TrayIcon>,
    windows: Vec<WindowSummary>,
}

#[cfg(windows)]
impl TraySurface {
    pub fn new() -> Self {
        TraySurface {
            icon: None,
            windows: Vec::new(),
        }
    }

    fn build_menu(&self) -> tray_icon::menu::Menu {
        use tray_icon::menu::{Menu, MenuItem, PredefinedMenuItem, Submenu};

        let menu = Menu::new();
        let focus = MenuItem::with_id(MENU_ID_FOCUS, "Focus most recent window", true, None);
        let _ = menu.append(&focus);

        if !self.windows.is_empty() {
            let submenu = Submenu::new("Windows", true);
            for summary in &self.windows {
                let item = MenuItem::with_id(
                    summon_menu_id(summary.id),
                    menu_label(summary),
                    true,
                    None,
                );
                let _ = submenu.append(&item);
            }
            let _ = menu.append(&submenu);
        }

        let _ = menu.append(&PredefinedMenuItem::separator());
        let quit = MenuItem::with_id(MENU_ID_QUIT, "Quit", true, None);
        let _ = menu.append(&quit);
        menu
    }

    fn plain_icon() -> Option<tray_icon::Icon> {
        // Flat square placeholder until real art is wired in.
        let size = 16u32;
        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for _ in 0..size * size {
            rgba.extend_from_slice(&[40, 44, 52, 255]);
        }
        tray_icon::Icon::from_rgba(rgba, size, size).ok()
    }
}

#[cfg(windows)]
impl IconSurface for TraySurface {
    fn show(&mut self) {
        if self.icon.is_some() {
            return;
        }
        let mut builder = tray_icon::TrayIconBuilder::new()
            .with_tooltip(crate::branding::APP_NAME)
            .with_menu(Box::new(self.build_menu()));
        if let Some(icon) = Self::plain_icon() {
            builder = builder.with_icon(icon);
        }
        match builder.build() {
            Ok(icon) => self.icon = Some(icon),
            Err(err) => tracing::error!(%err, "failed to create notification icon"),
        }
    }

    fn hide(&mut self) {
        self.icon = None;
    }

    fn update_windows(&mut self, windows: &[WindowSummary]) {
        self.windows = windows.to_vec();
        if let Some(icon) = &self.icon {
            icon.set_menu(Some(Box::new(self.build_menu())));
        }
    }
}
