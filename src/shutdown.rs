//! Process-lifetime accounting.
//!
//! The coordinator keeps one count of live (visible) windows. Refrigerated
//! window threads do not count: they are capacity, not lifetime. When the
//! count drops to zero the process exits, unless headless mode keeps it
//! alive, in which case only an explicit quit request ends it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::dispatch::{EmperorMessage, MainThreadHandle};

pub struct ShutdownCoordinator {
    live: AtomicUsize,
    quitting: AtomicBool,
    /// Set by whichever path posts the quit message first; `request_quit`
    /// racing the last `on_window_terminated` must not post twice.
    quit_posted: AtomicBool,
    headless_allowed: bool,
    main: MainThreadHandle,
}

impl ShutdownCoordinator {
    pub fn new(headless_allowed: bool, main: MainThreadHandle) -> Arc<Self> {
        Arc::new(ShutdownCoordinator {
            live: AtomicUsize::new(0),
            quitting: AtomicBool::new(false),
            quit_posted: AtomicBool::new(false),
            headless_allowed,
            main,
        })
    }

    pub fn live_windows(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    /// A window thread was spawned or reheated.
    pub fn on_window_spawned(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    /// A window's warm cycle ended (closed and refrigerated, or torn down).
    /// The last one out posts the quit message.
    pub fn on_window_terminated(&self) {
        let previous = self.live.fetch_sub(1, Ordering::SeqCst);
        match previous {
            0 => {
                // Underflow would wrap; clamp and complain.
                self.live.store(0, Ordering::SeqCst);
                tracing::warn!("window terminated with zero live windows recorded");
            }
            1 => {
                if self.is_quitting() || !self.headless_allowed {
                    self.post_quit_once();
                }
            }
            _ => {}
        }
    }

    /// Explicit quit (tray menu, close-all). Takes effect immediately when no
    /// windows remain, otherwise when the last one terminates.
    pub fn request_quit(&self) {
        self.quitting.store(true, Ordering::SeqCst);
        if self.live_windows() == 0 {
            self.post_quit_once();
        }
    }

    fn post_quit_once(&self) {
        if self
            .quit_posted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.main.post(EmperorMessage::Quit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LifetimeToken;
    use crossbeam_channel::{unbounded, Receiver};

    fn coordinator(headless_allowed: bool) -> (Arc<ShutdownCoordinator>, Receiver<EmperorMessage>) {
        let (tx, rx) = unbounded();
        let handle = MainThreadHandle::new(tx, LifetimeToken::new());
        (ShutdownCoordinator::new(headless_allowed, handle), rx)
    }

    fn quit_count(rx: &Receiver<EmperorMessage>) -> usize {
        rx.try_iter()
            .filter(|m| matches!(m, EmperorMessage::Quit))
            .count()
    }

    #[test]
    fn last_window_out_posts_exactly_one_quit() {
        let (coordinator, rx) = coordinator(false);
        coordinator.on_window_spawned();
        coordinator.on_window_spawned();
        coordinator.on_window_terminated();
        assert_eq!(quit_count(&rx), 0);
        coordinator.on_window_terminated();
        assert_eq!(quit_count(&rx), 1);
    }

    #[test]
    fn headless_mode_survives_zero_windows() {
        let (coordinator, rx) = coordinator(true);
        coordinator.on_window_spawned();
        coordinator.on_window_terminated();
        assert_eq!(coordinator.live_windows(), 0);
        assert_eq!(quit_count(&rx), 0);
    }

    #[test]
    fn quit_request_overrides_headless_mode() {
        let (coordinator, rx) = coordinator(true);
        coordinator.on_window_spawned();
        coordinator.request_quit();
        assert_eq!(quit_count(&rx), 0, "a window is still open");
        coordinator.on_window_terminated();
        assert_eq!(quit_count(&rx), 1);
    }

    #[test]
    fn quit_request_with_no_windows_is_immediate() {
        let (coordinator, rx) = coordinator(true);
        coordinator.request_quit();
        assert_eq!(quit_count(&rx), 1);
    }

    #[test]
    fn quit_is_posted_at_most_once_across_both_paths() {
        // request_quit racing the last termination must not double-post:
        // the termination already posted, so the later zero-count check in
        // request_quit stays silent.
        let (coordinator, rx) = coordinator(true);
        coordinator.on_window_spawned();
        coordinator.request_quit();
        coordinator.on_window_terminated();
        coordinator.request_quit();
        assert_eq!(quit_count(&rx), 1);
    }

    #[test]
    fn underflow_is_clamped() {
        let (coordinator, _rx) = coordinator(true);
        coordinator.on_window_terminated();
        assert_eq!(coordinator.live_windows(), 0);
    }
}
