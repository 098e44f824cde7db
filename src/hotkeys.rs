//! Global hotkey registration.
//!
//! Hotkeys are registered against the message window from the main thread.
//! The slot index doubles as the OS registration id, so a WM_HOTKEY wparam
//! maps straight back to its binding. Every settings reload unregisters the
//! previous set and registers the new one from scratch; there is no diffing.

use crate::config::AppConfig;
use crate::summon::SummonDescriptor;

pub const MOD_ALT: u32 = 0x0001;
pub const MOD_CONTROL: u32 = 0x0002;
pub const MOD_SHIFT: u32 = 0x0004;
pub const MOD_WIN: u32 = 0x0008;

/// One modifier+key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: u32,
    pub vkey: u32,
}

/// A chord plus what pressing it should summon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub chord: KeyChord,
    pub summon: SummonDescriptor,
}

/// OS-level registration. Swappable so the manager's bookkeeping is testable
/// off the main thread and off Windows.
pub trait HotkeyBackend: Send {
    /// Returns false when the chord is taken by another application; the
    /// binding stays in the table as inactive.
    fn register(&mut self, index: i32, chord: KeyChord) -> bool;
    fn unregister(&mut self, index: i32);
}

/// Backend for builds without hotkey support wired up.
pub struct NullHotkeyBackend;

impl HotkeyBackend for NullHotkeyBackend {
    fn register(&mut self, _index: i32, _chord: KeyChord) -> bool {
        false
    }
    fn unregister(&mut self, _index: i32) {}
}

#[cfg(windows)]
pub struct Win32HotkeyBackend {
    /// Raw handle of the message window; registrations are scoped to it.
    pub hwnd: isize,
}

#[cfg(windows)]
impl HotkeyBackend for Win32HotkeyBackend {
    fn register(&mut self, index: i32, chord: KeyChord) -> bool {
        use windows::Win32::Foundation::HWND;
        use windows::Win32::UI::Input::KeyboardAndMouse::{
            RegisterHotKey, HOT_KEY_MODIFIERS, MOD_NOREPEAT,
        };
        let modifiers = HOT_KEY_MODIFIERS(chord.modifiers) | MOD_NOREPEAT;
        let registered =
            unsafe { RegisterHotKey(HWND(self.hwnd), index, modifiers, chord.vkey) };
        if let Err(err) = registered {
            tracing::warn!(index, ?chord, %err, "hotkey registration failed; leaving slot inactive");
            return false;
        }
        true
    }

    fn unregister(&mut self, index: i32) {
        use windows::Win32::Foundation::HWND;
        use windows::Win32::UI::Input::KeyboardAndMouse::UnregisterHotKey;
        unsafe {
            let _ = UnregisterHotKey(HWND(self.hwnd), index);
        }
    }
}

pub struct HotkeyManager {
    backend: Box<dyn HotkeyBackend>,
    bindings: Vec<HotkeyBinding>,
}

impl HotkeyManager {
    pub fn new(backend: Box<dyn HotkeyBackend>) -> Self {
        HotkeyManager {
            backend,
            bindings: Vec::new(),
        }
    }

    /// Replaces the full registration set. Failed registrations keep their
    /// slot so later indices still line up with WM_HOTKEY ids.
    pub fn resync(&mut self, bindings: Vec<HotkeyBinding>) {
        for index in 0..self.bindings.len() {
            self.backend.unregister(index as i32);
        }
        self.bindings.clear();
        for binding in bindings {
            let index = self.bindings.len() as i32;
            let registered = self.backend.register(index, binding.chord);
            if registered {
                tracing::debug!(index, chord = ?binding.chord, "hotkey registered");
            }
            self.bindings.push(binding);
        }
    }

    /// Looks up the binding for a WM_HOTKEY id.
    pub fn binding(&self, index: u32) -> Option<&HotkeyBinding> {
        self.bindings.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Maps a settings key name onto a Windows virtual-key code.
pub fn vkey_from_name(name: &str) -> Option<u32> {
    let upper = name.trim().to_ascii_uppercase();
    let mut chars = upper.chars();
    match (chars.next()?, chars.clone().next()) {
        (c @ 'A'..='Z', None) => Some(c as u32),
        (c @ '0'..='9', None) => Some(c as u32),
        ('F', Some(_)) => {
            let n: u32 = upper[1..].parse().ok()?;
            if (1..=12).contains(&n) {
                Some(0x70 + n - 1)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Builds the binding table from settings, skipping entries whose key name
/// doesn't parse.
pub fn bindings_from_config(config: &AppConfig) -> Vec<HotkeyBinding> {
    let mut bindings = Vec::new();
    for setting in &config.global_hotkeys {
        let Some(vkey) = vkey_from_name(&setting.key) else {
            tracing::warn!(key = %setting.key, "unrecognized hotkey key name; skipping entry");
            continue;
        };
        let mut modifiers = 0;
        if setting.ctrl {
            modifiers |= MOD_CONTROL;
        }
        if setting.alt {
            modifiers |= MOD_ALT;
        }
        if setting.shift {
            modifiers |= MOD_SHIFT;
        }
        if setting.win {
            modifiers |= MOD_WIN;
        }
        bindings.push(HotkeyBinding {
            chord: KeyChord { modifiers, vkey },
            summon: SummonDescriptor {
                window_name: setting.window_name.clone().filter(|n| !n.is_empty()),
                desktop: setting.desktop,
                monitor: setting.monitor,
                toggle_visibility: setting.toggle_visibility,
                dropdown_duration: setting.dropdown_duration,
            },
        });
    }
    bindings
}
