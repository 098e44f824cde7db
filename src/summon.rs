//! Summon-window interface.
//!
//! "Summoning" brings an existing window to the foreground, optionally moving
//! it between desktops or monitors. Which window matches a request, and the
//! exact placement rules, belong to the window-management layer; the emperor
//! only builds the request and routes it. [`NoopSummoner`] stands in until a
//! real backend is wired up, reporting that nothing matched so callers fall
//! back to opening a new window.

use serde::{Deserialize, Serialize};

/// Desktop targeting for a summon, as written in the hotkey settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DesktopBehavior {
    /// Leave the window on whatever desktop it lives on.
    #[default]
    Any,
    /// Pull the window to the current virtual desktop.
    ToCurrent,
    /// Only match windows already on the current desktop.
    OnCurrent,
}

/// Monitor targeting for a summon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MonitorBehavior {
    #[default]
    InPlace,
    ToCurrent,
    ToMouse,
}

/// How a matched window should be presented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummonBehavior {
    pub move_to_current_desktop: bool,
    pub toggle_visibility: bool,
    /// Slide-in duration in milliseconds; 0 means appear instantly.
    pub dropdown_duration: u32,
    pub to_monitor: MonitorBehavior,
}

/// A fully resolved summon request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummonArgs {
    pub window_id: Option<u64>,
    pub window_name: Option<String>,
    pub on_current_desktop: bool,
    pub behavior: SummonBehavior,
}

/// Summon target attached to a global hotkey, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummonDescriptor {
    pub window_name: Option<String>,
    pub desktop: DesktopBehavior,
    pub monitor: MonitorBehavior,
    pub toggle_visibility: bool,
    pub dropdown_duration: u32,
}

impl SummonDescriptor {
    /// Resolves the settings-level descriptor into a summon request.
    ///
    /// desktop:any       -> move=false, on_current=false
    /// desktop:toCurrent -> move=true,  on_current=false
    /// desktop:onCurrent -> move=false, on_current=true
    pub fn to_args(&self) -> SummonArgs {
        SummonArgs {
            window_id: None,
            window_name: self.window_name.clone(),
            on_current_desktop: self.desktop == DesktopBehavior::OnCurrent,
            behavior: SummonBehavior {
                move_to_current_desktop: self.desktop == DesktopBehavior::ToCurrent,
                toggle_visibility: self.toggle_visibility,
                dropdown_duration: self.dropdown_duration,
                to_monitor: self.monitor,
            },
        }
    }
}

pub trait WindowSummoner: Send {
    /// Attempts to summon a matching window. Returns true when a window
    /// matched and was summoned; false tells the caller to fall back (for
    /// hotkeys, that means opening a new window instead).
    fn summon(&mut self, args: &SummonArgs) -> bool;
}

/// Stand-in summoner used until the window-management layer provides one.
pub struct NoopSummoner;

impl WindowSummoner for NoopSummoner {
    fn summon(&mut self, args: &SummonArgs) -> bool {
        tracing::debug!(?args, "no summon backend attached; nothing matched");
        false
    }
}
