//! Emperor core library
//!
//! The "emperor" is the process-wide coordinator for the multi-window shell:
//! it claims single-instance ownership (or forwards the launch to the running
//! primary), owns the pool of window threads, arbitrates the notification
//! icon, keeps global hotkeys registered, and decides when the process exits.
//!
//! Architecture:
//! - The main thread runs the dispatch loop (dispatch module) and is the only
//!   thread allowed to touch hotkey registration and the tray icon.
//! - Each window runs on its own thread owned by the pool (pool module);
//!   closed windows may be refrigerated for reuse instead of torn down.
//! - A second launch of the process hands its command line over to the
//!   primary instance via the handoff codec (handoff + instance modules).

pub mod config;
pub mod dispatch;
pub mod handoff;
pub mod hotkeys;
pub mod instance;
pub mod persistence;
pub mod pool;
pub mod shutdown;
pub mod summon;
pub mod tray;

#[cfg(windows)]
pub mod host;
#[cfg(windows)]
pub mod message_window;

/// Default show command (SW_SHOWDEFAULT) used when a launch carries none.
pub const SHOW_DEFAULT: u32 = 10;

/// Tag carried in every cross-process handoff so stray WM_COPYDATA traffic
/// from other applications is ignored. Spells "EMPEROR1".
pub const HANDOFF_MAGIC: u64 = 0x454D_5045_524F_5231;

/// Build-variant identity. The discovery key doubles as the name of the
/// single-instance mutex and the message window class, so two differently
/// branded builds can run side by side without stealing each other's
/// launches.
pub mod branding {
    #[cfg(feature = "branding-release")]
    pub const DISCOVERY_KEY: &str = "Emperor Release";
    #[cfg(all(feature = "branding-preview", not(feature = "branding-release")))]
    pub const DISCOVERY_KEY: &str = "Emperor Preview";
    #[cfg(all(
        feature = "branding-canary",
        not(any(feature = "branding-release", feature = "branding-preview"))
    ))]
    pub const DISCOVERY_KEY: &str = "Emperor Canary";
    #[cfg(not(any(
        feature = "branding-release",
        feature = "branding-preview",
        feature = "branding-canary"
    )))]
    pub const DISCOVERY_KEY: &str = "Emperor Dev";

    pub const APP_NAME: &str = "Emperor";

    /// Command alias used when a hotkey falls through to "open a new window".
    pub const LAUNCH_ALIAS: &str = "emp";

    /// Directory name for config/state under the per-user data dir.
    #[cfg(feature = "branding-release")]
    pub const PRODUCT_DIR: &str = "Emperor";
    #[cfg(all(feature = "branding-preview", not(feature = "branding-release")))]
    pub const PRODUCT_DIR: &str = "EmperorPreview";
    #[cfg(all(
        feature = "branding-canary",
        not(any(feature = "branding-release", feature = "branding-preview"))
    ))]
    pub const PRODUCT_DIR: &str = "EmperorCanary";
    #[cfg(not(any(
        feature = "branding-release",
        feature = "branding-preview",
        feature = "branding-canary"
    )))]
    pub const PRODUCT_DIR: &str = "EmperorDev";
}

pub use dispatch::{Emperor, EmperorMessage, LifetimeToken, MainThreadHandle};
pub use handoff::{decode, encode, CodecError, HandoffPayload};
pub use instance::StartupOutcome;
pub use pool::{ReusePolicy, WindowHost, WindowPool, WindowRequest};
pub use shutdown::ShutdownCoordinator;
