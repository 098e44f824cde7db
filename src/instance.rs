//! Single-instance coordination.
//!
//! Exactly one process per build variant owns the named mutex and becomes the
//! primary. Every other launch finds the primary's message window and hands
//! its launch over via WM_COPYDATA, retrying with a growing backoff to ride
//! out the race where the previous primary is mid-shutdown (mutex released,
//! message window already gone).

use std::time::Duration;

#[cfg(windows)]
use crate::handoff::HandoffPayload;

/// Result of the startup race.
pub enum StartupOutcome {
    /// This process owns the mutex and must run the full shell.
    BecamePrimary(InstanceClaim),
    /// The launch was delivered to an existing primary; exit quietly.
    HandoffSucceeded,
    /// No primary could be reached within the retry budget. The caller
    /// decides whether to run standalone or give up.
    HandoffFailed,
}

/// Ownership of the single-instance mutex, held for the life of the primary.
pub struct InstanceClaim {
    #[cfg(windows)]
    mutex: windows::Win32::Foundation::HANDLE,
}

// The claim only wraps a kernel handle; releasing it from another thread
// during shutdown is fine.
unsafe impl Send for InstanceClaim {}

impl InstanceClaim {
    /// Claim without a mutex, for isolated mode.
    pub fn isolated() -> Self {
        InstanceClaim {
            #[cfg(windows)]
            mutex: windows::Win32::Foundation::HANDLE(0),
        }
    }
}

#[cfg(windows)]
impl Drop for InstanceClaim {
    fn drop(&mut self) {
        use windows::Win32::Foundation::CloseHandle;
        if self.mutex.0 != 0 {
            unsafe {
                let _ = CloseHandle(self.mutex);
            }
        }
    }
}

/// Retry delays between handoff attempts: 50ms growing by half each time,
/// stopping once a delay reaches 10 seconds. Roughly 29 seconds end to end.
pub fn backoff_schedule() -> Vec<Duration> {
    let mut schedule = Vec::new();
    let mut delay_ms: u64 = 50;
    while delay_ms < 10_000 {
        schedule.push(Duration::from_millis(delay_ms));
        delay_ms += delay_ms / 2;
    }
    schedule
}

/// Runs the startup race: claim the mutex, or deliver `payload` to whoever
/// holds it. `isolated` bypasses the whole mechanism.
#[cfg(windows)]
pub fn acquire_or_handoff(isolated: bool, payload: &HandoffPayload) -> StartupOutcome {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS};
    use windows::Win32::System::Threading::CreateMutexW;

    if isolated {
        tracing::info!("isolated mode: skipping single-instance coordination");
        return StartupOutcome::BecamePrimary(InstanceClaim::isolated());
    }

    let mutex_name = wide(crate::branding::DISCOVERY_KEY);

    for (attempt, delay) in backoff_schedule().into_iter().enumerate() {
        let handle = unsafe { CreateMutexW(None, true, PCWSTR(mutex_name.as_ptr())) };
        match handle {
            Ok(handle) => {
                if unsafe { GetLastError() } != ERROR_ALREADY_EXISTS {
                    tracing::info!(attempt, "claimed single-instance mutex; running as primary");
                    return StartupOutcome::BecamePrimary(InstanceClaim { mutex: handle });
                }
                // Someone else owns it; drop our reference before handing off.
                unsafe {
                    let _ = CloseHandle(handle);
                }
            }
            Err(err) => {
                tracing::warn!(attempt, %err, "CreateMutexW failed; retrying");
                std::thread::sleep(delay);
                continue;
            }
        }

        if deliver_to_primary(payload) {
            tracing::info!(attempt, "launch handed off to the running primary");
            return StartupOutcome::HandoffSucceeded;
        }

        // Mutex exists but the window is missing or unresponsive; the old
        // primary may be mid-shutdown. Back off and race again.
        tracing::debug!(attempt, ?delay, "primary unreachable; backing off");
        std::thread::sleep(delay);
    }

    tracing::error!("no primary reachable after exhausting the retry budget");
    StartupOutcome::HandoffFailed
}

/// Finds the primary's message window and sends it the encoded launch.
/// Returns true only when the primary acknowledged the message.
#[cfg(windows)]
fn deliver_to_primary(payload: &HandoffPayload) -> bool {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{LPARAM, WPARAM};
    use windows::Win32::System::DataExchange::COPYDATASTRUCT;
    use windows::Win32::UI::WindowsAndMessaging::{
        FindWindowW, SendMessageTimeoutW, SMTO_ABORTIFHUNG, SMTO_ERRORONEXIT, WM_COPYDATA,
    };

    let class_name = wide(crate::branding::DISCOVERY_KEY);
    let hwnd = unsafe { FindWindowW(PCWSTR(class_name.as_ptr()), PCWSTR::null()) };
    if hwnd.0 == 0 {
        return false;
    }

    let mut bytes = crate::handoff::encode(payload);
    let copy_data = COPYDATASTRUCT {
        dwData: crate::HANDOFF_MAGIC as usize,
        cbData: bytes.len() as u32,
        lpData: bytes.as_mut_ptr().cast(),
    };

    let mut reply: usize = 0;
    let sent = unsafe {
        SendMessageTimeoutW(
            hwnd,
            WM_COPYDATA,
            WPARAM(0),
            LPARAM(&copy_data as *const COPYDATASTRUCT as isize),
            SMTO_ABORTIFHUNG | SMTO_ERRORONEXIT,
            10_000,
            Some(&mut reply),
        )
    };
    sent.0 != 0 && reply != 0
}

#[cfg(windows)]
fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_at_fifty_millis() {
        let schedule = backoff_schedule();
        assert_eq!(schedule[0], Duration::from_millis(50));
    }

    #[test]
    fn backoff_grows_by_half_each_step() {
        let schedule = backoff_schedule();
        for pair in schedule.windows(2) {
            let current = pair[0].as_millis() as u64;
            assert_eq!(pair[1], Duration::from_millis(current + current / 2));
        }
    }

    #[test]
    fn backoff_stops_below_ten_seconds() {
        let schedule = backoff_schedule();
        assert!(schedule.iter().all(|d| *d < Duration::from_secs(10)));
        // the next step would have crossed the cap
        let last = schedule.last().unwrap().as_millis() as u64;
        assert!(last + last / 2 >= 10_000);
    }

    #[test]
    fn backoff_budget_is_tens_of_seconds() {
        let total: Duration = backoff_schedule().iter().sum();
        assert!(total >= Duration::from_secs(20));
        assert!(total <= Duration::from_secs(30));
    }
}
