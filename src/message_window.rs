//! Hidden message-only window.
//!
//! The primary instance needs one HWND for everything that arrives as a
//! window message: WM_COPYDATA handoffs from secondary launches, WM_HOTKEY
//! from global hotkey registrations, theme broadcasts, and the taskbar's
//! restart notification. The window class is named after the discovery key
//! so secondaries can find it with FindWindowW. The wndproc only translates
//! messages into [`EmperorMessage`]s; all real work happens in the dispatch
//! loop.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::DataExchange::COPYDATASTRUCT;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Registry::{RegGetValueW, HKEY_CURRENT_USER, RRF_RT_REG_DWORD};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassW, RegisterWindowMessageW,
    HWND_MESSAGE, WINDOW_EX_STYLE, WINDOW_STYLE, WM_COPYDATA, WM_HOTKEY, WM_SETTINGCHANGE,
    WNDCLASSW,
};

use crate::dispatch::{EmperorMessage, MainThreadHandle};

static MAIN_HANDLE: OnceCell<MainThreadHandle> = OnceCell::new();
static TASKBAR_CREATED_MSG: OnceCell<u32> = OnceCell::new();

pub struct MessageWindow {
    hwnd: HWND,
}

impl MessageWindow {
    /// Registers the class and creates the message-only window. One per
    /// process; a second call fails.
    pub fn create(handle: MainThreadHandle) -> Result<Self> {
        MAIN_HANDLE
            .set(handle)
            .map_err(|_| anyhow!("message window already created"))?;

        let class_name: Vec<u16> = crate::branding::DISCOVERY_KEY
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        unsafe {
            let instance = GetModuleHandleW(None)
                .map_err(|e| anyhow!("GetModuleHandleW failed: {e}"))?;

            let class = WNDCLASSW {
                lpfnWndProc: Some(wndproc),
                hInstance: instance.into(),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                ..Default::default()
            };
            if RegisterClassW(&class) == 0 {
                return Err(anyhow!("RegisterClassW failed"));
            }

            // The shell re-broadcasts this registered message whenever the
            // taskbar process restarts.
            let taskbar_created = RegisterWindowMessageW(w!("TaskbarCreated"));
            let _ = TASKBAR_CREATED_MSG.set(taskbar_created);

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                PCWSTR(class_name.as_ptr()),
                PCWSTR(class_name.as_ptr()),
                WINDOW_STYLE(0),
                0,
                0,
                0,
                0,
                HWND_MESSAGE,
                None,
                instance,
                None,
            );
            if hwnd.0 == 0 {
                return Err(anyhow!("CreateWindowExW failed for the message window"));
            }
            tracing::debug!(hwnd = hwnd.0, "message window created");
            Ok(MessageWindow { hwnd })
        }
    }

    /// Raw handle for hotkey registration.
    pub fn raw_hwnd(&self) -> isize {
        self.hwnd.0
    }
}

impl Drop for MessageWindow {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

unsafe extern "system" fn wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    let Some(handle) = MAIN_HANDLE.get() else {
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    };

    match msg {
        WM_COPYDATA => {
            // lparam is a pointer from an arbitrary sender; never trust it.
            if lparam.0 == 0 {
                return LRESULT(0);
            }
            let copy_data = &*(lparam.0 as *const COPYDATASTRUCT);
            // Only accept our own handoff traffic; other applications
            // broadcast WM_COPYDATA too.
            if copy_data.dwData != crate::HANDOFF_MAGIC as usize || copy_data.lpData.is_null() {
                return LRESULT(0);
            }
            let bytes = std::slice::from_raw_parts(
                copy_data.lpData as *const u8,
                copy_data.cbData as usize,
            )
            .to_vec();
            handle.post(EmperorMessage::HandoffReceived(bytes));
            // Nonzero tells the sender the launch was accepted.
            LRESULT(1)
        }
        WM_HOTKEY => {
            handle.post(EmperorMessage::HotkeyPressed(wparam.0 as u32));
            LRESULT(0)
        }
        WM_SETTINGCHANGE => {
            if wparam.0 == 0 && lparam.0 != 0 {
                let area = PCWSTR(lparam.0 as *const u16);
                if matches!(area.to_string(), Ok(s) if s == "ImmersiveColorSet") {
                    handle.post(EmperorMessage::ThemeChanged {
                        dark: system_uses_dark_theme(),
                    });
                }
            }
            LRESULT(0)
        }
        other if Some(&other) == TASKBAR_CREATED_MSG.get() => {
            handle.post(EmperorMessage::TaskbarCreated);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

/// Reads the apps-theme toggle from the registry. Missing value means light.
pub fn system_uses_dark_theme() -> bool {
    let mut value: u32 = 1;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        RegGetValueW(
            HKEY_CURRENT_USER,
            w!("Software\\Microsoft\\Windows\\CurrentVersion\\Themes\\Personalize"),
            w!("AppsUseLightTheme"),
            RRF_RT_REG_DWORD,
            None,
            Some(&mut value as *mut u32 as *mut _),
            Some(&mut size),
        )
    };
    status.is_ok() && value == 0
}
