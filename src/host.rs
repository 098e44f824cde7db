//! Real window host.
//!
//! Runs one top-level window and its message pump on the calling (pool)
//! thread. The terminal content itself is attached by layers above; this
//! host owns only the frame lifecycle the pool cares about: create, show,
//! pump until close, return.

use std::sync::Once;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW, PostQuitMessage,
    RegisterClassW, ShowWindow, TranslateMessage, CW_USEDEFAULT, MSG, SHOW_WINDOW_CMD,
    WINDOW_EX_STYLE, WM_DESTROY, WNDCLASSW, WS_OVERLAPPEDWINDOW,
};

use crate::pool::{HostFactory, WindowHost, WindowLink, WindowRequest};

const FRAME_CLASS: &str = "EmperorFrame";

static REGISTER_CLASS: Once = Once::new();

pub struct Win32WindowHost {
    link: WindowLink,
}

impl Win32WindowHost {
    pub fn factory() -> HostFactory {
        std::sync::Arc::new(|link| Box::new(Win32WindowHost { link }))
    }
}

impl WindowHost for Win32WindowHost {
    fn run_message_pump(&mut self, request: &WindowRequest) {
        let title = request
            .target_window_name
            .clone()
            .unwrap_or_else(|| crate::branding::APP_NAME.to_string());
        self.link.set_title(&title);
        self.link.set_quake_window(request.target_window_name.as_deref() == Some("_quake"));

        let class_name = wide(FRAME_CLASS);
        let title_wide = wide(&title);

        unsafe {
            let Ok(instance) = GetModuleHandleW(None) else {
                tracing::error!("GetModuleHandleW failed; window not created");
                return;
            };

            REGISTER_CLASS.call_once(|| {
                let class_name = wide(FRAME_CLASS);
                let class = WNDCLASSW {
                    lpfnWndProc: Some(frame_wndproc),
                    hInstance: instance.into(),
                    lpszClassName: PCWSTR(class_name.as_ptr()),
                    ..Default::default()
                };
                if RegisterClassW(&class) == 0 {
                    tracing::error!("RegisterClassW failed for the frame class");
                }
            });

            let (x, y, width, height) = match request.initial_bounds {
                Some(b) => (b.x, b.y, b.width, b.height),
                None => (CW_USEDEFAULT, CW_USEDEFAULT, CW_USEDEFAULT, CW_USEDEFAULT),
            };

            let hwnd = CreateWindowExW(
                WINDOW_EX_STYLE(0),
                PCWSTR(class_name.as_ptr()),
                PCWSTR(title_wide.as_ptr()),
                WS_OVERLAPPEDWINDOW,
                x,
                y,
                width,
                height,
                None,
                None,
                instance,
                None,
            );
            if hwnd.0 == 0 {
                tracing::error!(id = self.link.id(), "CreateWindowExW failed");
                return;
            }
            ShowWindow(hwnd, SHOW_WINDOW_CMD(request.show_command as i32));
            tracing::info!(id = self.link.id(), %title, "window created");

            let mut msg = MSG::default();
            while GetMessageW(&mut msg, None, 0, 0).as_bool() {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }
        tracing::debug!(id = self.link.id(), "window message pump ended");
    }
}

unsafe extern "system" fn frame_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_DESTROY => {
            PostQuitMessage(0);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}
