//! Windows 视觉效果相关工具（DWM 模糊等）。
//!
//! 挂件面板的"亚克力"观感：窗口本身开启透明（Tauri window.transparent=true），
//! 前端面板背景带 alpha，再用 DWM BlurBehind 对整个客户区做毛玻璃。

use windows_sys::Win32::{
    Foundation::{BOOL, HWND},
    Graphics::{
        Dwm::{DwmEnableBlurBehindWindow, DWM_BB_BLURREGION, DWM_BB_ENABLE, DWM_BLURBEHIND},
        Gdi::{CreateRectRgn, DeleteObject},
    },
    UI::WindowsAndMessaging::GetClientRect,
};

/// 对挂件窗口的整个客户区启用 DWM 模糊。
///
/// 说明：
/// - DWM 的 blur behind 只在"透明像素"处可见，所以面板背景要有 alpha。
/// - 只设置 blur region 不会让区域自动透明。
pub fn enable_panel_blur(hwnd: HWND) -> Result<(), String> {
    if hwnd == 0 {
        return Err("hwnd is null".into());
    }

    unsafe {
        let mut rect = std::mem::MaybeUninit::uninit();
        if GetClientRect(hwnd, rect.as_mut_ptr()) == 0 {
            return Err("GetClientRect failed".into());
        }
        let rect = rect.assume_init();
        let width = rect.right - rect.left;
        let height = rect.bottom - rect.top;
        if width <= 0 || height <= 0 {
            return Err("client rect is invalid".into());
        }

        let rgn = CreateRectRgn(0, 0, width, height);
        if rgn == 0 {
            return Err("CreateRectRgn failed".into());
        }

        let bb = DWM_BLURBEHIND {
            dwFlags: DWM_BB_ENABLE | DWM_BB_BLURREGION,
            fEnable: 1 as BOOL,
            hRgnBlur: rgn,
            fTransitionOnMaximized: 0 as BOOL,
        };

        let hr = DwmEnableBlurBehindWindow(hwnd, &bb);
        // 释放 GDI object
        let _ = DeleteObject(rgn);

        // windows-sys HRESULT: 0 表示 S_OK
        if hr != 0 {
            return Err(format!(
                "DwmEnableBlurBehindWindow failed: HRESULT=0x{hr:08X}"
            ));
        }
        Ok(())
    }
}

/// 关闭窗口 blur behind。
pub fn disable_blur(hwnd: HWND) -> Result<(), String> {
    if hwnd == 0 {
        return Err("hwnd is null".into());
    }
    unsafe {
        let bb = DWM_BLURBEHIND {
            dwFlags: DWM_BB_ENABLE,
            fEnable: 0 as BOOL,
            hRgnBlur: 0,
            fTransitionOnMaximized: 0 as BOOL,
        };
        let hr = DwmEnableBlurBehindWindow(hwnd, &bb);
        if hr != 0 {
            return Err(format!(
                "DwmEnableBlurBehindWindow(disable) failed: HRESULT=0x{hr:08X}"
            ));
        }
        Ok(())
    }
}
