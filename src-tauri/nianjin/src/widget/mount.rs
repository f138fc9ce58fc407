// 桌面层挂载的 Win32 实现：定位 WorkerW + 把挂件窗口挂进去/摘出来。
//
// 基于壁纸工具通用的 WorkerW 手法：给 Progman 发 0x052C 促使壳层
// 创建壁纸宿主层，然后按壳层拓扑找到它。未公开接口，壳层版本间
// 行为有差异，所以类名/消息号全部集中在 `shell` 常量模块里。

use nianjin_core::attach::{
    AttachError, HostHandle, ShellLayerLocator, SurfaceHandle, WindowReparenter,
};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use windows_sys::Win32::Foundation::{GetLastError, BOOL, HWND, LPARAM, RECT};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, FindWindowExW, FindWindowW, GetClassNameW, GetClientRect, GetParent,
    GetWindowLongPtrW, IsWindow, SendMessageTimeoutW, SetParent, SetWindowLongPtrW, SetWindowPos,
    ShowWindow, GWL_EXSTYLE, GWL_STYLE, SMTO_ABORTIFHUNG, SWP_FRAMECHANGED, SWP_NOACTIVATE,
    SWP_SHOWWINDOW, SW_SHOW, WS_CAPTION, WS_CHILD, WS_EX_APPWINDOW, WS_EX_NOACTIVATE, WS_POPUP,
    WS_THICKFRAME,
};

/// 壳层实现细节，按 Windows 版本可替换。
mod shell {
    /// 桌面程序管理器的顶层窗口类。
    pub const PROGMAN_CLASS: &str = "Progman";
    /// 壁纸宿主层的窗口类。
    pub const WORKERW_CLASS: &str = "WorkerW";
    /// 桌面图标视图（文件夹视图）的窗口类。
    pub const DEFVIEW_CLASS: &str = "SHELLDLL_DefView";
    /// 发给 Progman 促使创建 WorkerW 的未公开消息。
    pub const SPAWN_WORKERW_MSG: u32 = 0x052C;
    /// Win11 24H2 起 WorkerW 变成 Progman 的子窗口。
    pub const WORKERW_AS_CHILD_BUILD: u32 = 26002;
}

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

unsafe fn hwnd_class(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = GetClassNameW(hwnd, buf.as_mut_ptr(), buf.len() as i32);
    if len > 0 {
        String::from_utf16_lossy(&buf[..len as usize])
    } else {
        "<unknown>".to_string()
    }
}

/// 获取 Windows 构建号，失败返回 0。
fn get_windows_build_number() -> u32 {
    match winver::WindowsVersion::detect() {
        Some(version) => version.build,
        None => 0,
    }
}

/// 检查 Windows 构建号是否大于等于指定值。
fn is_windows_build_ge(build_number: u32) -> bool {
    let current_build = get_windows_build_number();
    current_build >= build_number && current_build != 0
}

/// client rect 是否非零。0 尺寸的 WorkerW 是"假"宿主，
/// 挂上去会被裁剪成永远不可见。
unsafe fn client_rect_nonzero(hwnd: HWND) -> bool {
    let mut rc: RECT = std::mem::zeroed();
    if GetClientRect(hwnd, &mut rc as *mut RECT) == 0 {
        return false;
    }
    rc.right - rc.left > 0 && rc.bottom - rc.top > 0
}

/// 查找承载桌面图标的顶层窗口（shell_top）。
///
/// 关键：File Explorer 窗口也包含 SHELLDLL_DefView（文件夹视图），
/// 会被误判成"桌面"。所以只接受顶层 class 为 WorkerW / Progman 的候选。
unsafe fn find_shell_top() -> Option<HWND> {
    #[derive(Default)]
    struct Search {
        shell_top: HWND,
    }

    unsafe extern "system" fn enum_find_shell_top(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let state = &mut *(lparam as *mut Search);
        let class_name = hwnd_class(hwnd);
        if class_name == shell::WORKERW_CLASS || class_name == shell::PROGMAN_CLASS {
            let def_view =
                FindWindowExW(hwnd, 0, wide(shell::DEFVIEW_CLASS).as_ptr(), std::ptr::null());
            if def_view != 0 {
                state.shell_top = hwnd;
                return 0; // stop
            }
        }
        1 // continue
    }

    let mut search = Search::default();
    EnumWindows(
        Some(enum_find_shell_top),
        (&mut search as *mut Search) as isize,
    );

    if search.shell_top != 0 {
        Some(search.shell_top)
    } else {
        None
    }
}

/// 只在 shell_top 之后的 Z 序链上找 WorkerW（经典壁纸层路径：
/// 挂到 DefView 后面的 WorkerW，天然在图标下面）。
unsafe fn find_workerw_behind(shell_top: HWND) -> Option<HWND> {
    let mut after = shell_top;
    loop {
        let w = FindWindowExW(0, after, wide(shell::WORKERW_CLASS).as_ptr(), std::ptr::null());
        if w == 0 {
            return None;
        }

        // 跳过包含 DefView 的 WorkerW（那是图标宿主或其同层）
        let def_view = FindWindowExW(w, 0, wide(shell::DEFVIEW_CLASS).as_ptr(), std::ptr::null());
        if def_view == 0 && client_rect_nonzero(w) {
            return Some(w);
        }

        after = w;
    }
}

/// 兜底：枚举所有顶层 WorkerW，选一个不含 DefView 且面积最大的。
/// 某些壳层上 WorkerW 不在 shell_top 后面，FindWindowExW 链走不到。
unsafe fn find_any_workerw_without_defview() -> Option<HWND> {
    #[derive(Default)]
    struct Best {
        hwnd: HWND,
        area: i64,
    }

    unsafe extern "system" fn enum_pick(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let best = &mut *(lparam as *mut Best);
        if hwnd_class(hwnd) != shell::WORKERW_CLASS {
            return 1;
        }
        let def_view =
            FindWindowExW(hwnd, 0, wide(shell::DEFVIEW_CLASS).as_ptr(), std::ptr::null());
        if def_view != 0 {
            return 1;
        }
        let mut rc: RECT = std::mem::zeroed();
        if GetClientRect(hwnd, &mut rc as *mut RECT) == 0 {
            return 1;
        }
        let w = rc.right - rc.left;
        let h = rc.bottom - rc.top;
        if w <= 0 || h <= 0 {
            return 1;
        }
        let area = (w as i64) * (h as i64);
        if area > best.area {
            best.area = area;
            best.hwnd = hwnd;
        }
        1
    }

    let mut best = Best::default();
    EnumWindows(Some(enum_pick), (&mut best as *mut Best) as isize);
    if best.hwnd != 0 {
        Some(best.hwnd)
    } else {
        None
    }
}

/// WorkerW 定位器：单次探测，重试节奏由控制器的 tick 驱动。
pub struct WorkerWLocator;

impl ShellLayerLocator for WorkerWLocator {
    fn probe(&mut self) -> Option<HostHandle> {
        unsafe {
            let progman = FindWindowW(wide(shell::PROGMAN_CLASS).as_ptr(), std::ptr::null());
            if progman == 0 {
                eprintln!("[WARN] FindWindowW(Progman) failed，壳层可能还没起来");
                return None;
            }

            // 促使生成 WorkerW。发送是幂等的，每次探测都发一遍，
            // 不同壳层对 wParam 取值不一致：0 / 0xD 都有人用
            let mut _result: usize = 0;
            let _ = SendMessageTimeoutW(
                progman,
                shell::SPAWN_WORKERW_MSG,
                0,
                0,
                SMTO_ABORTIFHUNG,
                1000,
                &mut _result as *mut usize,
            );
            let _ = SendMessageTimeoutW(
                progman,
                shell::SPAWN_WORKERW_MSG,
                0xD,
                0,
                SMTO_ABORTIFHUNG,
                1000,
                &mut _result as *mut usize,
            );

            // Win11 24H2+：WorkerW 直接是 Progman 的子窗口
            if is_windows_build_ge(shell::WORKERW_AS_CHILD_BUILD) {
                let w = FindWindowExW(
                    progman,
                    0,
                    wide(shell::WORKERW_CLASS).as_ptr(),
                    std::ptr::null(),
                );
                if w != 0 && client_rect_nonzero(w) {
                    eprintln!("[DEBUG] workerw (progman child) hwnd={}", w);
                    return Some(HostHandle(w));
                }
            }

            // 经典拓扑：图标宿主后面的兄弟 WorkerW
            if let Some(shell_top) = find_shell_top() {
                if let Some(w) = find_workerw_behind(shell_top) {
                    eprintln!(
                        "[DEBUG] workerw (behind shell_top {}) hwnd={}",
                        shell_top, w
                    );
                    return Some(HostHandle(w));
                }
                if let Some(w) = find_any_workerw_without_defview() {
                    eprintln!("[DEBUG] workerw (any without defview) hwnd={}", w);
                    return Some(HostHandle(w));
                }
            }

            None
        }
    }

    fn host_valid(&self, host: HostHandle) -> bool {
        unsafe { IsWindow(host.0) != 0 }
    }
}

/// Win32 重挂载器：样式剥离 + SetParent + 置底定位。
pub struct Win32Reparenter {
    /// 挂件左上角（挂载后是宿主客户区坐标系，降级后是屏幕坐标系）。
    pub origin: (i32, i32),
    /// 挂件尺寸（物理像素）。
    pub size: (i32, i32),
}

impl WindowReparenter for Win32Reparenter {
    fn attach(&mut self, surface: SurfaceHandle, host: HostHandle) -> Result<(), AttachError> {
        unsafe {
            // 句柄有效性检查（GetLastError=1400 的根因通常是无效 hwnd）
            if IsWindow(surface.0) == 0 {
                return Err(AttachError::ReparentFailed(
                    "widget hwnd is invalid (IsWindow=0)".to_string(),
                ));
            }
            if IsWindow(host.0) == 0 {
                return Err(AttachError::ReparentFailed(
                    "host hwnd is invalid (IsWindow=0)".to_string(),
                ));
            }

            // 剥掉标题栏/边框并变成子窗口（否则 SetParent 后可能仍保持
            // WS_POPUP，导致不可见/不定位等怪问题）
            let style = GetWindowLongPtrW(surface.0, GWL_STYLE);
            let new_style = (style
                & !(WS_POPUP as isize)
                & !(WS_CAPTION as isize)
                & !(WS_THICKFRAME as isize))
                | (WS_CHILD as isize);
            SetWindowLongPtrW(surface.0, GWL_STYLE, new_style);

            // 不抢焦点、不进任务栏/Alt-Tab
            let ex = GetWindowLongPtrW(surface.0, GWL_EXSTYLE);
            let new_ex = (ex | WS_EX_NOACTIVATE as isize) & !(WS_EX_APPWINDOW as isize);
            SetWindowLongPtrW(surface.0, GWL_EXSTYLE, new_ex);

            // SetParent 返回的是旧父窗口，顶层窗口本来就是 NULL，
            // 返回 0 不代表失败；用 GetParent 校验结果，避免误报
            let _old_parent = SetParent(surface.0, host.0);
            if GetParent(surface.0) != host.0 {
                let err = GetLastError();
                return Err(AttachError::ReparentFailed(format!(
                    "SetParent failed (GetParent mismatch). GetLastError={}",
                    err
                )));
            }

            // 挂载后重新定位：有些壳层会在 SetParent 时重置窗口位置。
            // 子窗口坐标是父窗口客户区坐标系；置底保证图标层（若同父）在上面
            const HWND_BOTTOM: HWND = 1;
            let (x, y) = self.origin;
            let (w, h) = self.size;
            SetWindowPos(
                surface.0,
                HWND_BOTTOM,
                x,
                y,
                w,
                h,
                SWP_NOACTIVATE | SWP_SHOWWINDOW | SWP_FRAMECHANGED,
            );
            ShowWindow(surface.0, SW_SHOW);

            eprintln!(
                "[DEBUG] widget mounted: parent hwnd={} class={} at ({}, {}) size={}x{}",
                host.0,
                hwnd_class(host.0),
                x,
                y,
                w,
                h
            );
        }

        Ok(())
    }

    fn detach(&mut self, surface: SurfaceHandle) -> Result<(), AttachError> {
        unsafe {
            if IsWindow(surface.0) == 0 {
                return Err(AttachError::ReparentFailed(
                    "widget hwnd is invalid (IsWindow=0)".to_string(),
                ));
            }

            // 1) 脱离桌面层（父窗口设为 NULL）
            let _prev = SetParent(surface.0, 0);

            // 2) 变回普通 popup（屏幕坐标系），允许激活
            let style = GetWindowLongPtrW(surface.0, GWL_STYLE);
            let new_style = (style & !(WS_CHILD as isize)) | (WS_POPUP as isize);
            SetWindowLongPtrW(surface.0, GWL_STYLE, new_style);

            let ex = GetWindowLongPtrW(surface.0, GWL_EXSTYLE);
            let new_ex = ex & !(WS_EX_NOACTIVATE as isize);
            SetWindowLongPtrW(surface.0, GWL_EXSTYLE, new_ex);

            let (x, y) = self.origin;
            let (w, h) = self.size;
            SetWindowPos(
                surface.0,
                0,
                x,
                y,
                w,
                h,
                SWP_NOACTIVATE | SWP_SHOWWINDOW | SWP_FRAMECHANGED,
            );
            ShowWindow(surface.0, SW_SHOW);

            eprintln!("[DEBUG] widget detached to floating window at ({}, {})", x, y);
        }

        Ok(())
    }
}
