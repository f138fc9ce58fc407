// 挂件窗口模块 - 透明面板 webview 的创建与进度推送

use nianjin_core::progress::YearProgress;
use nianjin_core::settings::AppSettings;
use std::sync::atomic::{AtomicBool, Ordering};
use tauri::{AppHandle, Emitter, WebviewUrl, WebviewWindow, WebviewWindowBuilder};

pub const WIDGET_WINDOW_LABEL: &str = "widget";

// 标记挂件窗口是否已完全初始化（前端 DOM + 事件监听器都已就绪）
// 由 widget_window_ready 命令设置为 true，挂载流程会等待此标记
static WIDGET_WINDOW_READY: AtomicBool = AtomicBool::new(false);

// 点阵排版常量（这些值调过很多轮）
const DOT_SIZE: u32 = 5;
const DOT_GAP: u32 = 6;
const PANEL_PADDING: u32 = 30;
const TEXT_HEIGHT: u32 = 58;

/// 按点阵布局计算面板边长（正方形，逻辑像素）。
pub fn panel_size(dots_per_row: u32, total_days: u32) -> u32 {
    let dots_per_row = dots_per_row.max(1);
    let rows = (total_days + dots_per_row - 1) / dots_per_row;
    let grid_w = dots_per_row * (DOT_SIZE + DOT_GAP);
    let grid_h = rows * (DOT_SIZE + DOT_GAP);
    (grid_w + PANEL_PADDING * 2).max(grid_h + PANEL_PADDING * 2 + TEXT_HEIGHT)
}

pub struct WidgetWindow;

impl WidgetWindow {
    /// 创建挂件窗口。
    ///
    /// 注意：之后不要 close 这个窗口！close 会销毁窗口句柄，
    /// 后续 SetParent 会报 1400（无效句柄）。整个进程生命周期内复用。
    pub fn create(app: &AppHandle, settings: &AppSettings) -> Result<WebviewWindow, String> {
        let total_days = nianjin_core::progress::today().total_days;
        let size = panel_size(settings.dots_per_row, total_days) as f64;

        WebviewWindowBuilder::new(app, WIDGET_WINDOW_LABEL, WebviewUrl::App("index.html".into()))
            // 固定标题，便于脚本/调试定位到正确窗口
            .title("Nianjin Widget")
            .inner_size(size, size)
            .position(settings.widget_x as f64, settings.widget_y as f64)
            .resizable(false)
            .decorations(false)
            // 窗口透明，面板的圆角和 alpha 由前端画
            .transparent(true)
            .shadow(false)
            .visible(false)
            .skip_taskbar(true)
            .build()
            .map_err(|e| format!("创建挂件窗口失败: {}", e))
    }

    /// 标记挂件窗口已完全初始化（由 widget_window_ready 命令调用）
    pub fn mark_ready() {
        WIDGET_WINDOW_READY.store(true, Ordering::Release);
    }

    /// 检查窗口是否已 ready
    pub fn is_ready() -> bool {
        WIDGET_WINDOW_READY.load(Ordering::Acquire)
    }

    /// 广播一次进度快照。事件不依赖窗口引用，方便调试窗口同样收到。
    pub fn push_progress(app: &AppHandle, progress: &YearProgress) -> Result<(), String> {
        app.emit("progress-update", progress)
            .map_err(|e| format!("广播进度事件失败: {}", e))
    }

    /// 挂件窗口的原生句柄（挂载用）。
    #[cfg(target_os = "windows")]
    pub fn surface_handle(app: &AppHandle) -> Result<nianjin_core::attach::SurfaceHandle, String> {
        use tauri::Manager;

        let window = app
            .get_webview_window(WIDGET_WINDOW_LABEL)
            .ok_or_else(|| "挂件窗口不存在".to_string())?;
        let hwnd = window
            .hwnd()
            .map_err(|e| format!("无法获取挂件窗口句柄(hwnd): {}", e))?;
        // tauri 的 hwnd() 在 windows 返回 *mut c_void；windows-sys 的 HWND 是 isize
        Ok(nianjin_core::attach::SurfaceHandle(hwnd.0 as isize))
    }

    /// 按设置应用/关闭面板的 DWM 模糊。
    #[cfg(target_os = "windows")]
    pub fn apply_blur(app: &AppHandle, enabled: bool) -> Result<(), String> {
        let surface = Self::surface_handle(app)?;
        if enabled {
            nianjin_core::windows_effects::enable_panel_blur(surface.0)
        } else {
            nianjin_core::windows_effects::disable_blur(surface.0)
        }
    }

    #[cfg(not(target_os = "windows"))]
    pub fn apply_blur(_app: &AppHandle, _enabled: bool) -> Result<(), String> {
        // 其他平台没有 DWM，模糊交给前端的半透明背景
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panel_size_covers_grid_and_label() {
        // 28 列 × 365 天 = 14 行：高度方向（含文字区）决定边长
        let size = panel_size(28, 365);
        let grid_w = 28 * (DOT_SIZE + DOT_GAP);
        let grid_h = 14 * (DOT_SIZE + DOT_GAP);
        assert!(size >= grid_w + PANEL_PADDING * 2);
        assert!(size >= grid_h + PANEL_PADDING * 2 + TEXT_HEIGHT);
    }

    #[test]
    fn test_panel_size_leap_year_same_rows() {
        // 366 天在 28 列下仍是 14 行，面板边长不变
        assert_eq!(panel_size(28, 365), panel_size(28, 366));
    }
}
