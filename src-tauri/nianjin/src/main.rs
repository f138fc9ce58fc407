// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod tray;
mod widget;

use nianjin_core::attach::AttachmentState;
use nianjin_core::progress::{self, YearProgress};
use nianjin_core::settings::{AppSettings, Settings};
use tauri::Manager;
use widget::{WidgetRefresher, WidgetWindow};

#[tauri::command]
fn get_settings(state: tauri::State<Settings>) -> Result<AppSettings, String> {
    state.get_settings()
}

#[tauri::command]
fn set_auto_launch(enabled: bool, state: tauri::State<Settings>) -> Result<(), String> {
    state.set_auto_launch(enabled)
}

#[tauri::command]
fn set_refresh_interval_minutes(
    minutes: u32,
    state: tauri::State<Settings>,
) -> Result<(), String> {
    state.set_refresh_interval_minutes(minutes)
}

#[tauri::command]
fn set_panel_blur(
    enabled: bool,
    state: tauri::State<Settings>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    state.set_panel_blur(enabled)?;
    WidgetWindow::apply_blur(&app, enabled)
}

#[tauri::command]
fn set_widget_origin(
    x: i32,
    y: i32,
    state: tauri::State<Settings>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    state.set_widget_origin(x, y)?;
    // 新位置通过重新挂载生效
    app.state::<WidgetRefresher>().request_reattach();
    Ok(())
}

#[tauri::command]
fn get_progress() -> Result<YearProgress, String> {
    Ok(progress::today())
}

#[tauri::command]
fn get_attachment_state(app: tauri::AppHandle) -> Result<AttachmentState, String> {
    Ok(app.state::<WidgetRefresher>().attachment_state())
}

/// 托盘/前端"立即刷新"：重算并推送一次进度。
#[tauri::command]
fn refresh_progress(app: tauri::AppHandle) -> Result<(), String> {
    app.state::<WidgetRefresher>().request_push();
    Ok(())
}

/// 手动重挂载：任意状态下强制重跑定位 + 挂载。
#[tauri::command]
fn reattach_widget(app: tauri::AppHandle) -> Result<(), String> {
    app.state::<WidgetRefresher>().request_reattach();
    Ok(())
}

/// 前端 DOM + 事件监听器就绪后调用，挂载流程在等这个标记。
#[tauri::command]
fn widget_window_ready() -> Result<(), String> {
    WidgetWindow::mark_ready();
    Ok(())
}

fn main() {
    tauri::Builder::default()
        .setup(|app| {
            // 初始化设置管理器
            let settings = Settings::new();
            let app_settings = settings.get_settings().unwrap_or_default();
            app.manage(settings);

            // 创建挂件窗口（先隐藏，挂载成功后由挂载流程显示）
            WidgetWindow::create(app.app_handle(), &app_settings)?;

            // 启动周期刷新线程（进度推送 + 挂载状态机驱动）
            let refresher = WidgetRefresher::new(app.app_handle().clone());
            refresher.start();
            app.manage(refresher);

            // 创建系统托盘（使用 Tauri 2.0 内置 API）
            tray::setup_tray(app.app_handle().clone());

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            get_settings,
            set_auto_launch,
            set_refresh_interval_minutes,
            set_panel_blur,
            set_widget_origin,
            get_progress,
            get_attachment_state,
            refresh_progress,
            reattach_widget,
            widget_window_ready,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
