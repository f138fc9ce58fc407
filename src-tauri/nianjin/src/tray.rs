// 系统托盘模块 - 挂件没有标题栏，托盘是唯一的常驻入口

use crate::widget::window::WIDGET_WINDOW_LABEL;
use crate::widget::WidgetRefresher;
use governor::{Quota, RateLimiter};
use nianjin_core::settings::Settings;
use std::num::NonZeroU32;
use std::time::Duration;
use tauri::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuItem, PredefinedMenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    AppHandle, Manager,
};

type DefaultDirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
    governor::middleware::NoOpMiddleware,
>;

const TRAY_CLICK_DEBOUNCE_MS: u64 = 500; // 500ms 防抖

/// 初始化系统托盘
/// 延迟初始化，确保窗口已经创建
pub fn setup_tray(app: AppHandle) {
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(500));

        // 创建防抖限流器
        let limiter = RateLimiter::direct(
            Quota::with_period(Duration::from_millis(TRAY_CLICK_DEBOUNCE_MS))
                .unwrap()
                .allow_burst(NonZeroU32::new(1).unwrap()),
        );

        // 创建菜单项
        let refresh_item = match MenuItem::with_id(&app, "refresh", "立即刷新", true, None::<&str>)
        {
            Ok(item) => item,
            Err(e) => {
                eprintln!("创建菜单项失败: {}", e);
                return;
            }
        };

        let remount_item = match MenuItem::with_id(&app, "remount", "重新挂载", true, None::<&str>)
        {
            Ok(item) => item,
            Err(e) => {
                eprintln!("创建菜单项失败: {}", e);
                return;
            }
        };

        let auto_launch_enabled = Settings::new()
            .get_settings()
            .map(|s| s.auto_launch)
            .unwrap_or(false);
        let autostart_item = match CheckMenuItem::with_id(
            &app,
            "autostart",
            "开机自启",
            true,
            auto_launch_enabled,
            None::<&str>,
        ) {
            Ok(item) => item,
            Err(e) => {
                eprintln!("创建菜单项失败: {}", e);
                return;
            }
        };

        let separator = match PredefinedMenuItem::separator(&app) {
            Ok(item) => item,
            Err(e) => {
                eprintln!("创建菜单分隔符失败: {}", e);
                return;
            }
        };

        let quit_item = match MenuItem::with_id(&app, "quit", "退出", true, None::<&str>) {
            Ok(item) => item,
            Err(e) => {
                eprintln!("创建菜单项失败: {}", e);
                return;
            }
        };

        // 创建菜单
        let menu = match Menu::with_items(
            &app,
            &[
                &refresh_item,
                &remount_item,
                &autostart_item,
                &separator,
                &quit_item,
            ],
        ) {
            Ok(menu) => menu,
            Err(e) => {
                eprintln!("创建菜单失败: {}", e);
                return;
            }
        };

        // 创建托盘图标
        let icon = match app.default_window_icon() {
            Some(icon) => icon.clone(),
            None => {
                eprintln!("无法获取默认图标");
                return;
            }
        };

        let handle_clone1 = app.clone();
        let handle_clone2 = app.clone();

        // 创建托盘，明确禁止左键点击显示菜单
        let tray = match TrayIconBuilder::new()
            .icon(icon)
            .tooltip("Nianjin")
            .show_menu_on_left_click(false) // 关键：禁止左键显示菜单
            .build(&app)
        {
            Ok(tray) => tray,
            Err(e) => {
                eprintln!("创建系统托盘失败: {}", e);
                return;
            }
        };

        // 设置菜单（只在右键时显示）
        if let Err(e) = tray.set_menu(Some(menu)) {
            eprintln!("设置托盘菜单失败: {}", e);
        }

        // 处理托盘图标事件（带防抖）
        tray.on_tray_icon_event(move |_tray, event| {
            handle_tray_icon_event(&handle_clone2, event, &limiter);
        });

        // 处理菜单事件
        tray.on_menu_event(move |_tray, event| {
            handle_menu_event(&handle_clone1, event, &autostart_item);
        });
    });
}

/// 处理菜单事件
fn handle_menu_event(app: &AppHandle, event: MenuEvent, autostart_item: &CheckMenuItem<tauri::Wry>) {
    match event.id.as_ref() {
        "refresh" => {
            let refresher = app.state::<WidgetRefresher>();
            refresher.request_push();
        }
        "remount" => {
            let refresher = app.state::<WidgetRefresher>();
            refresher.request_reattach();
        }
        "autostart" => {
            // CheckMenuItem 点击后自己翻转了勾选态，设置按翻转后的值落盘
            let enabled = autostart_item.is_checked().unwrap_or(false);
            if let Err(e) = Settings::new().set_auto_launch(enabled) {
                eprintln!("设置开机自启失败: {}", e);
                // 失败把勾选态翻回去，别骗用户
                let _ = autostart_item.set_checked(!enabled);
            }
        }
        "quit" => {
            // 优雅地退出应用
            app.exit(0);
        }
        _ => {}
    }
}

/// 处理托盘图标事件
fn handle_tray_icon_event(
    app: &AppHandle,
    event: TrayIconEvent,
    limiter: &DefaultDirectRateLimiter,
) {
    // 只处理左键按下事件（不处理释放事件，避免重复）
    if let TrayIconEvent::Click {
        button: MouseButton::Left,
        button_state: MouseButtonState::Down,
        ..
    } = event
    {
        // 防抖检查：防止快速连击导致窗口状态混乱
        if limiter.check().is_err() {
            eprintln!("[托盘] 点击过快，已忽略（防抖）");
            return;
        }

        // 切换挂件显示/隐藏
        if let Some(widget) = app.get_webview_window(WIDGET_WINDOW_LABEL) {
            let is_visible = widget.is_visible().unwrap_or(false);
            if is_visible {
                let _ = widget.hide();
            } else {
                let _ = widget.show();
            }
        }
    }
    // 右键点击会自动显示菜单（通过 set_menu 设置）
}
