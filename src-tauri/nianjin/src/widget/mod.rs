pub mod refresher;
pub mod window;

// 壳层挂载的 Win32 实现只在 Windows 上编译
#[cfg(target_os = "windows")]
pub mod mount;

// 导出主要类型供外部使用
pub use refresher::WidgetRefresher;
pub use window::WidgetWindow;
