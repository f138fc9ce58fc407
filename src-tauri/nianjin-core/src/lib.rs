//! Nianjin 核心库入口（供 app crate 复用，不依赖 GUI）。

pub mod app_paths;
pub mod attach;
pub mod progress;
pub mod settings;

// 只有 Windows 平台需要 DWM 模糊工具
#[cfg(target_os = "windows")]
pub mod windows_effects;
