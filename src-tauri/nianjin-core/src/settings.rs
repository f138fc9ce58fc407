use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn atomic_replace_file(tmp: &Path, dest: &Path) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{
            MoveFileExW, MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH,
        };

        let tmp_w: Vec<u16> = tmp.as_os_str().encode_wide().chain(Some(0)).collect();
        let dest_w: Vec<u16> = dest.as_os_str().encode_wide().chain(Some(0)).collect();

        let ok = unsafe {
            MoveFileExW(
                tmp_w.as_ptr(),
                dest_w.as_ptr(),
                MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
            )
        };
        if ok == 0 {
            return Err(format!(
                "Failed to replace settings file: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    {
        fs::rename(tmp, dest).map_err(|e| format!("Failed to replace settings file: {}", e))?;
        Ok(())
    }
}

fn default_refresh_interval_minutes() -> u32 {
    1
}

fn default_widget_x() -> i32 {
    100
}

fn default_widget_y() -> i32 {
    100
}

fn default_accent_color() -> String {
    "#FF5722".to_string()
}

fn default_dots_per_row() -> u32 {
    28
}

fn default_panel_blur() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub auto_launch: bool,
    /// 进度刷新间隔（分钟）。进度一天才变一次，但 1 分钟的定时器
    /// 成本可忽略，还顺带兜住了休眠唤醒后的显示。
    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u32,
    /// 挂件在宿主层客户区坐标系里的左上角位置。
    #[serde(default = "default_widget_x")]
    pub widget_x: i32,
    #[serde(default = "default_widget_y")]
    pub widget_y: i32,
    /// 已过天数的点和百分比数字用的强调色。
    #[serde(default = "default_accent_color")]
    pub accent_color: String,
    /// 点阵每行点数。30 在小屏幕上太挤。
    #[serde(default = "default_dots_per_row")]
    pub dots_per_row: u32,
    /// 是否对面板区域启用 DWM 模糊（仅 Windows 生效）。
    #[serde(default = "default_panel_blur")]
    pub panel_blur: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_launch: false,
            refresh_interval_minutes: default_refresh_interval_minutes(),
            widget_x: default_widget_x(),
            widget_y: default_widget_y(),
            accent_color: default_accent_color(),
            dots_per_row: default_dots_per_row(),
            panel_blur: default_panel_blur(),
        }
    }
}

pub struct Settings;

impl Settings {
    pub fn new() -> Self {
        Settings
    }

    fn get_settings_file(&self) -> PathBuf {
        crate::app_paths::nianjin_data_dir().join("settings.json")
    }

    pub fn get_settings(&self) -> Result<AppSettings, String> {
        let file = self.get_settings_file();
        if !file.exists() {
            let default = AppSettings::default();
            self.save_settings(&default)?;
            return Ok(default);
        }

        let mut content = fs::read_to_string(&file)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        // 处理空文件：很可能是并发写入时读到的瞬时状态，先短暂重试，
        // 避免把用户已有配置覆盖成默认值
        if content.trim().is_empty() {
            use std::thread::sleep;
            use std::time::Duration;
            for _ in 0..3 {
                sleep(Duration::from_millis(20));
                content = fs::read_to_string(&file)
                    .map_err(|e| format!("Failed to read settings file: {}", e))?;
                if !content.trim().is_empty() {
                    break;
                }
            }
        }

        // 仍为空：返回默认值兜底，但不写回（避免覆盖旧文件）
        if content.trim().is_empty() {
            return Ok(AppSettings::default());
        }

        // 缺失字段由 #[serde(default)] 补齐，老版本设置文件可以直接升级
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse settings JSON: {}", e))
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<(), String> {
        let file = self.get_settings_file();
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        // 写入临时文件 + 原子替换，避免并发读写读到半文件
        let tmp = file.with_extension("json.tmp");
        fs::write(&tmp, content)
            .map_err(|e| format!("Failed to write temp settings file: {}", e))?;
        atomic_replace_file(&tmp, &file)?;
        Ok(())
    }

    pub fn set_auto_launch(&self, enabled: bool) -> Result<(), String> {
        let mut settings = self.get_settings()?;
        settings.auto_launch = enabled;
        self.save_settings(&settings)?;

        // 注册/注销开机启动项
        {
            use auto_launch::AutoLaunchBuilder;
            let app_path = std::env::current_exe()
                .map_err(|e| format!("Failed to get current exe path: {}", e))?;

            let auto_launch = AutoLaunchBuilder::new()
                .set_app_name("Nianjin")
                .set_app_path(app_path.to_string_lossy().as_ref())
                .build()
                .map_err(|e| format!("Failed to create auto launch: {}", e))?;

            if enabled {
                auto_launch
                    .enable()
                    .map_err(|e| format!("Failed to enable auto launch: {}", e))?;
            } else {
                auto_launch
                    .disable()
                    .map_err(|e| format!("Failed to disable auto launch: {}", e))?;
            }
        }

        Ok(())
    }

    pub fn set_refresh_interval_minutes(&self, minutes: u32) -> Result<(), String> {
        let mut settings = self.get_settings()?;
        // 下限 1 分钟：这不是热循环，更短没有意义
        settings.refresh_interval_minutes = minutes.max(1);
        self.save_settings(&settings)?;
        Ok(())
    }

    pub fn set_widget_origin(&self, x: i32, y: i32) -> Result<(), String> {
        let mut settings = self.get_settings()?;
        settings.widget_x = x;
        settings.widget_y = y;
        self.save_settings(&settings)?;
        Ok(())
    }

    pub fn set_panel_blur(&self, enabled: bool) -> Result<(), String> {
        let mut settings = self.get_settings()?;
        settings.panel_blur = enabled;
        self.save_settings(&settings)?;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = AppSettings::default();
        assert!(!s.auto_launch);
        assert_eq!(s.refresh_interval_minutes, 1);
        assert_eq!(s.dots_per_row, 28);
        assert_eq!(s.accent_color, "#FF5722");
        assert!(s.panel_blur);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        // 老版本设置文件只有部分字段时，其余字段取默认值
        let s: AppSettings = serde_json::from_str(r#"{"autoLaunch":true}"#).unwrap();
        assert!(s.auto_launch);
        assert_eq!(s.refresh_interval_minutes, 1);
        assert_eq!(s.widget_x, 100);
    }

    #[test]
    fn test_camel_case_roundtrip() {
        let mut s = AppSettings::default();
        s.widget_x = -4;
        s.refresh_interval_minutes = 30;
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"refreshIntervalMinutes\":30"));
        assert!(json.contains("\"widgetX\":-4"));
        let back: AppSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.widget_x, -4);
        assert_eq!(back.refresh_interval_minutes, 30);
    }
}
