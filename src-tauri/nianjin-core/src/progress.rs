//! 年度进度计算（纯函数，无状态）。

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// 推送给挂件前端的进度快照。
///
/// `fraction` 取值 0.0–1.0；前端按 `dayOfYear`/`totalDays` 画点阵，
/// 按 `percentRemaining` 显示剩余百分比（保留一位小数在前端做）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearProgress {
    pub year: i32,
    pub day_of_year: u32,
    pub total_days: u32,
    pub fraction: f64,
    pub percent_remaining: f64,
}

/// 按给定日期计算年度进度。
pub fn year_progress(date: NaiveDate) -> YearProgress {
    let day_of_year = date.ordinal();
    let total_days = if date.leap_year() { 366 } else { 365 };
    let fraction = day_of_year as f64 / total_days as f64;
    YearProgress {
        year: date.year(),
        day_of_year,
        total_days,
        fraction,
        percent_remaining: (1.0 - fraction) * 100.0,
    }
}

/// 按本地当前日期计算年度进度。
pub fn today() -> YearProgress {
    year_progress(Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_year_start_near_zero() {
        let p = year_progress(date(2025, 1, 1));
        assert_eq!(p.day_of_year, 1);
        assert_eq!(p.total_days, 365);
        assert!(p.fraction > 0.0 && p.fraction < 0.01);
    }

    #[test]
    fn test_year_end_is_one() {
        let p = year_progress(date(2025, 12, 31));
        assert_eq!(p.day_of_year, 365);
        assert!((p.fraction - 1.0).abs() < 1e-9);
        assert!(p.percent_remaining.abs() < 1e-9);
    }

    #[test]
    fn test_midyear_is_half() {
        // 平年 7 月 2 日是第 183 天，183/365 ≈ 0.5
        let p = year_progress(date(2025, 7, 2));
        assert_eq!(p.day_of_year, 183);
        assert!((p.fraction - 0.5).abs() < 0.005);
    }

    #[test]
    fn test_leap_year_total_days() {
        let p = year_progress(date(2024, 12, 31));
        assert_eq!(p.total_days, 366);
        assert_eq!(p.day_of_year, 366);
        assert!((p.fraction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_within_year() {
        // 年内逐日单调不减，跨年归零
        let mut prev = 0.0;
        let mut d = date(2025, 1, 1);
        while d.year() == 2025 {
            let p = year_progress(d);
            assert!(p.fraction >= prev);
            prev = p.fraction;
            d = d.succ_opt().unwrap();
        }
        assert!(year_progress(d).fraction < 0.01);
    }

    #[test]
    fn test_payload_serialization_camel_case() {
        let p = year_progress(date(2025, 1, 1));
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"dayOfYear\":1"));
        assert!(json.contains("\"totalDays\":365"));
        assert!(json.contains("\"percentRemaining\""));
    }
}
