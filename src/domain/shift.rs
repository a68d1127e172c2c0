// ==========================================
// OEE 计算引擎 - 班次领域模型
// ==========================================
// 来源: 外部排班系统,本引擎只读
// 红线: 引擎内部无"当前班次"全局状态,班次实例显式传参
// ==========================================

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

// ==========================================
// PlannedBreak - 计划休息
// ==========================================
// 以班内相对时刻表达,落到班次实例后转为绝对区间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedBreak {
    pub name: String,                  // 休息名称 (午休/交接班等)
    pub start_time: NaiveTime,         // 班内开始时刻
    pub duration_min: i64,             // 时长 (分钟)
}

// ==========================================
// ShiftDefinition - 班次定义
// ==========================================
// 周期性班次模板
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftDefinition {
    pub shift_code: String,            // 班次代码 (A/B/C)
    pub name: String,                  // 班次名称
    pub start_time: NaiveTime,         // 班次开始时刻
    pub end_time: NaiveTime,           // 班次结束时刻 (跨天时小于 start_time)
    pub planned_breaks: Vec<PlannedBreak>, // 计划休息列表
}

// ==========================================
// ShiftInstance - 班次实例
// ==========================================
// 班次定义的一次具体发生,带实际起止
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftInstance {
    // ===== 标识 =====
    pub shift_instance_id: String,     // 班次实例ID
    pub shift_code: String,            // 所属班次定义

    // ===== 实际起止 =====
    pub actual_start: NaiveDateTime,   // 实际开始
    pub actual_end: NaiveDateTime,     // 实际结束 (提前收班时早于计划)
    pub early_close: bool,             // 是否提前收班

    // ===== 计划休息 (绝对区间) =====
    pub break_windows: Vec<(NaiveDateTime, NaiveDateTime)>,
}

impl ShiftInstance {
    /// 班次实际时长 (秒)
    pub fn duration_s(&self) -> i64 {
        (self.actual_end - self.actual_start).num_seconds().max(0)
    }

    /// 与指定窗口相交的休息区间 (裁剪到窗口内)
    pub fn breaks_within(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        self.break_windows
            .iter()
            .filter_map(|(s, e)| {
                let clipped_start = (*s).max(window_start);
                let clipped_end = (*e).min(window_end);
                if clipped_start < clipped_end {
                    Some((clipped_start, clipped_end))
                } else {
                    None
                }
            })
            .collect()
    }

    /// 窗口内休息总时长 (秒)
    pub fn break_seconds_within(
        &self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> i64 {
        self.breaks_within(window_start, window_end)
            .iter()
            .map(|(s, e)| (*e - *s).num_seconds())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn shift_with_lunch() -> ShiftInstance {
        ShiftInstance {
            shift_instance_id: "S-20260302-A".to_string(),
            shift_code: "A".to_string(),
            actual_start: dt(8, 0),
            actual_end: dt(16, 0),
            early_close: false,
            break_windows: vec![(dt(12, 0), dt(12, 30))],
        }
    }

    #[test]
    fn test_duration() {
        assert_eq!(shift_with_lunch().duration_s(), 8 * 3600);
    }

    #[test]
    fn test_breaks_clipped_to_window() {
        let shift = shift_with_lunch();
        // 窗口完全包含休息
        assert_eq!(shift.break_seconds_within(dt(8, 0), dt(16, 0)), 1800);
        // 窗口只覆盖休息前半段
        assert_eq!(shift.break_seconds_within(dt(8, 0), dt(12, 15)), 900);
        // 窗口与休息无交集
        assert_eq!(shift.break_seconds_within(dt(13, 0), dt(16, 0)), 0);
    }
}
