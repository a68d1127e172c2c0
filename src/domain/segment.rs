// ==========================================
// OEE 计算引擎 - 时段领域模型
// ==========================================
// 依据: ISO 22400-2 时间要素模型
// 红线: 同一设备的时段不得重叠; 各类别时长之和必须精确覆盖窗口
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{EquipmentState, ReasonCode, StateCategory};

// ==========================================
// StateSegment - 状态时段
// ==========================================
// 由状态事件流切分得到的连续、不重叠区间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSegment {
    pub equipment_id: String,          // 设备编号
    pub state: EquipmentState,         // 时段内状态
    pub category: StateCategory,       // 时段类别
    pub reason_code: ReasonCode,       // 原因代码
    pub start: NaiveDateTime,          // 时段起点 (含)
    pub end: NaiveDateTime,            // 时段终点 (不含)
}

impl StateSegment {
    /// 时段时长 (秒)
    pub fn duration_s(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

// ==========================================
// WindowTotals - 窗口汇总时长与计数
// ==========================================
// 聚合铁律: 上卷比率必须由本结构的求和重新计算,
// 禁止对子窗口比率取平均
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowTotals {
    // ===== 时长 (秒) =====
    pub calendar_s: i64,               // 日历时长 (TEEP 分母)
    pub scheduled_s: i64,              // 排定时长 (无状态数据时为 0)
    pub planned_break_s: i64,          // 计划休息
    pub planned_downtime_s: i64,       // 计划停机
    pub availability_loss_s: i64,      // 非计划停机 (可用率损失)
    pub operating_s: i64,              // 实际运行

    // ===== 计数 (件) =====
    pub total_count: i64,              // 总产出
    pub good_count: i64,               // 合格品
    pub reject_count: i64,             // 不合格品
}

impl WindowTotals {
    /// 计划生产时长 (秒) = 排定 - 休息 - 计划停机
    pub fn planned_production_s(&self) -> i64 {
        self.scheduled_s - self.planned_break_s - self.planned_downtime_s
    }

    /// 汇总另一个窗口 (上卷求和)
    pub fn merge(&mut self, other: &WindowTotals) {
        self.calendar_s += other.calendar_s;
        self.scheduled_s += other.scheduled_s;
        self.planned_break_s += other.planned_break_s;
        self.planned_downtime_s += other.planned_downtime_s;
        self.availability_loss_s += other.availability_loss_s;
        self.operating_s += other.operating_s;
        self.total_count += other.total_count;
        self.good_count += other.good_count;
        self.reject_count += other.reject_count;
    }

    /// 类别时长覆盖校验: 运行+非计划停机+计划停机+休息 == 排定
    pub fn durations_cover_window(&self) -> bool {
        self.operating_s
            + self.availability_loss_s
            + self.planned_downtime_s
            + self.planned_break_s
            == self.scheduled_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_production_time() {
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            planned_break_s: 30 * 60,
            planned_downtime_s: 0,
            availability_loss_s: 60 * 60,
            operating_s: 390 * 60,
            total_count: 350,
            good_count: 330,
            reject_count: 20,
        };
        assert_eq!(totals.planned_production_s(), 450 * 60);
        assert!(totals.durations_cover_window());
    }

    #[test]
    fn test_merge_sums_durations_and_counts() {
        let mut a = WindowTotals {
            calendar_s: 3600,
            scheduled_s: 3600,
            operating_s: 3000,
            availability_loss_s: 600,
            total_count: 60,
            good_count: 58,
            reject_count: 2,
            ..Default::default()
        };
        let b = WindowTotals {
            calendar_s: 3600,
            scheduled_s: 3600,
            operating_s: 3600,
            total_count: 72,
            good_count: 72,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.calendar_s, 7200);
        assert_eq!(a.operating_s, 6600);
        assert_eq!(a.total_count, 132);
        assert!(a.durations_cover_window());
    }
}
