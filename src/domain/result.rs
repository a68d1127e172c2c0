// ==========================================
// OEE 计算引擎 - 计算结果领域模型
// ==========================================
// 依据: ISO 22400-2 KPI 定义 (可用率/表现性/质量/OEE/TEEP)
// 红线: 分母为零 => NoData,永不折算为 0
// 红线: 结果为派生数据,按键 upsert,computed_at 后写获胜
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::segment::WindowTotals;
use crate::domain::types::{LossCategory, OeeComponent, Resolution};

// ==========================================
// MetricValue - 指标值
// ==========================================
// 比率要么已定义(取值 [0,1]),要么显式 NoData
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricValue {
    Defined(f64), // 已定义,取值 [0,1]
    NoData,       // 分母为零,未定义
}

impl MetricValue {
    pub fn is_defined(&self) -> bool {
        matches!(self, MetricValue::Defined(_))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Defined(v) => Some(*v),
            MetricValue::NoData => None,
        }
    }

    /// 从分子/分母构造: 分母为零 => NoData
    pub fn ratio(numerator: f64, denominator: f64) -> Self {
        if denominator <= 0.0 {
            MetricValue::NoData
        } else {
            MetricValue::Defined(numerator / denominator)
        }
    }

    /// 数据库可空列映射: NULL <=> NoData
    pub fn from_db(v: Option<f64>) -> Self {
        match v {
            Some(v) => MetricValue::Defined(v),
            None => MetricValue::NoData,
        }
    }

    pub fn to_db(&self) -> Option<f64> {
        self.value()
    }
}

// ==========================================
// LossBreakdown - 损失分解
// ==========================================
// 六大损失 + 兜底类别的时长/件数分解
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossEntry {
    pub duration_s: i64, // 损失时长 (秒)
    pub count: i64,      // 损失件数
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    // BTreeMap 保证序列化顺序稳定 (结果逐位可复现)
    entries: BTreeMap<LossCategory, LossEntry>,
}

impl LossBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_duration(&mut self, category: LossCategory, duration_s: i64) {
        self.entries.entry(category).or_default().duration_s += duration_s;
    }

    pub fn add_count(&mut self, category: LossCategory, count: i64) {
        self.entries.entry(category).or_default().count += count;
    }

    pub fn get(&self, category: LossCategory) -> LossEntry {
        self.entries.get(&category).copied().unwrap_or_default()
    }

    pub fn merge(&mut self, other: &LossBreakdown) {
        for (category, entry) in &other.entries {
            let slot = self.entries.entry(*category).or_default();
            slot.duration_s += entry.duration_s;
            slot.count += entry.count;
        }
    }

    /// 全部损失时长之和 (秒)
    pub fn total_duration_s(&self) -> i64 {
        self.entries.values().map(|e| e.duration_s).sum()
    }

    /// 全部损失件数之和
    pub fn total_count(&self) -> i64 {
        self.entries.values().map(|e| e.count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LossCategory, &LossEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==========================================
// OeeCalculationResult - OEE 计算结果
// ==========================================
// upsert 键: (equipment_id, window_start, window_end, shift_instance_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OeeCalculationResult {
    // ===== upsert 键 =====
    pub equipment_id: String,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub shift_instance_id: Option<String>,

    // ===== 窗口属性 =====
    pub resolution: Resolution,

    // ===== KPI (均为 [0,1] 或 NoData) =====
    pub availability: MetricValue,     // 可用率
    pub performance: MetricValue,      // 表现性
    pub quality: MetricValue,          // 质量合格率
    pub oee: MetricValue,              // OEE = A*P*Q (三者齐备时)
    pub utilization: MetricValue,      // 利用率 = 计划生产时长/日历时长
    pub teep: MetricValue,             // TEEP = OEE*利用率

    // ===== OEE 未定义时缺失的分量 =====
    pub missing_components: Vec<OeeComponent>,

    // ===== 损失归因 =====
    pub loss_breakdown: LossBreakdown,

    // ===== 上卷依据 (求和口径) =====
    pub totals: WindowTotals,

    // ===== 状态标志 =====
    pub preliminary: bool,             // 构成窗口未齐备时的初步结果
    pub anomaly_count: i64,            // 本窗口产生的异常告警数

    // ===== 计算时间 (显式传参,不读系统时钟) =====
    pub computed_at: NaiveDateTime,
}

impl OeeCalculationResult {
    /// 三分量是否全部定义
    pub fn fully_defined(&self) -> bool {
        self.availability.is_defined()
            && self.performance.is_defined()
            && self.quality.is_defined()
    }
}

// ==========================================
// LossParetoEntry - 损失帕累托条目
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossParetoEntry {
    pub category: LossCategory,        // 损失类别
    pub duration_s: i64,               // 损失时长 (秒)
    pub count: i64,                    // 损失件数
    pub share: f64,                    // 占全部损失时长的比例 [0,1]
}

// ==========================================
// ShiftSummary - 多班次汇总
// ==========================================
// 两种口径并列输出,分别标注:
// - weighted_oee: 按时长求和重算的真实值
// - naive_average_oee: 各班 OEE 的简单平均,仅为快速参考,
//   班次时长不等时会偏离真实值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftSummary {
    pub equipment_id: String,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub shift_count: usize,            // 纳入汇总的班次数
    pub weighted_oee: MetricValue,     // 时长加权真实 OEE
    pub naive_average_oee: MetricValue, // 简单平均 OEE (近似参考值)
    pub totals: WindowTotals,          // 求和后的汇总口径
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_zero_denominator_is_no_data() {
        assert_eq!(MetricValue::ratio(10.0, 0.0), MetricValue::NoData);
        assert_eq!(MetricValue::ratio(3.0, 4.0), MetricValue::Defined(0.75));
    }

    #[test]
    fn test_db_null_roundtrip() {
        assert_eq!(MetricValue::from_db(None), MetricValue::NoData);
        assert_eq!(MetricValue::from_db(Some(0.5)), MetricValue::Defined(0.5));
        assert_eq!(MetricValue::NoData.to_db(), None);
    }

    #[test]
    fn test_loss_breakdown_merge() {
        let mut a = LossBreakdown::new();
        a.add_duration(LossCategory::EquipmentFailure, 600);
        a.add_count(LossCategory::ProcessDefects, 5);

        let mut b = LossBreakdown::new();
        b.add_duration(LossCategory::EquipmentFailure, 300);
        b.add_duration(LossCategory::ReducedSpeed, 120);

        a.merge(&b);
        assert_eq!(a.get(LossCategory::EquipmentFailure).duration_s, 900);
        assert_eq!(a.get(LossCategory::ReducedSpeed).duration_s, 120);
        assert_eq!(a.get(LossCategory::ProcessDefects).count, 5);
        assert_eq!(a.total_duration_s(), 1020);
    }
}
