// ==========================================
// OEE 计算引擎 - 遥测事件领域模型
// ==========================================
// 依据: ISO 22400-2 数据采集要求
// 红线: 事件日志只追加,入库后永不修改
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{EquipmentState, EventKind, QualityEventType, ReasonCode, StateCategory};

// ==========================================
// EquipmentStateEvent - 状态变更事件
// ==========================================
// 语义: timestamp 为状态切换时刻,新状态持续到下一事件或窗口结束
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentStateEvent {
    // ===== 去重键 =====
    pub equipment_id: String,          // 设备编号
    pub timestamp: NaiveDateTime,      // 状态切换时刻

    // ===== 状态 =====
    pub state: EquipmentState,         // 新状态
    pub category: StateCategory,       // 时段类别
    pub reason_code: ReasonCode,       // 原因代码

    // ===== 上游报告的区间 (可选闭合) =====
    pub start_time: NaiveDateTime,     // 区间起点 (通常等于 timestamp)
    pub end_time: Option<NaiveDateTime>, // 区间终点 (上游闭合时提供)

    // ===== 入库时间 =====
    // 同一时刻的冲突提交按入库时间后写覆盖
    pub ingested_at: NaiveDateTime,
}

// ==========================================
// ProductionCountEvent - 产量计数事件
// ==========================================
// 语义: 增量计数(自上一事件以来的产出)
// 红线: good_count + reject_count <= total_count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionCountEvent {
    // ===== 去重键 =====
    pub equipment_id: String,
    pub timestamp: NaiveDateTime,

    // ===== 计数 =====
    pub total_count: i64,              // 总产出 (件)
    pub good_count: i64,               // 合格品 (件)
    pub reject_count: i64,             // 不合格品 (件)

    // ===== 节拍观测 =====
    pub actual_cycle_time_s: Option<f64>, // 实际节拍 (秒/件), 降速判定依据

    // ===== 入库时间 =====
    pub ingested_at: NaiveDateTime,
}

impl ProductionCountEvent {
    /// 计数一致性校验
    pub fn counts_consistent(&self) -> bool {
        self.total_count >= 0
            && self.good_count >= 0
            && self.reject_count >= 0
            && self.good_count + self.reject_count <= self.total_count
    }
}

// ==========================================
// QualityEvent - 质量事件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityEvent {
    // ===== 去重键 =====
    pub equipment_id: String,
    pub timestamp: NaiveDateTime,

    // ===== 质量信息 =====
    pub event_type: QualityEventType,  // 质量事件类型
    pub defect_code: String,           // 缺陷代码
    pub quantity: i64,                 // 数量 (件)

    // ===== 入库时间 =====
    pub ingested_at: NaiveDateTime,
}

// ==========================================
// RawEventBatch - 原始事件批次
// ==========================================
// 外部遥测采集方交付的批次,可能乱序、可能重复
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEventBatch {
    pub state_events: Vec<EquipmentStateEvent>,
    pub count_events: Vec<ProductionCountEvent>,
    pub quality_events: Vec<QualityEvent>,
}

impl RawEventBatch {
    pub fn is_empty(&self) -> bool {
        self.state_events.is_empty()
            && self.count_events.is_empty()
            && self.quality_events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state_events.len() + self.count_events.len() + self.quality_events.len()
    }
}

// ==========================================
// RejectedRecord - 被拒绝的原始记录
// ==========================================
// 校验失败的记录逐条报告,批次内其余记录继续入库
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub event_kind: EventKind,         // 事件种类
    pub equipment_id: String,          // 设备编号 (可能为空串)
    pub timestamp: Option<NaiveDateTime>, // 事件时刻 (解析失败时缺失)
    pub reason: String,                // 拒绝原因
    pub record_json: serde_json::Value, // 原始记录回显,供上游排查
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_count_consistency() {
        let mut ev = ProductionCountEvent {
            equipment_id: "EQ-001".to_string(),
            timestamp: ts(8, 0),
            total_count: 10,
            good_count: 8,
            reject_count: 2,
            actual_cycle_time_s: None,
            ingested_at: ts(8, 1),
        };
        assert!(ev.counts_consistent());

        // 合格+不合格超过总数
        ev.good_count = 9;
        assert!(!ev.counts_consistent());

        // 负数计数
        ev.good_count = -1;
        assert!(!ev.counts_consistent());
    }
}
