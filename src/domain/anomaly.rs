// ==========================================
// OEE 计算引擎 - 异常告警领域模型
// ==========================================
// 红线: 异常告警非致命,只记录、只计数,永不中断计算
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 异常种类 (Anomaly Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    PerformanceClamped,     // 表现性 > 100% 被钳制 (节拍标定待核查)
    UnclassifiedReason,     // 原因代码未映射,落入兜底损失类别
    SegmentOverlapResolved, // 时段冲突按入库时间后写覆盖解决
    LateEvent,              // 迟到事件,已定稿窗口需要重算
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::PerformanceClamped => write!(f, "PERFORMANCE_CLAMPED"),
            AnomalyKind::UnclassifiedReason => write!(f, "UNCLASSIFIED_REASON"),
            AnomalyKind::SegmentOverlapResolved => write!(f, "SEGMENT_OVERLAP_RESOLVED"),
            AnomalyKind::LateEvent => write!(f, "LATE_EVENT"),
        }
    }
}

impl AnomalyKind {
    /// 从字符串解析异常种类
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PERFORMANCE_CLAMPED" => Some(AnomalyKind::PerformanceClamped),
            "UNCLASSIFIED_REASON" => Some(AnomalyKind::UnclassifiedReason),
            "SEGMENT_OVERLAP_RESOLVED" => Some(AnomalyKind::SegmentOverlapResolved),
            "LATE_EVENT" => Some(AnomalyKind::LateEvent),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AnomalyKind::PerformanceClamped => "PERFORMANCE_CLAMPED",
            AnomalyKind::UnclassifiedReason => "UNCLASSIFIED_REASON",
            AnomalyKind::SegmentOverlapResolved => "SEGMENT_OVERLAP_RESOLVED",
            AnomalyKind::LateEvent => "LATE_EVENT",
        }
    }
}

// ==========================================
// AnomalyWarning - 异常告警
// ==========================================
// 供操作人员审查: 钳制事件、未分类原因、时段冲突等
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyWarning {
    pub equipment_id: String,          // 设备编号
    pub kind: AnomalyKind,             // 异常种类
    pub window_start: Option<NaiveDateTime>, // 关联窗口起点
    pub window_end: Option<NaiveDateTime>,   // 关联窗口终点
    pub message: String,               // 人读描述
    pub detail: serde_json::Value,     // 结构化细节 (原值/覆盖值等)
}

impl AnomalyWarning {
    /// 构造窗口级告警
    pub fn for_window(
        equipment_id: &str,
        kind: AnomalyKind,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        message: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            equipment_id: equipment_id.to_string(),
            kind,
            window_start: Some(window_start),
            window_end: Some(window_end),
            message: message.into(),
            detail,
        }
    }
}
