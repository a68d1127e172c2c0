// ==========================================
// OEE 计算引擎 - 领域类型定义
// ==========================================
// 依据: ISO 22400-2 设备综合效率指标体系
// 红线: 比率未定义(分母为零)必须显式表达,不得折算为 0
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 设备状态 (Equipment State)
// ==========================================
// 上游 MES/SCADA 状态机的四种基础状态
// 序列化格式: SCREAMING_SNAKE_CASE (与事件日志一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EquipmentState {
    Producing,   // 生产中
    Idle,        // 待机
    Down,        // 故障停机
    Maintenance, // 维护保养
}

impl fmt::Display for EquipmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquipmentState::Producing => write!(f, "PRODUCING"),
            EquipmentState::Idle => write!(f, "IDLE"),
            EquipmentState::Down => write!(f, "DOWN"),
            EquipmentState::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

impl EquipmentState {
    /// 从字符串解析设备状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PRODUCING" => Some(EquipmentState::Producing),
            "IDLE" => Some(EquipmentState::Idle),
            "DOWN" => Some(EquipmentState::Down),
            "MAINTENANCE" => Some(EquipmentState::Maintenance),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            EquipmentState::Producing => "PRODUCING",
            EquipmentState::Idle => "IDLE",
            EquipmentState::Down => "DOWN",
            EquipmentState::Maintenance => "MAINTENANCE",
        }
    }
}

// ==========================================
// 时段类别 (State Category)
// ==========================================
// 每个状态事件由上游标注所属时段类别
// 时段切分器按此类别汇总窗口内时长
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateCategory {
    Production,       // 生产时段
    Planned,          // 计划停机时段
    AvailabilityLoss, // 可用率损失时段(非计划停机)
}

impl fmt::Display for StateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateCategory::Production => write!(f, "PRODUCTION"),
            StateCategory::Planned => write!(f, "PLANNED"),
            StateCategory::AvailabilityLoss => write!(f, "AVAILABILITY_LOSS"),
        }
    }
}

impl StateCategory {
    /// 从字符串解析时段类别
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PRODUCTION" => Some(StateCategory::Production),
            "PLANNED" => Some(StateCategory::Planned),
            "AVAILABILITY_LOSS" => Some(StateCategory::AvailabilityLoss),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StateCategory::Production => "PRODUCTION",
            StateCategory::Planned => "PLANNED",
            StateCategory::AvailabilityLoss => "AVAILABILITY_LOSS",
        }
    }
}

// ==========================================
// 事件种类 (Event Kind)
// ==========================================
// 去重键的组成部分: (equipment_id, timestamp, event_kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    State,   // 状态变更事件
    Count,   // 产量计数事件
    Quality, // 质量事件
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::State => write!(f, "STATE"),
            EventKind::Count => write!(f, "COUNT"),
            EventKind::Quality => write!(f, "QUALITY"),
        }
    }
}

// ==========================================
// 质量事件类型 (Quality Event Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityEventType {
    Scrap,       // 报废
    Rework,      // 返工
    StartupLoss, // 开机损失(爬坡期废品)
}

impl fmt::Display for QualityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityEventType::Scrap => write!(f, "SCRAP"),
            QualityEventType::Rework => write!(f, "REWORK"),
            QualityEventType::StartupLoss => write!(f, "STARTUP_LOSS"),
        }
    }
}

impl QualityEventType {
    /// 从字符串解析质量事件类型
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SCRAP" => Some(QualityEventType::Scrap),
            "REWORK" => Some(QualityEventType::Rework),
            "STARTUP_LOSS" => Some(QualityEventType::StartupLoss),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            QualityEventType::Scrap => "SCRAP",
            QualityEventType::Rework => "REWORK",
            QualityEventType::StartupLoss => "STARTUP_LOSS",
        }
    }
}

// ==========================================
// 停机/损失原因代码 (Reason Code)
// ==========================================
// 上游系统的原因代码是开放字符串集合
// 红线: 解析永不失败,未知代码落入 Other 保留原文
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Breakdown,          // 设备故障
    MechanicalFailure,  // 机械故障
    ElectricalFailure,  // 电气故障
    Setup,              // 换型准备
    Adjustment,         // 调整校准
    ToolChange,         // 换模/换刀
    MaterialShortage,   // 缺料
    MinorStop,          // 小停机
    SpeedLoss,          // 降速运行
    PlannedMaintenance, // 计划维护
    NoDemand,           // 无生产需求
    Other(String),      // 未映射代码(保留原文)
}

impl ReasonCode {
    /// 从上游原因代码解析(永不失败)
    pub fn parse(code: &str) -> Self {
        match code.to_uppercase().as_str() {
            "BREAKDOWN" => ReasonCode::Breakdown,
            "MECHANICAL_FAILURE" => ReasonCode::MechanicalFailure,
            "ELECTRICAL_FAILURE" => ReasonCode::ElectricalFailure,
            "SETUP" => ReasonCode::Setup,
            "ADJUSTMENT" => ReasonCode::Adjustment,
            "TOOL_CHANGE" => ReasonCode::ToolChange,
            "MATERIAL_SHORTAGE" => ReasonCode::MaterialShortage,
            "MINOR_STOP" => ReasonCode::MinorStop,
            "SPEED_LOSS" => ReasonCode::SpeedLoss,
            "PLANNED_MAINTENANCE" => ReasonCode::PlannedMaintenance,
            "NO_DEMAND" => ReasonCode::NoDemand,
            _ => ReasonCode::Other(code.to_string()),
        }
    }

    /// 转换为数据库存储的字符串(Other 保留原文)
    pub fn to_db_str(&self) -> String {
        match self {
            ReasonCode::Breakdown => "BREAKDOWN".to_string(),
            ReasonCode::MechanicalFailure => "MECHANICAL_FAILURE".to_string(),
            ReasonCode::ElectricalFailure => "ELECTRICAL_FAILURE".to_string(),
            ReasonCode::Setup => "SETUP".to_string(),
            ReasonCode::Adjustment => "ADJUSTMENT".to_string(),
            ReasonCode::ToolChange => "TOOL_CHANGE".to_string(),
            ReasonCode::MaterialShortage => "MATERIAL_SHORTAGE".to_string(),
            ReasonCode::MinorStop => "MINOR_STOP".to_string(),
            ReasonCode::SpeedLoss => "SPEED_LOSS".to_string(),
            ReasonCode::PlannedMaintenance => "PLANNED_MAINTENANCE".to_string(),
            ReasonCode::NoDemand => "NO_DEMAND".to_string(),
            ReasonCode::Other(code) => code.clone(),
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 六大损失类别 (Six Big Losses)
// ==========================================
// 依据: ISO 22400 六大损失分类
// OtherLosses 为强制兜底类别,分类永不失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LossCategory {
    EquipmentFailure, // 设备故障
    SetupAdjustment,  // 换型与调整
    IdlingMinorStops, // 空转与小停机
    ReducedSpeed,     // 降速损失
    ProcessDefects,   // 过程废品
    ReducedYield,     // 产出爬坡损失
    OtherLosses,      // 其他损失(兜底)
}

impl LossCategory {
    /// 损失类别归属的 OEE 分量
    pub fn pillar(&self) -> OeeComponent {
        match self {
            LossCategory::EquipmentFailure | LossCategory::SetupAdjustment => {
                OeeComponent::Availability
            }
            LossCategory::IdlingMinorStops | LossCategory::ReducedSpeed => {
                OeeComponent::Performance
            }
            LossCategory::ProcessDefects | LossCategory::ReducedYield => OeeComponent::Quality,
            // 兜底类别记入可用率损失口径
            LossCategory::OtherLosses => OeeComponent::Availability,
        }
    }

    /// 从字符串解析损失类别
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "EQUIPMENT_FAILURE" => Some(LossCategory::EquipmentFailure),
            "SETUP_ADJUSTMENT" => Some(LossCategory::SetupAdjustment),
            "IDLING_MINOR_STOPS" => Some(LossCategory::IdlingMinorStops),
            "REDUCED_SPEED" => Some(LossCategory::ReducedSpeed),
            "PROCESS_DEFECTS" => Some(LossCategory::ProcessDefects),
            "REDUCED_YIELD" => Some(LossCategory::ReducedYield),
            "OTHER_LOSSES" => Some(LossCategory::OtherLosses),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LossCategory::EquipmentFailure => "EQUIPMENT_FAILURE",
            LossCategory::SetupAdjustment => "SETUP_ADJUSTMENT",
            LossCategory::IdlingMinorStops => "IDLING_MINOR_STOPS",
            LossCategory::ReducedSpeed => "REDUCED_SPEED",
            LossCategory::ProcessDefects => "PROCESS_DEFECTS",
            LossCategory::ReducedYield => "REDUCED_YIELD",
            LossCategory::OtherLosses => "OTHER_LOSSES",
        }
    }

    /// 全部类别(帕累托排名时保证零值类别也可见)
    pub fn all() -> [LossCategory; 7] {
        [
            LossCategory::EquipmentFailure,
            LossCategory::SetupAdjustment,
            LossCategory::IdlingMinorStops,
            LossCategory::ReducedSpeed,
            LossCategory::ProcessDefects,
            LossCategory::ReducedYield,
            LossCategory::OtherLosses,
        ]
    }
}

impl fmt::Display for LossCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// OEE 分量 (OEE Component)
// ==========================================
// OEE 未定义时标注缺失的分量
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OeeComponent {
    Availability, // 可用率
    Performance,  // 表现性
    Quality,      // 质量合格率
}

impl fmt::Display for OeeComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OeeComponent::Availability => write!(f, "AVAILABILITY"),
            OeeComponent::Performance => write!(f, "PERFORMANCE"),
            OeeComponent::Quality => write!(f, "QUALITY"),
        }
    }
}

// ==========================================
// 聚合分辨率 (Aggregation Resolution)
// ==========================================
// 自底向上: 原始时段 -> 实时 -> 小时 -> 天; 班次独立对齐
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    RealTime, // 实时窗口(1-5分钟,长度由配置决定)
    Hourly,   // 小时
    Daily,    // 天
    Shift,    // 班次
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::RealTime => write!(f, "REAL_TIME"),
            Resolution::Hourly => write!(f, "HOURLY"),
            Resolution::Daily => write!(f, "DAILY"),
            Resolution::Shift => write!(f, "SHIFT"),
        }
    }
}

impl Resolution {
    /// 从字符串解析分辨率
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "REAL_TIME" => Some(Resolution::RealTime),
            "HOURLY" => Some(Resolution::Hourly),
            "DAILY" => Some(Resolution::Daily),
            "SHIFT" => Some(Resolution::Shift),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            Resolution::RealTime => "REAL_TIME",
            Resolution::Hourly => "HOURLY",
            Resolution::Daily => "DAILY",
            Resolution::Shift => "SHIFT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_parse_never_fails() {
        assert_eq!(ReasonCode::parse("BREAKDOWN"), ReasonCode::Breakdown);
        assert_eq!(ReasonCode::parse("breakdown"), ReasonCode::Breakdown);
        // 未知代码落入 Other 并保留原文
        match ReasonCode::parse("VENDOR_X_CODE_42") {
            ReasonCode::Other(code) => assert_eq!(code, "VENDOR_X_CODE_42"),
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_loss_category_pillar() {
        assert_eq!(
            LossCategory::EquipmentFailure.pillar(),
            OeeComponent::Availability
        );
        assert_eq!(
            LossCategory::ReducedSpeed.pillar(),
            OeeComponent::Performance
        );
        assert_eq!(LossCategory::ReducedYield.pillar(), OeeComponent::Quality);
    }

    #[test]
    fn test_state_roundtrip() {
        for s in ["PRODUCING", "IDLE", "DOWN", "MAINTENANCE"] {
            let state = EquipmentState::from_str(s).unwrap();
            assert_eq!(state.to_db_str(), s);
        }
        assert!(EquipmentState::from_str("UNKNOWN").is_none());
    }
}
