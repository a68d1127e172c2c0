// ==========================================
// OEE 计算引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、业务规则接口
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod anomaly;
pub mod equipment;
pub mod events;
pub mod result;
pub mod segment;
pub mod shift;
pub mod types;

// 重导出核心类型
pub use anomaly::{AnomalyKind, AnomalyWarning};
pub use equipment::Equipment;
pub use events::{
    EquipmentStateEvent, ProductionCountEvent, QualityEvent, RawEventBatch, RejectedRecord,
};
pub use result::{
    LossBreakdown, LossEntry, LossParetoEntry, MetricValue, OeeCalculationResult, ShiftSummary,
};
pub use segment::{StateSegment, WindowTotals};
pub use shift::{PlannedBreak, ShiftDefinition, ShiftInstance};
pub use types::{
    EquipmentState, EventKind, LossCategory, OeeComponent, QualityEventType, ReasonCode,
    Resolution, StateCategory,
};
