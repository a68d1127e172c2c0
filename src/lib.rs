// ==========================================
// OEE 计算引擎 - 核心库
// ==========================================
// 依据: ISO 22400-2 设备综合效率指标体系
// 技术栈: Rust + SQLite
// 系统定位: 效能指标计算与多分辨率聚合核心
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 计算业务规则
pub mod engine;

// 配置层 - 引擎调参
pub mod config;

// 数据库基础设施(连接初始化/PRAGMA/schema 统一)
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 查询接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    EquipmentState, EventKind, LossCategory, OeeComponent, QualityEventType, ReasonCode,
    Resolution, StateCategory,
};

// 领域实体
pub use domain::{
    AnomalyKind, AnomalyWarning, Equipment, EquipmentStateEvent, LossBreakdown, LossParetoEntry,
    MetricValue, OeeCalculationResult, ProductionCountEvent, QualityEvent, RawEventBatch,
    RejectedRecord, ShiftDefinition, ShiftInstance, ShiftSummary, StateSegment, WindowTotals,
};

// 引擎
pub use engine::{
    AggregationScheduler, EventIngestor, IngestReport, LossClassifier, OeeCalculator,
    StateSegmenter,
};

// API
pub use api::{OeeQueryApi, OeeQueryService};

// 配置
pub use config::EngineConfig;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "OEE 计算引擎";
