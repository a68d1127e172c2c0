// ==========================================
// OEE 计算引擎 - 引擎层
// ==========================================
// 职责: 实现计算业务规则,不拼 SQL
// 数据流: 接收器 -> 时段切分 -> 损失分类 -> KPI 计算 -> 聚合上卷
// 红线: 计算期错误按设备+窗口隔离,告警必须输出 reason
// ==========================================

pub mod aggregation;
pub mod calculator;
pub mod error;
pub mod ingestor;
pub mod loss_classifier;
pub mod segmenter;

// 重导出核心引擎
pub use aggregation::{
    align_day, align_hour, align_realtime, merge_results, windows_in_range,
    AggregationScheduler, RecomputeOutcome, RunReport,
};
pub use calculator::{CalcOutcome, OeeCalculator, WindowContext};
pub use error::{CalcError, RecomputeError, RecomputeResult};
pub use ingestor::{EventIngestor, IngestReport};
pub use loss_classifier::{ClassifyInput, ClassifyOutcome, LossClassifier};
pub use segmenter::{SegmentationInput, SegmentationOutcome, StateSegmenter};
