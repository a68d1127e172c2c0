// ==========================================
// OEE 计算引擎 - API 层
// ==========================================
// 职责: 提供查询接口,供看板/报表层调用
// ==========================================

pub mod error;
pub mod query_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use query_api::{
    ConfigErrorEntry, LossParetoResponse, OeeQueryApi, OeeQueryResponse, OeeQueryService,
    ParetoScope, TrendResponse,
};
