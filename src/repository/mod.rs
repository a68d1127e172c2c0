// ==========================================
// OEE 计算引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: 事件日志只追加; 结果表按键 upsert,computed_at 后写获胜
// ==========================================

pub mod anomaly_repo;
pub mod equipment_repo;
pub mod error;
pub mod event_log_repo;
pub mod result_repo;
pub mod shift_repo;

// 重导出核心仓储
pub use anomaly_repo::AnomalyLogRepository;
pub use equipment_repo::EquipmentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use event_log_repo::EventLogRepository;
pub use result_repo::OeeResultRepository;
pub use shift_repo::ShiftRepository;

use chrono::NaiveDateTime;

/// 数据库日期时间存储格式
pub const DB_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// 格式化日期时间为数据库字符串
pub fn fmt_dt(dt: NaiveDateTime) -> String {
    dt.format(DB_DATETIME_FMT).to_string()
}

/// 从数据库字符串解析日期时间
pub fn parse_dt(s: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DB_DATETIME_FMT).map_err(|e| {
        RepositoryError::FieldValueError {
            field: "datetime".to_string(),
            message: format!("无法解析日期时间 '{}': {}", s, e),
        }
    })
}
