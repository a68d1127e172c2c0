// ==========================================
// OEE 计算引擎 - API层错误类型
// ==========================================
// 职责: 定义查询层错误类型,转换引擎/仓储错误为业务错误
// 传播策略: 单设备错误不中止多设备查询; 空窗口不是错误
// ==========================================

use crate::engine::error::{CalcError, RecomputeError};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    /// 设备配置错误(如理想节拍缺失/非法),按设备隔离,不自动重试
    #[error("设备配置错误 (equipment_id={equipment_id}): {message}")]
    Configuration {
        equipment_id: String,
        message: String,
    },

    /// 查询触发重算超时且无缓存结果可降级
    #[error("重算超时且无可用缓存: {0}")]
    RecomputeTimeout(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 将仓储层的技术错误转换为查询方可理解的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg)
            | RepositoryError::UniqueConstraintViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg) => ApiError::DatabaseError(msg),
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InternalError(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::SerializationError(msg) => ApiError::InternalError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 RecomputeError 转换
// ==========================================
impl From<RecomputeError> for ApiError {
    fn from(err: RecomputeError) -> Self {
        match err {
            RecomputeError::EquipmentNotFound(id) => {
                ApiError::NotFound(format!("设备不存在: {}", id))
            }
            RecomputeError::ShiftInstanceNotFound(id) => {
                ApiError::NotFound(format!("班次实例不存在: {}", id))
            }
            RecomputeError::Configuration(CalcError::Configuration {
                equipment_id,
                message,
            }) => ApiError::Configuration {
                equipment_id,
                message,
            },
            RecomputeError::Repository(err) => err.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "Equipment".to_string(),
            id: "EQ-404".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Equipment"));
                assert!(msg.contains("EQ-404"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_recompute_error_conversion() {
        let err = RecomputeError::Configuration(CalcError::Configuration {
            equipment_id: "EQ-001".to_string(),
            message: "理想节拍无效".to_string(),
        });
        let api_err: ApiError = err.into();
        match api_err {
            ApiError::Configuration { equipment_id, .. } => assert_eq!(equipment_id, "EQ-001"),
            _ => panic!("Expected Configuration"),
        }
    }
}
