// ==========================================
// OEE 计算引擎 - 引擎层错误类型
// ==========================================
// 传播策略: 计算期错误只影响当事设备+窗口,
// 不得中断其他设备或其他窗口的计算
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 计算错误
#[derive(Error, Debug)]
pub enum CalcError {
    /// 设备配置无效(如 ideal_cycle_time <= 0)
    /// 仅对该设备的表现性计算致命,不自动重试
    #[error("设备配置无效 (equipment_id={equipment_id}): {message}")]
    Configuration {
        equipment_id: String,
        message: String,
    },
}

/// 窗口重算错误
#[derive(Error, Debug)]
pub enum RecomputeError {
    #[error("设备未找到: {0}")]
    EquipmentNotFound(String),

    #[error("班次实例未找到: {0}")]
    ShiftInstanceNotFound(String),

    #[error(transparent)]
    Configuration(#[from] CalcError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result 类型别名
pub type RecomputeResult<T> = Result<T, RecomputeError>;
