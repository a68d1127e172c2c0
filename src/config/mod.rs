// ==========================================
// OEE 计算引擎 - 配置层
// ==========================================
// 职责: 引擎调参(实时窗口长度/新鲜度阈值/重算超时/原因映射覆盖)
// 红线: 配置显式传入各引擎,引擎内部不读全局可变状态
// ==========================================

pub mod engine_config;

// 重导出核心配置
pub use engine_config::EngineConfig;
