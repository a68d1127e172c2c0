// ==========================================
// OEE 计算引擎 - 引擎配置
// ==========================================
// 加载顺序: 默认值 -> JSON 配置文件覆盖
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::domain::types::LossCategory;

/// 实时窗口长度允许范围(分钟)
pub const REALTIME_WINDOW_MIN_RANGE: (u32, u32) = (1, 5);

// ==========================================
// EngineConfig - 引擎配置
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 实时聚合窗口长度(分钟,1-5)
    pub realtime_window_min: u32,

    /// 查询触发重算的超时上限(毫秒)
    /// 超时后返回带过期标志的缓存结果,不阻塞调用方
    pub recompute_timeout_ms: u64,

    /// 调度循环间隔(秒)
    pub scheduler_interval_s: u64,

    /// 原因代码 -> 损失类别的映射覆盖(键为上游原始代码)
    pub reason_overrides: HashMap<String, LossCategory>,

    /// 是否持久化异常告警(关闭后仅日志输出)
    pub anomaly_log_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            realtime_window_min: 5,
            recompute_timeout_ms: 2_000,
            scheduler_interval_s: 60,
            reason_overrides: HashMap::new(),
            anomaly_log_enabled: true,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 文件加载,文件不存在时回落默认值
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 配置合法性校验
    pub fn validate(&self) -> anyhow::Result<()> {
        let (lo, hi) = REALTIME_WINDOW_MIN_RANGE;
        if self.realtime_window_min < lo || self.realtime_window_min > hi {
            anyhow::bail!(
                "realtime_window_min 超出范围 [{}, {}]: {}",
                lo,
                hi,
                self.realtime_window_min
            );
        }
        if self.recompute_timeout_ms == 0 {
            anyhow::bail!("recompute_timeout_ms 不能为 0");
        }
        Ok(())
    }
}
