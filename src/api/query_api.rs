// ==========================================
// OEE 计算引擎 - 查询 API
// ==========================================
// 职责: 面向看板/报表层的读取契约
// 操作: 点查 / 趋势 / 损失帕累托 / 多班次汇总
// 红线:
// - 未知设备 => NotFound; 空窗口 => NO_DATA 结果,不是裸零
// - 查询触发重算有超时上限,超时降级返回缓存并显式标记过期
// - 单设备配置错误逐台收集,不中止整个查询
// ==========================================

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::result::{LossParetoEntry, OeeCalculationResult, ShiftSummary};
use crate::domain::shift::ShiftInstance;
use crate::domain::types::Resolution;
use crate::engine::aggregation::{windows_in_range, AggregationScheduler};
use crate::repository::{EquipmentRepository, ShiftRepository};

// ==========================================
// 响应类型
// ==========================================

/// 点查响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OeeQueryResponse {
    pub result: OeeCalculationResult,
    /// 重算超时降级时为 true: 结果来自缓存,可能落后于最新事件
    pub stale: bool,
    /// 设备配置错误说明(表现性缺失的原因),非致命
    pub configuration_error: Option<String>,
}

/// 趋势响应: 有序、有限、可重入(无服务端游标状态)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendResponse {
    pub resolution: Resolution,
    pub points: Vec<OeeCalculationResult>,
    pub stale: bool,
}

/// 帕累托查询范围
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParetoScope {
    Equipment(String),
    WorkCenter(String),
}

/// 单设备配置错误条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigErrorEntry {
    pub equipment_id: String,
    pub message: String,
}

/// 损失帕累托响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossParetoResponse {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    /// 按损失时长降序排名
    pub entries: Vec<LossParetoEntry>,
    /// 按设备收集的配置错误,不中止查询
    pub config_errors: Vec<ConfigErrorEntry>,
    pub stale: bool,
}

// ==========================================
// OeeQueryService - 查询服务契约
// ==========================================
#[async_trait]
pub trait OeeQueryService: Send + Sync {
    /// 点查: 过期则触发重算,超时降级返回缓存
    async fn get_oee(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        shift_instance_id: Option<&str>,
    ) -> ApiResult<OeeQueryResponse>;

    /// 趋势: 指定分辨率的有序结果序列
    async fn get_trend(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        resolution: Resolution,
    ) -> ApiResult<TrendResponse>;

    /// 损失帕累托: 设备或工作中心范围的损失类别排名
    async fn get_loss_pareto(
        &self,
        scope: ParetoScope,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> ApiResult<LossParetoResponse>;

    /// 多班次汇总: 时长加权真实 OEE 与简单平均并列输出
    async fn get_shift_summary(
        &self,
        equipment_id: &str,
        shift_instance_ids: &[String],
    ) -> ApiResult<ShiftSummary>;
}

// ==========================================
// OeeQueryApi - 查询服务实现
// ==========================================
pub struct OeeQueryApi {
    scheduler: Arc<AggregationScheduler>,
    equipment_repo: Arc<EquipmentRepository>,
    shift_repo: Arc<ShiftRepository>,
}

impl OeeQueryApi {
    pub fn new(
        scheduler: Arc<AggregationScheduler>,
        equipment_repo: Arc<EquipmentRepository>,
        shift_repo: Arc<ShiftRepository>,
    ) -> Self {
        Self {
            scheduler,
            equipment_repo,
            shift_repo,
        }
    }

    /// 重算闭包包上超时: None = 超时(由调用方降级)
    async fn with_timeout<T, F>(&self, f: F) -> Option<ApiResult<T>>
    where
        F: FnOnce() -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = Duration::from_millis(self.scheduler.config().recompute_timeout_ms);
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(join_err)) => Some(Err(ApiError::InternalError(format!(
                "重算任务异常退出: {}",
                join_err
            )))),
            Err(_elapsed) => None,
        }
    }

    fn require_equipment(&self, equipment_id: &str) -> ApiResult<()> {
        if self.equipment_repo.find_by_id(equipment_id)?.is_none() {
            return Err(ApiError::NotFound(format!("设备不存在: {}", equipment_id)));
        }
        Ok(())
    }

    fn resolve_shift(&self, shift_instance_id: &str) -> ApiResult<ShiftInstance> {
        self.shift_repo
            .find_instance(shift_instance_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("班次实例不存在: {}", shift_instance_id))
            })
    }

    /// 范围内全部涉及设备(帕累托)
    fn scope_equipment(&self, scope: &ParetoScope) -> ApiResult<Vec<String>> {
        match scope {
            ParetoScope::Equipment(id) => {
                self.require_equipment(id)?;
                Ok(vec![id.clone()])
            }
            ParetoScope::WorkCenter(id) => {
                let list = self.equipment_repo.list_by_work_center(id)?;
                if list.is_empty() {
                    return Err(ApiError::NotFound(format!("工作中心无设备: {}", id)));
                }
                Ok(list.into_iter().map(|e| e.equipment_id).collect())
            }
        }
    }
}

#[async_trait]
impl OeeQueryService for OeeQueryApi {
    async fn get_oee(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        shift_instance_id: Option<&str>,
    ) -> ApiResult<OeeQueryResponse> {
        if end <= start {
            return Err(ApiError::InvalidInput(format!(
                "窗口终点必须晚于起点: start={} end={}",
                start, end
            )));
        }
        self.require_equipment(equipment_id)?;
        let shift = shift_instance_id
            .map(|id| self.resolve_shift(id))
            .transpose()?;

        let resolution = classify_resolution(
            start,
            end,
            shift.is_some(),
            self.scheduler.config().realtime_window_min,
        );
        let computed_at = Utc::now().naive_utc();

        let scheduler = Arc::clone(&self.scheduler);
        let eq = equipment_id.to_string();
        let shift_for_task = shift.clone();
        let attempt = self
            .with_timeout(move || {
                scheduler
                    .ensure_window_fresh(
                        &eq,
                        start,
                        end,
                        resolution,
                        shift_for_task.as_ref(),
                        computed_at,
                    )
                    .map_err(ApiError::from)
            })
            .await;

        match attempt {
            Some(result) => {
                let (outcome, _recomputed) = result?;
                Ok(OeeQueryResponse {
                    result: outcome.result,
                    stale: false,
                    configuration_error: outcome.config_error,
                })
            }
            None => {
                // 超时降级: 缓存结果 + 显式过期标志,不阻塞调用方
                tracing::warn!(
                    equipment_id,
                    %start, %end,
                    "查询触发重算超时,降级返回缓存结果"
                );
                let cached = self
                    .scheduler
                    .cached_window(equipment_id, start, end, shift_instance_id)
                    .map_err(ApiError::from)?;
                match cached {
                    Some(result) => Ok(OeeQueryResponse {
                        result,
                        stale: true,
                        configuration_error: None,
                    }),
                    None => Err(ApiError::RecomputeTimeout(format!(
                        "equipment_id={} window=[{}, {})",
                        equipment_id, start, end
                    ))),
                }
            }
        }
    }

    async fn get_trend(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        resolution: Resolution,
    ) -> ApiResult<TrendResponse> {
        if end <= start {
            return Err(ApiError::InvalidInput(format!(
                "窗口终点必须晚于起点: start={} end={}",
                start, end
            )));
        }
        self.require_equipment(equipment_id)?;
        let computed_at = Utc::now().naive_utc();

        // 窗口展开: 固定网格或班次实例
        let windows: Vec<(NaiveDateTime, NaiveDateTime, Option<ShiftInstance>)> =
            if resolution == Resolution::Shift {
                self.shift_repo
                    .list_instances_overlapping(start, end)?
                    .into_iter()
                    .map(|s| (s.actual_start, s.actual_end, Some(s)))
                    .collect()
            } else {
                windows_in_range(
                    resolution,
                    start,
                    end,
                    self.scheduler.config().realtime_window_min,
                )
                .into_iter()
                .map(|(s, e)| (s, e, None))
                .collect()
            };

        let scheduler = Arc::clone(&self.scheduler);
        let eq = equipment_id.to_string();
        let windows_for_task = windows.clone();
        let attempt = self
            .with_timeout(move || {
                let mut points = Vec::with_capacity(windows_for_task.len());
                for (s, e, shift) in &windows_for_task {
                    let (outcome, _) = scheduler
                        .ensure_window_fresh(&eq, *s, *e, resolution, shift.as_ref(), computed_at)
                        .map_err(ApiError::from)?;
                    points.push(outcome.result);
                }
                Ok(points)
            })
            .await;

        match attempt {
            Some(points) => Ok(TrendResponse {
                resolution,
                points: points?,
                stale: false,
            }),
            None => {
                // 超时降级: 仅返回已缓存的点
                tracing::warn!(equipment_id, "趋势重算超时,降级返回缓存序列");
                let mut points = Vec::new();
                for (s, e, shift) in &windows {
                    if let Some(cached) = self
                        .scheduler
                        .cached_window(
                            equipment_id,
                            *s,
                            *e,
                            shift.as_ref().map(|i| i.shift_instance_id.as_str()),
                        )
                        .map_err(ApiError::from)?
                    {
                        points.push(cached);
                    }
                }
                Ok(TrendResponse {
                    resolution,
                    points,
                    stale: true,
                })
            }
        }
    }

    async fn get_loss_pareto(
        &self,
        scope: ParetoScope,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> ApiResult<LossParetoResponse> {
        if end <= start {
            return Err(ApiError::InvalidInput(format!(
                "窗口终点必须晚于起点: start={} end={}",
                start, end
            )));
        }
        let equipment_ids = self.scope_equipment(&scope)?;
        let computed_at = Utc::now().naive_utc();
        let realtime_min = self.scheduler.config().realtime_window_min;

        let scheduler = Arc::clone(&self.scheduler);
        let ids_for_task = equipment_ids.clone();
        let attempt = self
            .with_timeout(move || {
                let windows = windows_in_range(Resolution::Hourly, start, end, realtime_min);
                let mut merged = crate::domain::result::LossBreakdown::new();
                let mut config_errors = Vec::new();
                for equipment_id in &ids_for_task {
                    let mut first_error: Option<String> = None;
                    for (s, e) in &windows {
                        // 单设备失败(含配置错误)只收集,不中止其他设备
                        match scheduler.ensure_window_fresh(
                            equipment_id,
                            *s,
                            *e,
                            Resolution::Hourly,
                            None,
                            computed_at,
                        ) {
                            Ok((outcome, _)) => {
                                merged.merge(&outcome.result.loss_breakdown);
                                if first_error.is_none() {
                                    first_error = outcome.config_error;
                                }
                            }
                            Err(err) => {
                                if first_error.is_none() {
                                    first_error = Some(err.to_string());
                                }
                            }
                        }
                    }
                    if let Some(message) = first_error {
                        config_errors.push(ConfigErrorEntry {
                            equipment_id: equipment_id.clone(),
                            message,
                        });
                    }
                }
                Ok((merged, config_errors))
            })
            .await;

        match attempt {
            Some(result) => {
                let (merged, config_errors) = result?;
                Ok(LossParetoResponse {
                    window_start: start,
                    window_end: end,
                    entries: rank_losses(&merged),
                    config_errors,
                    stale: false,
                })
            }
            None => {
                // 超时降级: 仅用已缓存的小时结果
                tracing::warn!("帕累托重算超时,降级使用缓存结果");
                let windows = windows_in_range(Resolution::Hourly, start, end, realtime_min);
                let mut merged = crate::domain::result::LossBreakdown::new();
                for equipment_id in &equipment_ids {
                    for (s, e) in &windows {
                        if let Some(cached) = self
                            .scheduler
                            .cached_window(equipment_id, *s, *e, None)
                            .map_err(ApiError::from)?
                        {
                            merged.merge(&cached.loss_breakdown);
                        }
                    }
                }
                Ok(LossParetoResponse {
                    window_start: start,
                    window_end: end,
                    entries: rank_losses(&merged),
                    config_errors: Vec::new(),
                    stale: true,
                })
            }
        }
    }

    async fn get_shift_summary(
        &self,
        equipment_id: &str,
        shift_instance_ids: &[String],
    ) -> ApiResult<ShiftSummary> {
        if shift_instance_ids.is_empty() {
            return Err(ApiError::InvalidInput("班次实例列表为空".to_string()));
        }
        self.require_equipment(equipment_id)?;
        let computed_at = Utc::now().naive_utc();

        let scheduler = Arc::clone(&self.scheduler);
        let eq = equipment_id.to_string();
        let ids = shift_instance_ids.to_vec();
        let attempt = self
            .with_timeout(move || {
                scheduler
                    .summarize_shifts(&eq, &ids, computed_at)
                    .map_err(ApiError::from)
            })
            .await;

        match attempt {
            Some(summary) => summary,
            None => Err(ApiError::RecomputeTimeout(format!(
                "equipment_id={} 班次汇总超时",
                equipment_id
            ))),
        }
    }
}

// ==========================================
// 内部工具
// ==========================================

/// 按窗口形状归类分辨率(结果存储标签)
fn classify_resolution(
    start: NaiveDateTime,
    end: NaiveDateTime,
    has_shift: bool,
    realtime_window_min: u32,
) -> Resolution {
    if has_shift {
        return Resolution::Shift;
    }
    let span = end - start;
    if span == chrono::Duration::days(1) {
        Resolution::Daily
    } else if span == chrono::Duration::hours(1) {
        Resolution::Hourly
    } else if span == chrono::Duration::minutes(realtime_window_min as i64) {
        Resolution::RealTime
    } else {
        // 任意区间按班次外的自由窗口处理,存储标签退化为实时
        Resolution::RealTime
    }
}

/// 损失分解 -> 降序帕累托
fn rank_losses(breakdown: &crate::domain::result::LossBreakdown) -> Vec<LossParetoEntry> {
    let total_duration = breakdown.total_duration_s();
    let mut entries: Vec<LossParetoEntry> = breakdown
        .iter()
        .filter(|(_, e)| e.duration_s > 0 || e.count > 0)
        .map(|(category, e)| LossParetoEntry {
            category: *category,
            duration_s: e.duration_s,
            count: e.count,
            share: if total_duration > 0 {
                e.duration_s as f64 / total_duration as f64
            } else {
                0.0
            },
        })
        .collect();
    entries.sort_by(|a, b| {
        b.duration_s
            .cmp(&a.duration_s)
            .then(b.count.cmp(&a.count))
            .then(a.category.cmp(&b.category))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::LossBreakdown;
    use crate::domain::types::LossCategory;
    use chrono::NaiveDate;

    fn dt(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_classify_resolution() {
        assert_eq!(classify_resolution(dt(0), dt(1), false, 5), Resolution::Hourly);
        assert_eq!(
            classify_resolution(dt(0), dt(0) + chrono::Duration::days(1), false, 5),
            Resolution::Daily
        );
        assert_eq!(classify_resolution(dt(0), dt(8), true, 5), Resolution::Shift);
    }

    #[test]
    fn test_rank_losses_descending_with_share() {
        let mut b = LossBreakdown::new();
        b.add_duration(LossCategory::EquipmentFailure, 600);
        b.add_duration(LossCategory::ReducedSpeed, 1800);
        b.add_duration(LossCategory::SetupAdjustment, 600);
        let entries = rank_losses(&b);
        assert_eq!(entries[0].category, LossCategory::ReducedSpeed);
        assert!((entries[0].share - 0.6).abs() < 1e-9);
        // 并列时长按类别序稳定排序
        assert_eq!(entries[1].category, LossCategory::EquipmentFailure);
        assert_eq!(entries[2].category, LossCategory::SetupAdjustment);
    }
}
