// ==========================================
// OEE 计算引擎 - 聚合调度器
// ==========================================
// 职责: 多分辨率上卷 (实时 -> 小时 -> 天, 班次独立),
//       增量重算调度,按设备隔离失败
// 聚合铁律: 上卷比率由构成窗口的时长/计数求和重新计算,
//           禁止对子窗口比率取平均
// 并发模型: 每设备独立重算,互不加锁; 同窗口并发重算由
//           结果表按 computed_at 后写获胜定序
// ==========================================

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::domain::anomaly::{AnomalyKind, AnomalyWarning};
use crate::domain::equipment::Equipment;
use crate::domain::result::{LossBreakdown, MetricValue, OeeCalculationResult, ShiftSummary};
use crate::domain::segment::WindowTotals;
use crate::domain::shift::ShiftInstance;
use crate::domain::types::Resolution;
use crate::engine::calculator::{OeeCalculator, WindowContext};
use crate::engine::error::{RecomputeError, RecomputeResult};
use crate::engine::loss_classifier::{ClassifyInput, LossClassifier};
use crate::engine::segmenter::{SegmentationInput, StateSegmenter};
use crate::repository::{
    AnomalyLogRepository, EquipmentRepository, EventLogRepository, OeeResultRepository,
    ShiftRepository,
};

// ==========================================
// RecomputeOutcome - 单窗口重算结果
// ==========================================
pub struct RecomputeOutcome {
    pub result: OeeCalculationResult,
    /// upsert 是否生效(false = 被 computed_at 更新的已存结果拦下)
    pub stored: bool,
    /// 设备配置错误(仅表现性受影响),由查询层决定呈现方式
    pub config_error: Option<String>,
}

// ==========================================
// RunReport - 一轮调度报告
// ==========================================
#[derive(Debug, Default)]
pub struct RunReport {
    pub equipment_processed: usize,
    pub windows_recomputed: usize,
    /// 失败按设备隔离: (equipment_id, 错误描述)
    pub failures: Vec<(String, String)>,
}

// ==========================================
// AggregationScheduler - 聚合调度器
// ==========================================
pub struct AggregationScheduler {
    event_repo: Arc<EventLogRepository>,
    equipment_repo: Arc<EquipmentRepository>,
    shift_repo: Arc<ShiftRepository>,
    result_repo: Arc<OeeResultRepository>,
    anomaly_repo: Arc<AnomalyLogRepository>,
    segmenter: StateSegmenter,
    classifier: LossClassifier,
    calculator: OeeCalculator,
    config: EngineConfig,
    /// 上一轮调度的水位(入库时间),仅调度增量用,不参与计算语义
    watermark: Mutex<Option<NaiveDateTime>>,
}

impl AggregationScheduler {
    pub fn new(
        event_repo: Arc<EventLogRepository>,
        equipment_repo: Arc<EquipmentRepository>,
        shift_repo: Arc<ShiftRepository>,
        result_repo: Arc<OeeResultRepository>,
        anomaly_repo: Arc<AnomalyLogRepository>,
        config: EngineConfig,
    ) -> Self {
        let classifier = LossClassifier::with_overrides(config.reason_overrides.clone());
        Self {
            event_repo,
            equipment_repo,
            shift_repo,
            result_repo,
            anomaly_repo,
            segmenter: StateSegmenter::new(),
            classifier,
            calculator: OeeCalculator::new(),
            config,
            watermark: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==========================================
    // 单窗口重算 (原始事件 -> 结果)
    // ==========================================

    /// 从原始事件重算单设备单窗口
    ///
    /// # 说明
    /// - 幂等: 同输入同 computed_at 的重算结果逐位一致
    /// - 失败只影响本设备本窗口
    pub fn recompute_window(
        &self,
        equipment_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        resolution: Resolution,
        shift_instance: Option<&ShiftInstance>,
        computed_at: NaiveDateTime,
    ) -> RecomputeResult<RecomputeOutcome> {
        let equipment = self.require_equipment(equipment_id)?;

        // 1. 计划休息区间: 显式传入的班次实例优先,否则取窗口相交的班次
        let break_windows = match shift_instance {
            Some(instance) => instance.breaks_within(window_start, window_end),
            None => {
                let mut breaks = Vec::new();
                for instance in self
                    .shift_repo
                    .list_instances_overlapping(window_start, window_end)?
                {
                    breaks.extend(instance.breaks_within(window_start, window_end));
                }
                breaks
            }
        };

        // 2. 事件装载
        let state_events =
            self.event_repo
                .list_state_events(equipment_id, window_start, window_end)?;
        let prior = self.event_repo.last_state_before(equipment_id, window_start)?;
        let count_events =
            self.event_repo
                .list_count_events(equipment_id, window_start, window_end)?;
        let quality_events =
            self.event_repo
                .list_quality_events(equipment_id, window_start, window_end)?;

        // 3. 时段切分
        let seg = self.segmenter.segment(&SegmentationInput {
            equipment_id,
            window_start,
            window_end,
            prior_state: prior.as_ref(),
            events: &state_events,
            break_windows: &break_windows,
        });

        // 4. 计数汇总(增量计数求和)
        let mut totals = seg.totals;
        for ev in &count_events {
            totals.total_count += ev.total_count;
            totals.good_count += ev.good_count;
            totals.reject_count += ev.reject_count;
        }

        // 5. 损失分类
        let cls = self.classifier.classify_window(&ClassifyInput {
            equipment: &equipment,
            window_start,
            window_end,
            segments: &seg.segments,
            totals: &totals,
            count_events: &count_events,
            quality_events: &quality_events,
        });

        // 6. KPI 计算
        let ctx = WindowContext {
            equipment_id: equipment_id.to_string(),
            window_start,
            window_end,
            resolution,
            shift_instance_id: shift_instance.map(|s| s.shift_instance_id.clone()),
            preliminary: false,
        };
        let prior_warnings = seg.warnings.len() + cls.warnings.len();
        let calc = self
            .calculator
            .compute(&ctx, &equipment, totals, cls.breakdown, prior_warnings, computed_at);

        // 7. 告警落盘与结果 upsert
        let mut all_warnings = seg.warnings;
        all_warnings.extend(cls.warnings);
        all_warnings.extend(calc.warnings);
        self.record_warnings(&all_warnings, computed_at);

        let stored = self.result_repo.upsert(&calc.result)?;
        Ok(RecomputeOutcome {
            result: calc.result,
            stored,
            config_error: calc.config_error.map(|e| e.to_string()),
        })
    }

    /// 重算单个班次实例窗口
    pub fn recompute_shift(
        &self,
        equipment_id: &str,
        shift_instance_id: &str,
        computed_at: NaiveDateTime,
    ) -> RecomputeResult<RecomputeOutcome> {
        let instance = self
            .shift_repo
            .find_instance(shift_instance_id)?
            .ok_or_else(|| RecomputeError::ShiftInstanceNotFound(shift_instance_id.to_string()))?;
        self.recompute_window(
            equipment_id,
            instance.actual_start,
            instance.actual_end,
            Resolution::Shift,
            Some(&instance),
            computed_at,
        )
    }

    // ==========================================
    // 上卷 (小时 -> 天)
    // ==========================================

    /// 天级上卷: 由当天小时结果的求和重算
    ///
    /// # 说明
    /// - 小时输入未齐备(< 24)时结果标记 preliminary,补齐后重算转正
    /// - 比率由合并后的 WindowTotals 重新计算,不做比率平均
    pub fn rollup_daily(
        &self,
        equipment_id: &str,
        day: NaiveDate,
        computed_at: NaiveDateTime,
    ) -> RecomputeResult<RecomputeOutcome> {
        let equipment = self.require_equipment(equipment_id)?;
        let day_start = day.and_hms_opt(0, 0, 0).expect("valid midnight");
        let day_end = day_start + Duration::days(1);

        let hourly = self.result_repo.list_by_resolution(
            equipment_id,
            Resolution::Hourly,
            day_start,
            day_end,
        )?;
        let preliminary = hourly.len() < 24 || hourly.iter().any(|r| r.preliminary);

        let (totals, breakdown, anomaly_count) = merge_results(&hourly);
        let ctx = WindowContext {
            equipment_id: equipment_id.to_string(),
            window_start: day_start,
            window_end: day_end,
            resolution: Resolution::Daily,
            shift_instance_id: None,
            preliminary,
        };
        let calc = self.calculator.compute(
            &ctx,
            &equipment,
            totals,
            breakdown,
            anomaly_count as usize,
            computed_at,
        );
        self.record_warnings(&calc.warnings, computed_at);

        let stored = self.result_repo.upsert(&calc.result)?;
        Ok(RecomputeOutcome {
            result: calc.result,
            stored,
            config_error: calc.config_error.map(|e| e.to_string()),
        })
    }

    // ==========================================
    // 多班次汇总 (两种口径并列)
    // ==========================================

    /// 多班次汇总
    ///
    /// # 返回
    /// - weighted_oee: 合并时长/计数后重算的真实 OEE
    /// - naive_average_oee: 各班 OEE 简单平均,仅为快速参考;
    ///   班次时长不等时与真实值偏离
    pub fn summarize_shifts(
        &self,
        equipment_id: &str,
        shift_instance_ids: &[String],
        computed_at: NaiveDateTime,
    ) -> RecomputeResult<ShiftSummary> {
        let equipment = self.require_equipment(equipment_id)?;

        let mut shift_results = Vec::with_capacity(shift_instance_ids.len());
        for id in shift_instance_ids {
            let outcome = self.recompute_shift(equipment_id, id, computed_at)?;
            shift_results.push(outcome.result);
        }

        let window_start = shift_results
            .iter()
            .map(|r| r.window_start)
            .min()
            .unwrap_or(computed_at);
        let window_end = shift_results
            .iter()
            .map(|r| r.window_end)
            .max()
            .unwrap_or(computed_at);

        // 真实口径: 求和后重算
        let (totals, breakdown, _) = merge_results(&shift_results);
        let ctx = WindowContext {
            equipment_id: equipment_id.to_string(),
            window_start,
            window_end,
            resolution: Resolution::Shift,
            shift_instance_id: None,
            preliminary: false,
        };
        let weighted = self
            .calculator
            .compute(&ctx, &equipment, totals, breakdown, 0, computed_at);

        // 近似口径: 已定义 OEE 的简单平均
        let defined: Vec<f64> = shift_results
            .iter()
            .filter_map(|r| r.oee.value())
            .collect();
        let naive_average_oee = if defined.is_empty() {
            MetricValue::NoData
        } else {
            MetricValue::Defined(defined.iter().sum::<f64>() / defined.len() as f64)
        };

        Ok(ShiftSummary {
            equipment_id: equipment_id.to_string(),
            window_start,
            window_end,
            shift_count: shift_results.len(),
            weighted_oee: weighted.result.oee,
            naive_average_oee,
            totals,
        })
    }

    // ==========================================
    // 新鲜度与按需重算
    // ==========================================

    /// 取窗口结果,过期则重算
    ///
    /// # 返回
    /// - (result, recomputed): recomputed 表示本次调用触发了重算
    pub fn ensure_window_fresh(
        &self,
        equipment_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        resolution: Resolution,
        shift_instance: Option<&ShiftInstance>,
        computed_at: NaiveDateTime,
    ) -> RecomputeResult<(RecomputeOutcome, bool)> {
        let shift_id = shift_instance.map(|s| s.shift_instance_id.as_str());
        let cached =
            self.result_repo
                .find_by_key(equipment_id, window_start, window_end, shift_id)?;

        if let Some(cached) = cached {
            let latest = self
                .event_repo
                .max_ingested_at(equipment_id, window_start, window_end)?;
            let fresh = match latest {
                Some(latest) => cached.computed_at >= latest,
                None => true,
            };
            if fresh && !cached.preliminary {
                return Ok((
                    RecomputeOutcome {
                        result: cached,
                        stored: false,
                        config_error: None,
                    },
                    false,
                ));
            }
            // 已算过的窗口因迟到事件失效: 记告警后重算
            if !fresh {
                self.record_warnings(
                    &[AnomalyWarning::for_window(
                        equipment_id,
                        AnomalyKind::LateEvent,
                        window_start,
                        window_end,
                        format!(
                            "窗口已于 {} 计算,其后有新事件入库,触发重算",
                            cached.computed_at
                        ),
                        serde_json::json!({
                            "cached_computed_at": cached.computed_at.to_string(),
                            "latest_ingested_at": latest.map(|t| t.to_string()),
                        }),
                    )],
                    computed_at,
                );
            }
        }

        let outcome = self.recompute_window(
            equipment_id,
            window_start,
            window_end,
            resolution,
            shift_instance,
            computed_at,
        )?;
        Ok((outcome, true))
    }

    /// 窗口缓存结果(不触发重算),供超时降级路径使用
    pub fn cached_window(
        &self,
        equipment_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        shift_instance_id: Option<&str>,
    ) -> RecomputeResult<Option<OeeCalculationResult>> {
        Ok(self.result_repo.find_by_key(
            equipment_id,
            window_start,
            window_end,
            shift_instance_id,
        )?)
    }

    // ==========================================
    // 调度循环
    // ==========================================

    /// 一轮增量调度
    ///
    /// # 说明
    /// - 自上轮水位以来有新事件的设备逐台处理,每设备一个阻塞任务
    /// - 任一设备失败(如配置错误)只记入报告,不影响其他设备
    pub async fn run_once(self: Arc<Self>, now: NaiveDateTime) -> RunReport {
        let since = { *self.watermark.lock().expect("watermark lock") };

        let equipment_ids: Vec<String> = match since {
            Some(since) => match self.event_repo.equipment_with_events_since(since) {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(error = %e, "增量设备清单查询失败");
                    return RunReport::default();
                }
            },
            // 首轮: 全量在用设备
            None => match self.equipment_repo.list_active() {
                Ok(list) => list.into_iter().map(|e| e.equipment_id).collect(),
                Err(e) => {
                    tracing::error!(error = %e, "设备清单查询失败");
                    return RunReport::default();
                }
            },
        };

        let mut report = RunReport::default();
        let mut handles = Vec::with_capacity(equipment_ids.len());
        for equipment_id in equipment_ids {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::task::spawn_blocking(move || {
                let windows = scheduler.process_equipment(&equipment_id, now);
                (equipment_id, windows)
            }));
        }

        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok((equipment_id, Ok(windows))) => {
                    report.equipment_processed += 1;
                    report.windows_recomputed += windows;
                    tracing::debug!(equipment_id = %equipment_id, windows, "设备重算完成");
                }
                Ok((equipment_id, Err(e))) => {
                    tracing::warn!(equipment_id = %equipment_id, error = %e, "设备重算失败,已隔离");
                    report.failures.push((equipment_id, e.to_string()));
                }
                Err(e) => {
                    tracing::error!(error = %e, "重算任务异常退出");
                }
            }
        }

        *self.watermark.lock().expect("watermark lock") = Some(now);
        report
    }

    /// 调度循环: 按配置间隔持续增量重算
    pub async fn run_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.scheduler_interval_s));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now().naive_utc();
            let report = Arc::clone(&self).run_once(now).await;
            tracing::info!(
                equipment = report.equipment_processed,
                windows = report.windows_recomputed,
                failures = report.failures.len(),
                "调度轮完成"
            );
        }
    }

    /// 单设备一轮重算: 实时窗口 + 当前/上一小时 + 当天上卷 + 初步结果转正
    fn process_equipment(
        &self,
        equipment_id: &str,
        now: NaiveDateTime,
    ) -> RecomputeResult<usize> {
        let mut windows = 0;

        // 最近一个已完整的实时窗口
        let (rt_start, rt_end) = align_realtime(now, self.config.realtime_window_min);
        let rt_len = Duration::minutes(self.config.realtime_window_min as i64);
        self.recompute_window(
            equipment_id,
            rt_start - rt_len,
            rt_end - rt_len,
            Resolution::RealTime,
            None,
            now,
        )?;
        windows += 1;

        // 当前小时与上一小时
        let (hour_start, hour_end) = align_hour(now);
        for (s, e) in [
            (hour_start - Duration::hours(1), hour_end - Duration::hours(1)),
            (hour_start, hour_end),
        ] {
            self.recompute_window(equipment_id, s, e, Resolution::Hourly, None, now)?;
            windows += 1;
        }

        // 当天上卷
        self.rollup_daily(equipment_id, now.date(), now)?;
        windows += 1;

        // 既有初步结果尝试转正(构成窗口补齐后)
        for stale in self.result_repo.list_preliminary(equipment_id)? {
            if stale.resolution == Resolution::Daily && stale.window_start.date() != now.date() {
                self.rollup_daily(equipment_id, stale.window_start.date(), now)?;
                windows += 1;
            }
        }

        Ok(windows)
    }

    // ==========================================
    // 内部工具
    // ==========================================

    fn require_equipment(&self, equipment_id: &str) -> RecomputeResult<Equipment> {
        self.equipment_repo
            .find_by_id(equipment_id)?
            .ok_or_else(|| RecomputeError::EquipmentNotFound(equipment_id.to_string()))
    }

    /// 告警输出: 日志必记,落盘受配置开关控制
    /// 落盘失败降级为日志,不中断计算主流程
    fn record_warnings(&self, warnings: &[AnomalyWarning], created_at: NaiveDateTime) {
        for w in warnings {
            tracing::warn!(
                equipment_id = %w.equipment_id,
                kind = %w.kind,
                message = %w.message,
                "异常告警"
            );
        }
        if self.config.anomaly_log_enabled && !warnings.is_empty() {
            if let Err(e) = self.anomaly_repo.append_batch(warnings, created_at) {
                tracing::error!(error = %e, "异常告警落盘失败,已降级为仅日志");
            }
        }
    }
}

// ==========================================
// 上卷合并
// ==========================================

/// 合并构成窗口: 时长/计数求和,损失分解相加,告警数累计
pub fn merge_results(
    results: &[OeeCalculationResult],
) -> (WindowTotals, LossBreakdown, i64) {
    let mut totals = WindowTotals::default();
    let mut breakdown = LossBreakdown::new();
    let mut anomaly_count = 0;
    for r in results {
        totals.merge(&r.totals);
        breakdown.merge(&r.loss_breakdown);
        anomaly_count += r.anomaly_count;
    }
    (totals, breakdown, anomaly_count)
}

// ==========================================
// 窗口对齐
// ==========================================

/// 所在小时窗口 [小时整点, 下一小时整点)
pub fn align_hour(t: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = t
        .date()
        .and_hms_opt(t.hour(), 0, 0)
        .expect("valid hour boundary");
    (start, start + Duration::hours(1))
}

/// 所在自然日窗口 [零点, 次日零点)
pub fn align_day(t: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = t.date().and_hms_opt(0, 0, 0).expect("valid midnight");
    (start, start + Duration::days(1))
}

/// 所在实时窗口 [n*window_min 分钟格点, 下一格点)
pub fn align_realtime(t: NaiveDateTime, window_min: u32) -> (NaiveDateTime, NaiveDateTime) {
    let minute = (t.minute() / window_min) * window_min;
    let start = t
        .date()
        .and_hms_opt(t.hour(), minute, 0)
        .expect("valid realtime boundary");
    (start, start + Duration::minutes(window_min as i64))
}

/// 覆盖 [start, end) 的对齐窗口网格
pub fn windows_in_range(
    resolution: Resolution,
    start: NaiveDateTime,
    end: NaiveDateTime,
    realtime_window_min: u32,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let (mut cursor, step) = match resolution {
        Resolution::Hourly => (align_hour(start).0, Duration::hours(1)),
        Resolution::Daily => (align_day(start).0, Duration::days(1)),
        Resolution::RealTime => (
            align_realtime(start, realtime_window_min).0,
            Duration::minutes(realtime_window_min as i64),
        ),
        // 班次窗口不对齐固定网格,由调用方按班次实例展开
        Resolution::Shift => return Vec::new(),
    };

    let mut windows = Vec::new();
    while cursor < end {
        windows.push((cursor, cursor + step));
        cursor += step;
    }
    windows
}
