// ==========================================
// OEE 计算引擎 - OEE 计算器
// ==========================================
// 依据: ISO 22400-2 公式
//   plannedProduction = scheduled - breaks - plannedDowntime
//   operating         = plannedProduction - availabilityLoss
//   availability      = operating / plannedProduction
//   performance       = min(actualCount / theoreticalOutput, 1.0)
//   quality           = goodCount / totalCount
//   oee               = A * P * Q (三者齐备时)
//   teep              = oee * (plannedProduction / calendar)
// 红线:
// - 分母为零 => NoData,永不折算为 0
// - 已定义的比率必须落在 [0,1],由钳制保证而非巧合
// - 表现性钳制到 1.0 记 PERFORMANCE_CLAMPED 告警(节拍标定审计)
// - computed_at 显式传参: 同输入重算结果逐位一致
// ==========================================

use chrono::NaiveDateTime;
use serde_json::json;

use crate::domain::anomaly::{AnomalyKind, AnomalyWarning};
use crate::domain::equipment::Equipment;
use crate::domain::result::{LossBreakdown, MetricValue, OeeCalculationResult};
use crate::domain::segment::WindowTotals;
use crate::domain::types::{OeeComponent, Resolution};
use crate::engine::error::CalcError;

// ==========================================
// WindowContext - 窗口标识
// ==========================================
#[derive(Debug, Clone)]
pub struct WindowContext {
    pub equipment_id: String,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub resolution: Resolution,
    pub shift_instance_id: Option<String>,
    /// 构成窗口未齐备时的初步结果标记(上卷时由调度器设置)
    pub preliminary: bool,
}

// ==========================================
// CalcOutcome - 计算结果
// ==========================================
pub struct CalcOutcome {
    pub result: OeeCalculationResult,
    pub warnings: Vec<AnomalyWarning>,
    /// 配置错误只对该设备的表现性致命,可用率/质量照常计算,
    /// 由调用方决定如何向查询方呈现
    pub config_error: Option<CalcError>,
}

// ==========================================
// OeeCalculator - OEE 计算器
// ==========================================
/// 无状态引擎,不读系统时钟,不做数据访问
pub struct OeeCalculator;

impl Default for OeeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl OeeCalculator {
    pub fn new() -> Self {
        Self
    }

    /// 计算单窗口 KPI
    ///
    /// # 参数
    /// - `ctx`: 窗口标识
    /// - `equipment`: 设备主数据(理想节拍)
    /// - `totals`: 时段切分/上卷求和得到的时长与计数
    /// - `loss_breakdown`: 损失分类器输出(上卷时为子窗口合并)
    /// - `prior_warning_count`: 切分/分类阶段已产生的告警数,计入结果
    /// - `computed_at`: 计算时间戳,由调用方提供
    pub fn compute(
        &self,
        ctx: &WindowContext,
        equipment: &Equipment,
        totals: WindowTotals,
        loss_breakdown: LossBreakdown,
        prior_warning_count: usize,
        computed_at: NaiveDateTime,
    ) -> CalcOutcome {
        let mut warnings = Vec::new();
        let mut config_error = None;

        let planned_production_s = totals.planned_production_s().max(0);
        let operating_s = totals.operating_s;

        // 1. 可用率 = 运行 / 计划生产
        let availability = clamp01(MetricValue::ratio(
            operating_s as f64,
            planned_production_s as f64,
        ));

        // 2. 表现性 = min(实际产出 / 理论产出, 1.0)
        let performance = if !equipment.has_valid_cycle_time() {
            config_error = Some(CalcError::Configuration {
                equipment_id: equipment.equipment_id.clone(),
                message: format!(
                    "理想节拍无效: {} 秒/件,表现性不可计算",
                    equipment.ideal_cycle_time_s
                ),
            });
            MetricValue::NoData
        } else {
            let theoretical = operating_s as f64 / equipment.ideal_cycle_time_s;
            match MetricValue::ratio(totals.total_count as f64, theoretical) {
                MetricValue::Defined(raw) if raw > 1.0 => {
                    // 节拍标定偏差或重复计数: 钳制并告警,不得报出 >100%
                    warnings.push(AnomalyWarning::for_window(
                        &ctx.equipment_id,
                        AnomalyKind::PerformanceClamped,
                        ctx.window_start,
                        ctx.window_end,
                        format!(
                            "表现性 {:.4} 超出 1.0,已钳制; 理论产出 {:.1} 件,实际 {} 件",
                            raw, theoretical, totals.total_count
                        ),
                        json!({
                            "raw_performance": raw,
                            "theoretical_output": theoretical,
                            "actual_count": totals.total_count,
                            "ideal_cycle_time_s": equipment.ideal_cycle_time_s,
                        }),
                    ));
                    MetricValue::Defined(1.0)
                }
                v => clamp01(v),
            }
        };

        // 3. 质量合格率 = 合格 / 总产出
        let quality = clamp01(MetricValue::ratio(
            totals.good_count as f64,
            totals.total_count as f64,
        ));

        // 4. OEE: 三分量齐备时相乘,否则 NoData 并标注缺失分量
        let mut missing_components = Vec::new();
        if !availability.is_defined() {
            missing_components.push(OeeComponent::Availability);
        }
        if !performance.is_defined() {
            missing_components.push(OeeComponent::Performance);
        }
        if !quality.is_defined() {
            missing_components.push(OeeComponent::Quality);
        }

        let oee = match (availability.value(), performance.value(), quality.value()) {
            (Some(a), Some(p), Some(q)) => MetricValue::Defined(a * p * q),
            _ => MetricValue::NoData,
        };

        // 5. 利用率与 TEEP
        let utilization = clamp01(MetricValue::ratio(
            planned_production_s as f64,
            totals.calendar_s as f64,
        ));
        let teep = match (oee.value(), utilization.value()) {
            (Some(o), Some(u)) => MetricValue::Defined(o * u),
            _ => MetricValue::NoData,
        };

        let anomaly_count = (prior_warning_count + warnings.len()) as i64;

        CalcOutcome {
            result: OeeCalculationResult {
                equipment_id: ctx.equipment_id.clone(),
                window_start: ctx.window_start,
                window_end: ctx.window_end,
                shift_instance_id: ctx.shift_instance_id.clone(),
                resolution: ctx.resolution,
                availability,
                performance,
                quality,
                oee,
                utilization,
                teep,
                missing_components,
                loss_breakdown,
                totals,
                preliminary: ctx.preliminary,
                anomaly_count,
                computed_at,
            },
            warnings,
            config_error,
        }
    }
}

/// 已定义比率钳入 [0,1](硬不变量,不依赖输入数据自洽)
fn clamp01(v: MetricValue) -> MetricValue {
    match v {
        MetricValue::Defined(x) => MetricValue::Defined(x.clamp(0.0, 1.0)),
        MetricValue::NoData => MetricValue::NoData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn ctx() -> WindowContext {
        WindowContext {
            equipment_id: "EQ-001".to_string(),
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            resolution: Resolution::Shift,
            shift_instance_id: Some("S-20260302-A".to_string()),
            preliminary: false,
        }
    }

    fn equipment(cycle_s: f64) -> Equipment {
        Equipment {
            equipment_id: "EQ-001".to_string(),
            name: "冲压线 1".to_string(),
            work_center_id: "WC-A".to_string(),
            ideal_cycle_time_s: cycle_s,
            nominal_speed_per_h: None,
            active: true,
        }
    }

    /// 标准算例: 480 分钟班次, 30 分钟计划休息, 60 分钟故障,
    /// 理论 450 件,实际 350 件,合格 330 件
    #[test]
    fn test_worked_example() {
        let calc = OeeCalculator::new();
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            planned_break_s: 30 * 60,
            planned_downtime_s: 0,
            availability_loss_s: 60 * 60,
            operating_s: 390 * 60,
            total_count: 350,
            good_count: 330,
            reject_count: 20,
        };
        // 理论产出 450 件 <=> 理想节拍 = 390*60/450 = 52 秒/件
        let outcome = calc.compute(
            &ctx(),
            &equipment(52.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );
        let r = &outcome.result;

        assert_eq!(r.totals.planned_production_s(), 450 * 60);
        let a = r.availability.value().unwrap();
        let p = r.performance.value().unwrap();
        let q = r.quality.value().unwrap();
        let oee = r.oee.value().unwrap();
        assert!((a - 390.0 / 450.0).abs() < 1e-9);
        assert!((p - 350.0 / 450.0).abs() < 1e-9);
        assert!((q - 330.0 / 350.0).abs() < 1e-9);
        assert!((oee - a * p * q).abs() < 1e-12);
        assert!((a - 0.867).abs() < 0.001);
        assert!((p - 0.778).abs() < 0.001);
        assert!((q - 0.943).abs() < 0.001);
        assert!((oee - 0.636).abs() < 0.001);
        assert!(outcome.warnings.is_empty());
        assert!(outcome.config_error.is_none());
    }

    #[test]
    fn test_zero_planned_production_is_no_data_not_zero() {
        let calc = OeeCalculator::new();
        let totals = WindowTotals {
            calendar_s: 8 * 3600,
            ..Default::default()
        };
        let outcome = calc.compute(
            &ctx(),
            &equipment(52.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );
        let r = &outcome.result;

        assert_eq!(r.availability, MetricValue::NoData);
        assert_eq!(r.quality, MetricValue::NoData);
        assert_eq!(r.oee, MetricValue::NoData);
        // 缺失分量显式标注
        assert!(r.missing_components.contains(&OeeComponent::Availability));
        assert!(r.missing_components.contains(&OeeComponent::Quality));
    }

    #[test]
    fn test_performance_clamped_with_warning() {
        let calc = OeeCalculator::new();
        // 节拍标定偏大: 理论 300 件,实际报 350 件 => 原始表现性 > 1
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            operating_s: 480 * 60,
            total_count: 350,
            good_count: 350,
            ..Default::default()
        };
        let outcome = calc.compute(
            &ctx(),
            &equipment(96.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );

        assert_eq!(outcome.result.performance, MetricValue::Defined(1.0));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, AnomalyKind::PerformanceClamped);
        assert_eq!(outcome.result.anomaly_count, 1);
        // 钳制后 OEE 仍然在 [0,1]
        assert!(outcome.result.oee.value().unwrap() <= 1.0);
    }

    #[test]
    fn test_invalid_cycle_time_is_config_error_performance_only() {
        let calc = OeeCalculator::new();
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            operating_s: 400 * 60,
            availability_loss_s: 80 * 60,
            total_count: 100,
            good_count: 90,
            reject_count: 10,
            ..Default::default()
        };
        let outcome = calc.compute(
            &ctx(),
            &equipment(0.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );
        let r = &outcome.result;

        // 配置错误只打掉表现性,可用率/质量照常
        assert!(outcome.config_error.is_some());
        assert!(r.availability.is_defined());
        assert!(r.quality.is_defined());
        assert_eq!(r.performance, MetricValue::NoData);
        assert_eq!(r.oee, MetricValue::NoData);
        assert_eq!(r.missing_components, vec![OeeComponent::Performance]);
    }

    #[test]
    fn test_recompute_is_bit_identical() {
        let calc = OeeCalculator::new();
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            planned_break_s: 30 * 60,
            availability_loss_s: 60 * 60,
            operating_s: 390 * 60,
            total_count: 350,
            good_count: 330,
            reject_count: 20,
            ..Default::default()
        };
        let a = calc.compute(
            &ctx(),
            &equipment(52.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );
        let b = calc.compute(
            &ctx(),
            &equipment(52.0),
            totals,
            LossBreakdown::new(),
            0,
            dt(16, 5),
        );
        assert_eq!(a.result, b.result);
    }
}
