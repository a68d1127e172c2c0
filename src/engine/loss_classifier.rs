// ==========================================
// OEE 计算引擎 - 六大损失分类器
// ==========================================
// 依据: ISO 22400 六大损失分类
// 分类驱动: 原因代码 / 质量事件类型
// 红线: 分类永不失败: 未映射代码落入兜底类别并告警,
//       未分类的损失仍然计入可用率/表现性/质量口径
// ==========================================

use serde_json::json;
use std::collections::HashMap;

use crate::domain::anomaly::{AnomalyKind, AnomalyWarning};
use crate::domain::equipment::Equipment;
use crate::domain::events::{ProductionCountEvent, QualityEvent};
use crate::domain::result::LossBreakdown;
use crate::domain::segment::{StateSegment, WindowTotals};
use crate::domain::types::{LossCategory, QualityEventType, ReasonCode, StateCategory};
use chrono::NaiveDateTime;

// ==========================================
// ClassifyInput - 分类输入
// ==========================================
pub struct ClassifyInput<'a> {
    pub equipment: &'a Equipment,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub segments: &'a [StateSegment],
    pub totals: &'a WindowTotals,
    pub count_events: &'a [ProductionCountEvent],
    pub quality_events: &'a [QualityEvent],
}

// ==========================================
// ClassifyOutcome - 分类结果
// ==========================================
pub struct ClassifyOutcome {
    pub breakdown: LossBreakdown,
    pub warnings: Vec<AnomalyWarning>,
}

// ==========================================
// LossClassifier - 六大损失分类器
// ==========================================
/// 原因代码到损失类别的映射表可由配置覆盖,
/// 覆盖键为上游原始代码字符串
pub struct LossClassifier {
    overrides: HashMap<String, LossCategory>,
}

impl Default for LossClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LossClassifier {
    pub fn new() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// 带配置覆盖的构造
    pub fn with_overrides(overrides: HashMap<String, LossCategory>) -> Self {
        Self { overrides }
    }

    /// 分类单窗口的全部损失
    ///
    /// # 说明
    /// - 可用率损失时段按原因代码归类
    /// - 表现性缺口 = 运行时长 - 实际产出 x 理想节拍,
    ///   按观测节拍拆为降速损失与空转/小停机
    /// - 质量损失按质量事件类型与不合格计数归类,
    ///   时长按件数 x 理想节拍折算
    pub fn classify_window(&self, input: &ClassifyInput<'_>) -> ClassifyOutcome {
        let mut breakdown = LossBreakdown::new();
        let mut warnings = Vec::new();

        // 1. 可用率损失时段
        for seg in input.segments {
            if seg.category != StateCategory::AvailabilityLoss {
                continue;
            }
            let category = self.classify_reason(&seg.reason_code);
            if category == LossCategory::OtherLosses {
                warnings.push(AnomalyWarning::for_window(
                    &input.equipment.equipment_id,
                    AnomalyKind::UnclassifiedReason,
                    input.window_start,
                    input.window_end,
                    format!("原因代码 {} 未映射,计入其他损失", seg.reason_code),
                    json!({
                        "reason_code": seg.reason_code.to_db_str(),
                        "segment_start": seg.start.to_string(),
                        "segment_end": seg.end.to_string(),
                    }),
                ));
            }
            breakdown.add_duration(category, seg.duration_s());
        }

        // 2. 表现性缺口
        if input.equipment.has_valid_cycle_time() && input.totals.total_count > 0 {
            let cycle = input.equipment.ideal_cycle_time_s;
            let ideal_time_s = (input.totals.total_count as f64 * cycle).round() as i64;
            let shortfall_s = input.totals.operating_s - ideal_time_s;
            if shortfall_s > 0 {
                // 观测节拍可用时,先归因降速,余量归小停机
                let speed_loss_s = self
                    .mean_actual_cycle(input.count_events)
                    .map(|actual| {
                        ((actual - cycle).max(0.0) * input.totals.total_count as f64).round()
                            as i64
                    })
                    .unwrap_or(0)
                    .min(shortfall_s);
                if speed_loss_s > 0 {
                    breakdown.add_duration(LossCategory::ReducedSpeed, speed_loss_s);
                }
                if shortfall_s > speed_loss_s {
                    breakdown
                        .add_duration(LossCategory::IdlingMinorStops, shortfall_s - speed_loss_s);
                }
            }
        }

        // 3. 质量损失
        let cycle_valid = input.equipment.has_valid_cycle_time();
        let cycle = input.equipment.ideal_cycle_time_s;
        let mut startup_quantity = 0i64;
        for ev in input.quality_events {
            match ev.event_type {
                QualityEventType::StartupLoss => {
                    startup_quantity += ev.quantity;
                    breakdown.add_count(LossCategory::ReducedYield, ev.quantity);
                }
                QualityEventType::Scrap | QualityEventType::Rework => {
                    breakdown.add_count(LossCategory::ProcessDefects, ev.quantity);
                }
            }
        }
        // 质量事件未覆盖的不合格计数兜底计入过程废品
        let uncovered_rejects =
            (input.totals.reject_count - breakdown.total_count()).max(0);
        if uncovered_rejects > 0 {
            breakdown.add_count(LossCategory::ProcessDefects, uncovered_rejects);
        }
        // 质量损失的时长折算(件数 x 理想节拍)
        if cycle_valid {
            let defects = breakdown.get(LossCategory::ProcessDefects).count;
            if defects > 0 {
                breakdown.add_duration(
                    LossCategory::ProcessDefects,
                    (defects as f64 * cycle).round() as i64,
                );
            }
            if startup_quantity > 0 {
                breakdown.add_duration(
                    LossCategory::ReducedYield,
                    (startup_quantity as f64 * cycle).round() as i64,
                );
            }
        }

        ClassifyOutcome {
            breakdown,
            warnings,
        }
    }

    /// 原因代码归类: 配置覆盖优先,其次内置映射,兜底其他损失
    pub fn classify_reason(&self, reason: &ReasonCode) -> LossCategory {
        if let Some(category) = self.overrides.get(&reason.to_db_str()) {
            return *category;
        }
        match reason {
            ReasonCode::Breakdown
            | ReasonCode::MechanicalFailure
            | ReasonCode::ElectricalFailure => LossCategory::EquipmentFailure,
            ReasonCode::Setup | ReasonCode::Adjustment | ReasonCode::ToolChange => {
                LossCategory::SetupAdjustment
            }
            ReasonCode::MaterialShortage | ReasonCode::MinorStop | ReasonCode::NoDemand => {
                LossCategory::IdlingMinorStops
            }
            ReasonCode::SpeedLoss => LossCategory::ReducedSpeed,
            // 计划维护不属于六大损失,出现在非计划时段时按兜底处理
            ReasonCode::PlannedMaintenance => LossCategory::OtherLosses,
            ReasonCode::Other(_) => LossCategory::OtherLosses,
        }
    }

    /// 窗口内观测节拍均值(秒/件)
    fn mean_actual_cycle(&self, count_events: &[ProductionCountEvent]) -> Option<f64> {
        let observed: Vec<f64> = count_events
            .iter()
            .filter_map(|ev| ev.actual_cycle_time_s)
            .collect();
        if observed.is_empty() {
            None
        } else {
            Some(observed.iter().sum::<f64>() / observed.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EquipmentState;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn equipment() -> Equipment {
        Equipment {
            equipment_id: "EQ-001".to_string(),
            name: "冲压线 1".to_string(),
            work_center_id: "WC-A".to_string(),
            ideal_cycle_time_s: 52.0,
            nominal_speed_per_h: None,
            active: true,
        }
    }

    fn loss_segment(
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: ReasonCode,
    ) -> StateSegment {
        StateSegment {
            equipment_id: "EQ-001".to_string(),
            state: EquipmentState::Down,
            category: StateCategory::AvailabilityLoss,
            reason_code: reason,
            start,
            end,
        }
    }

    #[test]
    fn test_availability_segments_classified_by_reason() {
        let classifier = LossClassifier::new();
        let segments = vec![
            loss_segment(dt(10, 0), dt(11, 0), ReasonCode::Breakdown),
            loss_segment(dt(13, 0), dt(13, 20), ReasonCode::Setup),
        ];
        let totals = WindowTotals {
            calendar_s: 8 * 3600,
            scheduled_s: 8 * 3600,
            availability_loss_s: 80 * 60,
            operating_s: 8 * 3600 - 80 * 60,
            ..Default::default()
        };
        let outcome = classifier.classify_window(&ClassifyInput {
            equipment: &equipment(),
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            segments: &segments,
            totals: &totals,
            count_events: &[],
            quality_events: &[],
        });

        assert_eq!(
            outcome.breakdown.get(LossCategory::EquipmentFailure).duration_s,
            3600
        );
        assert_eq!(
            outcome.breakdown.get(LossCategory::SetupAdjustment).duration_s,
            1200
        );
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_unmapped_reason_falls_into_other_with_warning() {
        let classifier = LossClassifier::new();
        let segments = vec![loss_segment(
            dt(10, 0),
            dt(10, 30),
            ReasonCode::parse("VENDOR_X_CODE_42"),
        )];
        let totals = WindowTotals {
            calendar_s: 8 * 3600,
            scheduled_s: 8 * 3600,
            availability_loss_s: 1800,
            operating_s: 8 * 3600 - 1800,
            ..Default::default()
        };
        let outcome = classifier.classify_window(&ClassifyInput {
            equipment: &equipment(),
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            segments: &segments,
            totals: &totals,
            count_events: &[],
            quality_events: &[],
        });

        // 分类不失败: 落入兜底类别,损失仍被计入
        assert_eq!(
            outcome.breakdown.get(LossCategory::OtherLosses).duration_s,
            1800
        );
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, AnomalyKind::UnclassifiedReason);
    }

    #[test]
    fn test_performance_shortfall_split() {
        let classifier = LossClassifier::new();
        // 运行 390 分钟,理想节拍 52 秒,产出 400 件 => 理想耗时 20800 秒
        // 缺口 = 23400 - 20800 = 2600 秒
        // 观测节拍 55 秒 => 降速损失 = (55-52)*400 = 1200 秒,余 1400 秒归小停机
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            operating_s: 390 * 60,
            availability_loss_s: 90 * 60,
            total_count: 400,
            good_count: 400,
            ..Default::default()
        };
        let count_events = vec![ProductionCountEvent {
            equipment_id: "EQ-001".to_string(),
            timestamp: dt(12, 0),
            total_count: 400,
            good_count: 400,
            reject_count: 0,
            actual_cycle_time_s: Some(55.0),
            ingested_at: dt(12, 1),
        }];
        let outcome = classifier.classify_window(&ClassifyInput {
            equipment: &equipment(),
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            segments: &[],
            totals: &totals,
            count_events: &count_events,
            quality_events: &[],
        });

        assert_eq!(
            outcome.breakdown.get(LossCategory::ReducedSpeed).duration_s,
            1200
        );
        assert_eq!(
            outcome
                .breakdown
                .get(LossCategory::IdlingMinorStops)
                .duration_s,
            1400
        );
    }

    #[test]
    fn test_quality_losses() {
        let classifier = LossClassifier::new();
        let totals = WindowTotals {
            calendar_s: 480 * 60,
            scheduled_s: 480 * 60,
            operating_s: 480 * 60,
            total_count: 100,
            good_count: 88,
            reject_count: 12,
            ..Default::default()
        };
        let quality_events = vec![
            QualityEvent {
                equipment_id: "EQ-001".to_string(),
                timestamp: dt(8, 30),
                event_type: QualityEventType::StartupLoss,
                defect_code: "WARMUP".to_string(),
                quantity: 5,
                ingested_at: dt(8, 31),
            },
            QualityEvent {
                equipment_id: "EQ-001".to_string(),
                timestamp: dt(11, 0),
                event_type: QualityEventType::Scrap,
                defect_code: "CRACK".to_string(),
                quantity: 4,
                ingested_at: dt(11, 1),
            },
        ];
        let outcome = classifier.classify_window(&ClassifyInput {
            equipment: &equipment(),
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            segments: &[],
            totals: &totals,
            count_events: &[],
            quality_events: &quality_events,
        });

        // 爬坡 5 件,报废 4 件,未被质量事件覆盖的 3 件兜底计入过程废品
        assert_eq!(outcome.breakdown.get(LossCategory::ReducedYield).count, 5);
        assert_eq!(outcome.breakdown.get(LossCategory::ProcessDefects).count, 7);
        // 时长按件数 x 理想节拍折算
        assert_eq!(
            outcome.breakdown.get(LossCategory::ReducedYield).duration_s,
            (5.0 * 52.0) as i64
        );
    }

    #[test]
    fn test_override_mapping() {
        let mut overrides = HashMap::new();
        overrides.insert("VENDOR_X_CODE_42".to_string(), LossCategory::EquipmentFailure);
        let classifier = LossClassifier::with_overrides(overrides);
        assert_eq!(
            classifier.classify_reason(&ReasonCode::parse("VENDOR_X_CODE_42")),
            LossCategory::EquipmentFailure
        );
    }
}
