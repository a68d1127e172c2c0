// ==========================================
// OEE 计算引擎 - 状态时段切分器
// ==========================================
// 职责: 将单设备单窗口的状态事件流切分为连续、不重叠的时段,
//       并按类别汇总时长
// 补隙规则: 无新事件时上一状态持续,直到下一事件或窗口结束
// 冲突规则: 同刻/重叠提交按入库时间后写覆盖,记异常告警,不失败
// ==========================================

use chrono::NaiveDateTime;
use serde_json::json;

use crate::domain::anomaly::{AnomalyKind, AnomalyWarning};
use crate::domain::events::EquipmentStateEvent;
use crate::domain::segment::{StateSegment, WindowTotals};
use crate::domain::types::StateCategory;

// ==========================================
// SegmentationInput - 切分输入
// ==========================================
pub struct SegmentationInput<'a> {
    pub equipment_id: &'a str,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    /// 窗口起点之前最近的状态事件(补隙种子)
    pub prior_state: Option<&'a EquipmentStateEvent>,
    /// 窗口内状态事件
    pub events: &'a [EquipmentStateEvent],
    /// 计划休息区间(来自班次实例,已裁剪到窗口)
    pub break_windows: &'a [(NaiveDateTime, NaiveDateTime)],
}

// ==========================================
// SegmentationOutcome - 切分结果
// ==========================================
pub struct SegmentationOutcome {
    /// 状态时段(计划休息区间已被挖除)
    pub segments: Vec<StateSegment>,
    /// 类别时长汇总
    pub totals: WindowTotals,
    /// 非致命异常告警
    pub warnings: Vec<AnomalyWarning>,
}

// ==========================================
// StateSegmenter - 状态时段切分器
// ==========================================
/// 无状态引擎,Repository 操作由调用方处理
pub struct StateSegmenter;

impl Default for StateSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// 切分单设备单窗口
    ///
    /// # 说明
    /// - 无任何状态信息(无窗口内事件且无窗口前状态)时返回零时长汇总,
    ///   scheduled_s = 0,下游按分母为零规则得到 NO_DATA
    /// - 窗口前无状态但窗口内有事件时,窗口头部空隙回填首个事件的状态
    /// - 各类别时长 + 休息时长恰好覆盖窗口(整秒精确,无缝隙无重复)
    pub fn segment(&self, input: &SegmentationInput<'_>) -> SegmentationOutcome {
        let window_s = (input.window_end - input.window_start).num_seconds().max(0);

        let mut totals = WindowTotals {
            calendar_s: window_s,
            ..Default::default()
        };
        let mut warnings = Vec::new();

        // 1. 事件排序与同刻冲突消解
        let ordered = self.resolve_conflicts(input, &mut warnings);

        // 2. 无状态信息: 空窗口
        if ordered.is_empty() && input.prior_state.is_none() {
            return SegmentationOutcome {
                segments: Vec::new(),
                totals,
                warnings,
            };
        }
        totals.scheduled_s = window_s;

        // 3. 构造时段边界: 窗口头部状态 + 各事件转换点
        let mut segments = Vec::new();
        let mut cursor = input.window_start;
        // 种子状态: 窗口前最近事件,否则回填首个窗口内事件
        let mut current = input.prior_state.or(ordered.first().copied());

        for ev in ordered.iter().copied() {
            let at = ev.timestamp.clamp(input.window_start, input.window_end);
            if at > cursor {
                if let Some(state_ev) = current {
                    segments.push(StateSegment {
                        equipment_id: input.equipment_id.to_string(),
                        state: state_ev.state,
                        category: state_ev.category,
                        reason_code: state_ev.reason_code.clone(),
                        start: cursor,
                        end: at,
                    });
                }
                cursor = at;
            }
            // 上游闭合区间与后继事件重叠时,后写(按入库序)覆盖
            if let Some(prev) = current {
                if let Some(prev_end) = prev.end_time {
                    if prev_end > ev.timestamp && prev.timestamp < ev.timestamp {
                        warnings.push(AnomalyWarning::for_window(
                            input.equipment_id,
                            AnomalyKind::SegmentOverlapResolved,
                            input.window_start,
                            input.window_end,
                            format!(
                                "状态区间重叠: {} 的闭合时刻 {} 晚于后继事件 {},按后写覆盖",
                                prev.timestamp, prev_end, ev.timestamp
                            ),
                            json!({
                                "prev_timestamp": prev.timestamp.to_string(),
                                "prev_end_time": prev_end.to_string(),
                                "next_timestamp": ev.timestamp.to_string(),
                            }),
                        ));
                    }
                }
            }
            current = Some(ev);
        }

        // 尾段: 最后状态持续到窗口结束
        if cursor < input.window_end {
            if let Some(state_ev) = current {
                segments.push(StateSegment {
                    equipment_id: input.equipment_id.to_string(),
                    state: state_ev.state,
                    category: state_ev.category,
                    reason_code: state_ev.reason_code.clone(),
                    start: cursor,
                    end: input.window_end,
                });
            }
        }

        // 4. 挖除计划休息区间并汇总
        let segments = self.carve_breaks(segments, input.break_windows, &mut totals);
        for seg in &segments {
            let d = seg.duration_s();
            match seg.category {
                StateCategory::Production => totals.operating_s += d,
                StateCategory::Planned => totals.planned_downtime_s += d,
                StateCategory::AvailabilityLoss => totals.availability_loss_s += d,
            }
        }

        SegmentationOutcome {
            segments,
            totals,
            warnings,
        }
    }

    /// 事件排序与同刻冲突消解
    ///
    /// 同一时刻存在多条事件时按入库时间后写获胜,
    /// 被覆盖的提交记 SEGMENT_OVERLAP_RESOLVED 告警
    fn resolve_conflicts<'a>(
        &self,
        input: &SegmentationInput<'a>,
        warnings: &mut Vec<AnomalyWarning>,
    ) -> Vec<&'a EquipmentStateEvent> {
        let mut events: Vec<&EquipmentStateEvent> = input.events.iter().collect();
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.ingested_at.cmp(&b.ingested_at))
        });

        let mut resolved: Vec<&EquipmentStateEvent> = Vec::with_capacity(events.len());
        for ev in events {
            if let Some(last) = resolved.last() {
                if last.timestamp == ev.timestamp {
                    warnings.push(AnomalyWarning::for_window(
                        input.equipment_id,
                        AnomalyKind::SegmentOverlapResolved,
                        input.window_start,
                        input.window_end,
                        format!(
                            "同刻状态冲突: {} 存在多条提交,入库时间 {} 的提交覆盖 {}",
                            ev.timestamp, ev.ingested_at, last.ingested_at
                        ),
                        json!({
                            "timestamp": ev.timestamp.to_string(),
                            "discarded_state": last.state.to_db_str(),
                            "kept_state": ev.state.to_db_str(),
                        }),
                    ));
                    resolved.pop();
                }
            }
            resolved.push(ev);
        }
        resolved
    }

    /// 挖除计划休息区间
    ///
    /// 休息时间计入 planned_break_s,不归属任何状态类别
    /// (即使休息期间上游报了 PLANNED/DOWN,也按休息记账,避免重复计扣)
    fn carve_breaks(
        &self,
        segments: Vec<StateSegment>,
        breaks: &[(NaiveDateTime, NaiveDateTime)],
        totals: &mut WindowTotals,
    ) -> Vec<StateSegment> {
        if breaks.is_empty() {
            return segments;
        }

        let mut out = Vec::with_capacity(segments.len());
        for seg in segments {
            let mut pieces = vec![(seg.start, seg.end)];
            for (bs, be) in breaks {
                let mut next = Vec::with_capacity(pieces.len() + 1);
                for (ps, pe) in pieces {
                    let ov_start = ps.max(*bs);
                    let ov_end = pe.min(*be);
                    if ov_start < ov_end {
                        totals.planned_break_s += (ov_end - ov_start).num_seconds();
                        if ps < ov_start {
                            next.push((ps, ov_start));
                        }
                        if ov_end < pe {
                            next.push((ov_end, pe));
                        }
                    } else {
                        next.push((ps, pe));
                    }
                }
                pieces = next;
            }
            for (ps, pe) in pieces {
                out.push(StateSegment {
                    equipment_id: seg.equipment_id.clone(),
                    state: seg.state,
                    category: seg.category,
                    reason_code: seg.reason_code.clone(),
                    start: ps,
                    end: pe,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EquipmentState, ReasonCode};
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn state_ev(
        ts: NaiveDateTime,
        state: EquipmentState,
        category: StateCategory,
        reason: ReasonCode,
        ingested_min: u32,
    ) -> EquipmentStateEvent {
        EquipmentStateEvent {
            equipment_id: "EQ-001".to_string(),
            timestamp: ts,
            state,
            category,
            reason_code: reason,
            start_time: ts,
            end_time: None,
            ingested_at: dt(20, ingested_min),
        }
    }

    #[test]
    fn test_empty_window_has_zero_scheduled() {
        let segmenter = StateSegmenter::new();
        let outcome = segmenter.segment(&SegmentationInput {
            equipment_id: "EQ-001",
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            prior_state: None,
            events: &[],
            break_windows: &[],
        });
        // 无状态信息: scheduled_s = 0,下游得到 NO_DATA
        assert_eq!(outcome.totals.scheduled_s, 0);
        assert_eq!(outcome.totals.calendar_s, 8 * 3600);
        assert!(outcome.segments.is_empty());
    }

    #[test]
    fn test_last_known_state_persists() {
        let segmenter = StateSegmenter::new();
        let prior = state_ev(
            dt(7, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            ReasonCode::parse("NONE"),
            0,
        );
        let events = vec![
            state_ev(
                dt(10, 0),
                EquipmentState::Down,
                StateCategory::AvailabilityLoss,
                ReasonCode::Breakdown,
                1,
            ),
            state_ev(
                dt(11, 0),
                EquipmentState::Producing,
                StateCategory::Production,
                ReasonCode::parse("NONE"),
                2,
            ),
        ];
        let outcome = segmenter.segment(&SegmentationInput {
            equipment_id: "EQ-001",
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            prior_state: Some(&prior),
            events: &events,
            break_windows: &[],
        });

        // 8:00-10:00 生产(前状态持续), 10:00-11:00 故障, 11:00-16:00 生产(尾段持续)
        assert_eq!(outcome.segments.len(), 3);
        assert_eq!(outcome.totals.operating_s, 7 * 3600);
        assert_eq!(outcome.totals.availability_loss_s, 3600);
        assert!(outcome.totals.durations_cover_window());
    }

    #[test]
    fn test_breaks_are_carved_out() {
        let segmenter = StateSegmenter::new();
        let prior = state_ev(
            dt(7, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            ReasonCode::parse("NONE"),
            0,
        );
        let outcome = segmenter.segment(&SegmentationInput {
            equipment_id: "EQ-001",
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            prior_state: Some(&prior),
            events: &[],
            break_windows: &[(dt(12, 0), dt(12, 30))],
        });

        assert_eq!(outcome.totals.planned_break_s, 1800);
        assert_eq!(outcome.totals.operating_s, 8 * 3600 - 1800);
        assert!(outcome.totals.durations_cover_window());
        // 休息区间被挖除,时段被切成两片
        assert_eq!(outcome.segments.len(), 2);
    }

    #[test]
    fn test_same_timestamp_conflict_resolved_by_ingestion_order() {
        let segmenter = StateSegmenter::new();
        let prior = state_ev(
            dt(7, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            ReasonCode::parse("NONE"),
            0,
        );
        // 同一时刻两条冲突提交: 先报 IDLE,后报 DOWN(入库更晚)
        let events = vec![
            state_ev(
                dt(10, 0),
                EquipmentState::Idle,
                StateCategory::AvailabilityLoss,
                ReasonCode::MinorStop,
                1,
            ),
            state_ev(
                dt(10, 0),
                EquipmentState::Down,
                StateCategory::AvailabilityLoss,
                ReasonCode::Breakdown,
                2,
            ),
        ];
        let outcome = segmenter.segment(&SegmentationInput {
            equipment_id: "EQ-001",
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            prior_state: Some(&prior),
            events: &events,
            break_windows: &[],
        });

        // 后写获胜: 10:00 之后为 DOWN
        let last = outcome.segments.last().unwrap();
        assert_eq!(last.state, EquipmentState::Down);
        assert_eq!(last.reason_code, ReasonCode::Breakdown);
        // 冲突消解记异常告警,不失败
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(
            outcome.warnings[0].kind,
            AnomalyKind::SegmentOverlapResolved
        );
        assert!(outcome.totals.durations_cover_window());
    }

    #[test]
    fn test_backfill_leading_gap_from_first_event() {
        let segmenter = StateSegmenter::new();
        let events = vec![state_ev(
            dt(9, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            ReasonCode::parse("NONE"),
            1,
        )];
        let outcome = segmenter.segment(&SegmentationInput {
            equipment_id: "EQ-001",
            window_start: dt(8, 0),
            window_end: dt(16, 0),
            prior_state: None,
            events: &events,
            break_windows: &[],
        });

        // 窗口前无状态: 头部空隙回填首个事件的状态
        assert_eq!(outcome.totals.operating_s, 8 * 3600);
        assert!(outcome.totals.durations_cover_window());
    }
}
