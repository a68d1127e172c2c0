// ==========================================
// OEE 计算引擎 - 遥测事件接收器
// ==========================================
// 职责: 批次校验 + 去重入库
// 红线:
// - 坏记录逐条拒绝并回显,好记录照常入库,绝不静默丢弃
// - 重复提交(去重键已存在)幂等落空,不是错误
// - 批次部分成功是常态,不是异常
// ==========================================

use chrono::NaiveDateTime;
use serde_json::json;
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::events::{
    EquipmentStateEvent, ProductionCountEvent, QualityEvent, RawEventBatch, RejectedRecord,
};
use crate::domain::types::{EquipmentState, EventKind, QualityEventType, ReasonCode, StateCategory};
use crate::repository::error::RepositoryResult;
use crate::repository::{EquipmentRepository, EventLogRepository};

/// CSV 与批次内时间戳格式
const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

// ==========================================
// IngestReport - 批次入库报告
// ==========================================
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub batch_id: String,              // 批次ID
    pub accepted: usize,               // 实际入库条数
    pub duplicates: usize,             // 幂等落空条数(重复提交)
    pub rejected: Vec<RejectedRecord>, // 逐条拒绝明细
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.accepted + self.duplicates + self.rejected.len()
    }
}

// ==========================================
// EventIngestor - 遥测事件接收器
// ==========================================
pub struct EventIngestor {
    event_repo: Arc<EventLogRepository>,
    equipment_repo: Arc<EquipmentRepository>,
}

impl EventIngestor {
    pub fn new(
        event_repo: Arc<EventLogRepository>,
        equipment_repo: Arc<EquipmentRepository>,
    ) -> Self {
        Self {
            event_repo,
            equipment_repo,
        }
    }

    /// 批次入库
    ///
    /// # 说明
    /// - 校验失败的记录进入 rejected,携带原因与原始记录回显
    /// - 校验通过的记录 INSERT OR IGNORE,落空计入 duplicates
    pub fn ingest_batch(&self, batch: RawEventBatch) -> RepositoryResult<IngestReport> {
        let batch_id = Uuid::new_v4().to_string();
        let known = self.known_equipment(&batch)?;

        let mut rejected = Vec::new();
        let mut good_state = Vec::new();
        let mut good_count = Vec::new();
        let mut good_quality = Vec::new();

        for ev in batch.state_events {
            match self.validate_state_event(&ev, &known) {
                Ok(()) => good_state.push(ev),
                Err(reason) => rejected.push(reject_state(&ev, reason)),
            }
        }
        for ev in batch.count_events {
            match self.validate_count_event(&ev, &known) {
                Ok(()) => good_count.push(ev),
                Err(reason) => rejected.push(reject_count(&ev, reason)),
            }
        }
        for ev in batch.quality_events {
            match self.validate_quality_event(&ev, &known) {
                Ok(()) => good_quality.push(ev),
                Err(reason) => rejected.push(reject_quality(&ev, reason)),
            }
        }

        let s = self.event_repo.append_state_events(&good_state)?;
        let c = self.event_repo.append_count_events(&good_count)?;
        let q = self.event_repo.append_quality_events(&good_quality)?;

        let report = IngestReport {
            batch_id,
            accepted: s.inserted + c.inserted + q.inserted,
            duplicates: s.duplicates + c.duplicates + q.duplicates,
            rejected,
        };

        if !report.rejected.is_empty() {
            tracing::warn!(
                batch_id = %report.batch_id,
                rejected = report.rejected.len(),
                accepted = report.accepted,
                "批次部分拒绝"
            );
        } else {
            tracing::debug!(
                batch_id = %report.batch_id,
                accepted = report.accepted,
                duplicates = report.duplicates,
                "批次入库完成"
            );
        }
        Ok(report)
    }

    // ==========================================
    // CSV 批次解析
    // ==========================================
    // 列格式:
    //   状态: equipment_id,timestamp,state,category,reason_code[,end_time]
    //   计数: equipment_id,timestamp,total_count,good_count,reject_count[,actual_cycle_time_s]
    //   质量: equipment_id,timestamp,event_type,defect_code,quantity

    /// 解析状态事件 CSV 并入库
    pub fn ingest_state_csv(
        &self,
        reader: impl Read,
        ingested_at: NaiveDateTime,
    ) -> RepositoryResult<IngestReport> {
        let mut batch = RawEventBatch::default();
        let mut parse_rejects = Vec::new();
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        for (idx, record) in rdr.records().enumerate() {
            let row = match record {
                Ok(r) => r,
                Err(e) => {
                    parse_rejects.push(csv_reject(EventKind::State, idx, e.to_string()));
                    continue;
                }
            };
            match parse_state_row(&row, ingested_at) {
                Ok(ev) => batch.state_events.push(ev),
                Err(reason) => parse_rejects.push(csv_reject_row(EventKind::State, idx, &row, reason)),
            }
        }

        let mut report = self.ingest_batch(batch)?;
        report.rejected.extend(parse_rejects);
        Ok(report)
    }

    /// 解析产量计数 CSV 并入库
    pub fn ingest_count_csv(
        &self,
        reader: impl Read,
        ingested_at: NaiveDateTime,
    ) -> RepositoryResult<IngestReport> {
        let mut batch = RawEventBatch::default();
        let mut parse_rejects = Vec::new();
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        for (idx, record) in rdr.records().enumerate() {
            let row = match record {
                Ok(r) => r,
                Err(e) => {
                    parse_rejects.push(csv_reject(EventKind::Count, idx, e.to_string()));
                    continue;
                }
            };
            match parse_count_row(&row, ingested_at) {
                Ok(ev) => batch.count_events.push(ev),
                Err(reason) => parse_rejects.push(csv_reject_row(EventKind::Count, idx, &row, reason)),
            }
        }

        let mut report = self.ingest_batch(batch)?;
        report.rejected.extend(parse_rejects);
        Ok(report)
    }

    /// 解析质量事件 CSV 并入库
    pub fn ingest_quality_csv(
        &self,
        reader: impl Read,
        ingested_at: NaiveDateTime,
    ) -> RepositoryResult<IngestReport> {
        let mut batch = RawEventBatch::default();
        let mut parse_rejects = Vec::new();
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        for (idx, record) in rdr.records().enumerate() {
            let row = match record {
                Ok(r) => r,
                Err(e) => {
                    parse_rejects.push(csv_reject(EventKind::Quality, idx, e.to_string()));
                    continue;
                }
            };
            match parse_quality_row(&row, ingested_at) {
                Ok(ev) => batch.quality_events.push(ev),
                Err(reason) => {
                    parse_rejects.push(csv_reject_row(EventKind::Quality, idx, &row, reason))
                }
            }
        }

        let mut report = self.ingest_batch(batch)?;
        report.rejected.extend(parse_rejects);
        Ok(report)
    }

    // ==========================================
    // 校验
    // ==========================================

    /// 批次涉及设备的存在性预取
    fn known_equipment(&self, batch: &RawEventBatch) -> RepositoryResult<HashSet<String>> {
        let mut ids: HashSet<String> = HashSet::new();
        for id in batch
            .state_events
            .iter()
            .map(|e| &e.equipment_id)
            .chain(batch.count_events.iter().map(|e| &e.equipment_id))
            .chain(batch.quality_events.iter().map(|e| &e.equipment_id))
        {
            ids.insert(id.clone());
        }

        let mut known = HashSet::new();
        for id in ids {
            if self.equipment_repo.find_by_id(&id)?.is_some() {
                known.insert(id);
            }
        }
        Ok(known)
    }

    fn validate_state_event(
        &self,
        ev: &EquipmentStateEvent,
        known: &HashSet<String>,
    ) -> Result<(), String> {
        if ev.equipment_id.trim().is_empty() {
            return Err("设备编号为空".to_string());
        }
        if !known.contains(&ev.equipment_id) {
            return Err(format!("未知设备: {}", ev.equipment_id));
        }
        if let Some(end) = ev.end_time {
            if end < ev.start_time {
                return Err(format!(
                    "区间终点早于起点: end={} start={}",
                    end, ev.start_time
                ));
            }
        }
        Ok(())
    }

    fn validate_count_event(
        &self,
        ev: &ProductionCountEvent,
        known: &HashSet<String>,
    ) -> Result<(), String> {
        if ev.equipment_id.trim().is_empty() {
            return Err("设备编号为空".to_string());
        }
        if !known.contains(&ev.equipment_id) {
            return Err(format!("未知设备: {}", ev.equipment_id));
        }
        if !ev.counts_consistent() {
            return Err(format!(
                "计数不一致: total={} good={} reject={} (要求非负且 good+reject <= total)",
                ev.total_count, ev.good_count, ev.reject_count
            ));
        }
        if let Some(cycle) = ev.actual_cycle_time_s {
            if cycle < 0.0 {
                return Err(format!("实际节拍为负数: {}", cycle));
            }
        }
        Ok(())
    }

    fn validate_quality_event(
        &self,
        ev: &QualityEvent,
        known: &HashSet<String>,
    ) -> Result<(), String> {
        if ev.equipment_id.trim().is_empty() {
            return Err("设备编号为空".to_string());
        }
        if !known.contains(&ev.equipment_id) {
            return Err(format!("未知设备: {}", ev.equipment_id));
        }
        if ev.quantity < 0 {
            return Err(format!("数量为负数: {}", ev.quantity));
        }
        Ok(())
    }
}

// ==========================================
// 拒绝记录构造
// ==========================================

fn reject_state(ev: &EquipmentStateEvent, reason: String) -> RejectedRecord {
    RejectedRecord {
        event_kind: EventKind::State,
        equipment_id: ev.equipment_id.clone(),
        timestamp: Some(ev.timestamp),
        reason,
        record_json: serde_json::to_value(ev).unwrap_or_default(),
    }
}

fn reject_count(ev: &ProductionCountEvent, reason: String) -> RejectedRecord {
    RejectedRecord {
        event_kind: EventKind::Count,
        equipment_id: ev.equipment_id.clone(),
        timestamp: Some(ev.timestamp),
        reason,
        record_json: serde_json::to_value(ev).unwrap_or_default(),
    }
}

fn reject_quality(ev: &QualityEvent, reason: String) -> RejectedRecord {
    RejectedRecord {
        event_kind: EventKind::Quality,
        equipment_id: ev.equipment_id.clone(),
        timestamp: Some(ev.timestamp),
        reason,
        record_json: serde_json::to_value(ev).unwrap_or_default(),
    }
}

fn csv_reject(kind: EventKind, row_index: usize, reason: String) -> RejectedRecord {
    RejectedRecord {
        event_kind: kind,
        equipment_id: String::new(),
        timestamp: None,
        reason,
        record_json: json!({ "row_index": row_index }),
    }
}

fn csv_reject_row(
    kind: EventKind,
    row_index: usize,
    row: &csv::StringRecord,
    reason: String,
) -> RejectedRecord {
    let fields: Vec<&str> = row.iter().collect();
    RejectedRecord {
        event_kind: kind,
        equipment_id: fields.first().unwrap_or(&"").to_string(),
        timestamp: None,
        reason,
        record_json: json!({ "row_index": row_index, "fields": fields }),
    }
}

// ==========================================
// CSV 行解析
// ==========================================

fn field<'a>(row: &'a csv::StringRecord, idx: usize, name: &str) -> Result<&'a str, String> {
    row.get(idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("缺少字段: {}", name))
}

fn parse_ts(s: &str, name: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, TS_FMT)
        .map_err(|e| format!("字段 {} 无法解析为时间 '{}': {}", name, s, e))
}

fn parse_state_row(
    row: &csv::StringRecord,
    ingested_at: NaiveDateTime,
) -> Result<EquipmentStateEvent, String> {
    let equipment_id = field(row, 0, "equipment_id")?.to_string();
    let timestamp = parse_ts(field(row, 1, "timestamp")?, "timestamp")?;
    let state_s = field(row, 2, "state")?;
    let category_s = field(row, 3, "category")?;
    let reason_s = field(row, 4, "reason_code")?;
    let end_time = match row.get(5).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(parse_ts(s, "end_time")?),
        None => None,
    };

    Ok(EquipmentStateEvent {
        equipment_id,
        timestamp,
        state: EquipmentState::from_str(state_s).ok_or_else(|| format!("未知状态: {}", state_s))?,
        category: StateCategory::from_str(category_s)
            .ok_or_else(|| format!("未知时段类别: {}", category_s))?,
        reason_code: ReasonCode::parse(reason_s),
        start_time: timestamp,
        end_time,
        ingested_at,
    })
}

fn parse_count_row(
    row: &csv::StringRecord,
    ingested_at: NaiveDateTime,
) -> Result<ProductionCountEvent, String> {
    let equipment_id = field(row, 0, "equipment_id")?.to_string();
    let timestamp = parse_ts(field(row, 1, "timestamp")?, "timestamp")?;
    let total_count: i64 = field(row, 2, "total_count")?
        .parse()
        .map_err(|e| format!("total_count 解析失败: {}", e))?;
    let good_count: i64 = field(row, 3, "good_count")?
        .parse()
        .map_err(|e| format!("good_count 解析失败: {}", e))?;
    let reject_count: i64 = field(row, 4, "reject_count")?
        .parse()
        .map_err(|e| format!("reject_count 解析失败: {}", e))?;
    let actual_cycle_time_s = match row.get(5).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<f64>()
                .map_err(|e| format!("actual_cycle_time_s 解析失败: {}", e))?,
        ),
        None => None,
    };

    Ok(ProductionCountEvent {
        equipment_id,
        timestamp,
        total_count,
        good_count,
        reject_count,
        actual_cycle_time_s,
        ingested_at,
    })
}

fn parse_quality_row(
    row: &csv::StringRecord,
    ingested_at: NaiveDateTime,
) -> Result<QualityEvent, String> {
    let equipment_id = field(row, 0, "equipment_id")?.to_string();
    let timestamp = parse_ts(field(row, 1, "timestamp")?, "timestamp")?;
    let type_s = field(row, 2, "event_type")?;
    let defect_code = field(row, 3, "defect_code")?.to_string();
    let quantity: i64 = field(row, 4, "quantity")?
        .parse()
        .map_err(|e| format!("quantity 解析失败: {}", e))?;

    Ok(QualityEvent {
        equipment_id,
        timestamp,
        event_type: QualityEventType::from_str(type_s)
            .ok_or_else(|| format!("未知质量事件类型: {}", type_s))?,
        defect_code,
        quantity,
        ingested_at,
    })
}
