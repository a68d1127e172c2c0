// ==========================================
// OEE 计算引擎 - 事件日志仓储
// ==========================================
// 红线: 只追加,入库后永不修改
// 去重键: (equipment_id, timestamp, 事件种类=表)
// 重复提交 INSERT OR IGNORE 落空,幂等无错
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::events::{EquipmentStateEvent, ProductionCountEvent, QualityEvent};
use crate::domain::types::{EquipmentState, QualityEventType, ReasonCode, StateCategory};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{fmt_dt, parse_dt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// AppendOutcome - 批量追加结果
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub inserted: usize,   // 实际入库条数
    pub duplicates: usize, // 去重键已存在而落空的条数
}

// ==========================================
// EventLogRepository - 事件日志仓储
// ==========================================
/// 事件日志仓储
/// 职责: state_event / count_event / quality_event 三表的追加与窗口查询
/// 红线: 不含业务逻辑,只负责数据访问
pub struct EventLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EventLogRepository {
    /// 创建新的 EventLogRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 追加 (幂等)
    // ==========================================

    /// 批量追加状态事件
    ///
    /// # 说明
    /// - INSERT OR IGNORE: 去重键已存在时落空,计入 duplicates
    /// - 使用事务确保批次原子入库
    pub fn append_state_events(
        &self,
        events: &[EquipmentStateEvent],
    ) -> RepositoryResult<AppendOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut outcome = AppendOutcome::default();
        for ev in events {
            let changed = tx.execute(
                r#"
                INSERT OR IGNORE INTO state_event (
                    equipment_id, timestamp, state, category, reason_code,
                    start_time, end_time, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    ev.equipment_id,
                    fmt_dt(ev.timestamp),
                    ev.state.to_db_str(),
                    ev.category.to_db_str(),
                    ev.reason_code.to_db_str(),
                    fmt_dt(ev.start_time),
                    ev.end_time.map(fmt_dt),
                    fmt_dt(ev.ingested_at),
                ],
            )?;
            if changed == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// 批量追加产量计数事件
    pub fn append_count_events(
        &self,
        events: &[ProductionCountEvent],
    ) -> RepositoryResult<AppendOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut outcome = AppendOutcome::default();
        for ev in events {
            let changed = tx.execute(
                r#"
                INSERT OR IGNORE INTO count_event (
                    equipment_id, timestamp, total_count, good_count, reject_count,
                    actual_cycle_time_s, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    ev.equipment_id,
                    fmt_dt(ev.timestamp),
                    ev.total_count,
                    ev.good_count,
                    ev.reject_count,
                    ev.actual_cycle_time_s,
                    fmt_dt(ev.ingested_at),
                ],
            )?;
            if changed == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// 批量追加质量事件
    pub fn append_quality_events(
        &self,
        events: &[QualityEvent],
    ) -> RepositoryResult<AppendOutcome> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut outcome = AppendOutcome::default();
        for ev in events {
            let changed = tx.execute(
                r#"
                INSERT OR IGNORE INTO quality_event (
                    equipment_id, timestamp, event_type, defect_code, quantity, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    ev.equipment_id,
                    fmt_dt(ev.timestamp),
                    ev.event_type.to_db_str(),
                    ev.defect_code,
                    ev.quantity,
                    fmt_dt(ev.ingested_at),
                ],
            )?;
            if changed == 0 {
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    // ==========================================
    // 窗口查询
    // ==========================================

    /// 查询窗口内状态事件 [start, end), 按 (timestamp, ingested_at) 升序
    pub fn list_state_events(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<EquipmentStateEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, timestamp, state, category, reason_code,
                   start_time, end_time, ingested_at
            FROM state_event
            WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            ORDER BY timestamp ASC, ingested_at ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![equipment_id, fmt_dt(start), fmt_dt(end)],
            map_state_event_row,
        )?;

        collect_rows(rows)
    }

    /// 查询窗口起点之前最近的一条状态事件(补隙种子: 上一状态持续)
    pub fn last_state_before(
        &self,
        equipment_id: &str,
        at: NaiveDateTime,
    ) -> RepositoryResult<Option<EquipmentStateEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, timestamp, state, category, reason_code,
                   start_time, end_time, ingested_at
            FROM state_event
            WHERE equipment_id = ?1 AND timestamp < ?2
            ORDER BY timestamp DESC, ingested_at DESC
            LIMIT 1
            "#,
        )?;

        let mut rows = stmt.query_map(params![equipment_id, fmt_dt(at)], map_state_event_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RepositoryError::from)??)),
            None => Ok(None),
        }
    }

    /// 查询窗口内产量计数事件 [start, end)
    pub fn list_count_events(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<ProductionCountEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, timestamp, total_count, good_count, reject_count,
                   actual_cycle_time_s, ingested_at
            FROM count_event
            WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            ORDER BY timestamp ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![equipment_id, fmt_dt(start), fmt_dt(end)],
            map_count_event_row,
        )?;

        collect_rows(rows)
    }

    /// 查询窗口内质量事件 [start, end)
    pub fn list_quality_events(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<QualityEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, timestamp, event_type, defect_code, quantity, ingested_at
            FROM quality_event
            WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            ORDER BY timestamp ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![equipment_id, fmt_dt(start), fmt_dt(end)],
            map_quality_event_row,
        )?;

        collect_rows(rows)
    }

    /// 窗口内三类事件的最大入库时间(结果新鲜度判定)
    ///
    /// # 返回
    /// - Ok(Some): 窗口内存在事件,返回最晚入库时间
    /// - Ok(None): 窗口内无任何事件
    pub fn max_ingested_at(
        &self,
        equipment_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Option<NaiveDateTime>> {
        let conn = self.get_conn()?;
        let v: Option<String> = conn.query_row(
            r#"
            SELECT MAX(ingested_at) FROM (
                SELECT ingested_at FROM state_event
                    WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                UNION ALL
                SELECT ingested_at FROM count_event
                    WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
                UNION ALL
                SELECT ingested_at FROM quality_event
                    WHERE equipment_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
            )
            "#,
            params![equipment_id, fmt_dt(start), fmt_dt(end)],
            |row| row.get(0),
        )?;

        match v {
            Some(s) => Ok(Some(parse_dt(&s)?)),
            None => Ok(None),
        }
    }

    /// 指定入库时间之后有新事件的设备清单(增量重算的触发范围)
    pub fn equipment_with_events_since(
        &self,
        ingested_after: NaiveDateTime,
    ) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT DISTINCT equipment_id FROM (
                SELECT equipment_id FROM state_event WHERE ingested_at > ?1
                UNION ALL
                SELECT equipment_id FROM count_event WHERE ingested_at > ?1
                UNION ALL
                SELECT equipment_id FROM quality_event WHERE ingested_at > ?1
            )
            ORDER BY equipment_id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![fmt_dt(ingested_after)], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

// ==========================================
// 行映射
// ==========================================
// query_map 的行闭包只能返回 rusqlite 错误,
// 枚举解析失败延后到外层转为 FieldValueError

type MappedRow<T> = Result<T, RepositoryError>;

fn map_state_event_row(row: &Row<'_>) -> rusqlite::Result<MappedRow<EquipmentStateEvent>> {
    let equipment_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let state: String = row.get(2)?;
    let category: String = row.get(3)?;
    let reason_code: String = row.get(4)?;
    let start_time: String = row.get(5)?;
    let end_time: Option<String> = row.get(6)?;
    let ingested_at: String = row.get(7)?;

    Ok((|| {
        Ok(EquipmentStateEvent {
            equipment_id,
            timestamp: parse_dt(&timestamp)?,
            state: EquipmentState::from_str(&state).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "state".to_string(),
                    message: format!("未知状态: {}", state),
                }
            })?,
            category: StateCategory::from_str(&category).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "category".to_string(),
                    message: format!("未知时段类别: {}", category),
                }
            })?,
            reason_code: ReasonCode::parse(&reason_code),
            start_time: parse_dt(&start_time)?,
            end_time: end_time.as_deref().map(parse_dt).transpose()?,
            ingested_at: parse_dt(&ingested_at)?,
        })
    })())
}

fn map_count_event_row(row: &Row<'_>) -> rusqlite::Result<MappedRow<ProductionCountEvent>> {
    let equipment_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let total_count: i64 = row.get(2)?;
    let good_count: i64 = row.get(3)?;
    let reject_count: i64 = row.get(4)?;
    let actual_cycle_time_s: Option<f64> = row.get(5)?;
    let ingested_at: String = row.get(6)?;

    Ok((|| {
        Ok(ProductionCountEvent {
            equipment_id,
            timestamp: parse_dt(&timestamp)?,
            total_count,
            good_count,
            reject_count,
            actual_cycle_time_s,
            ingested_at: parse_dt(&ingested_at)?,
        })
    })())
}

fn map_quality_event_row(row: &Row<'_>) -> rusqlite::Result<MappedRow<QualityEvent>> {
    let equipment_id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let event_type: String = row.get(2)?;
    let defect_code: String = row.get(3)?;
    let quantity: i64 = row.get(4)?;
    let ingested_at: String = row.get(5)?;

    Ok((|| {
        Ok(QualityEvent {
            equipment_id,
            timestamp: parse_dt(&timestamp)?,
            event_type: QualityEventType::from_str(&event_type).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "event_type".to_string(),
                    message: format!("未知质量事件类型: {}", event_type),
                }
            })?,
            defect_code,
            quantity,
            ingested_at: parse_dt(&ingested_at)?,
        })
    })())
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<MappedRow<T>>>,
) -> RepositoryResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(RepositoryError::from)??);
    }
    Ok(out)
}
