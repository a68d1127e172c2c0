// ==========================================
// OEE 计算引擎 - 异常告警仓储
// ==========================================
// 用途: 钳制/未分类/时段冲突等告警的落盘,供标定审计查询
// 红线: 只追加; 告警写入失败不得中断计算主流程(调用方决定降级)
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::anomaly::{AnomalyKind, AnomalyWarning};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{fmt_dt, parse_dt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// AnomalyLogRepository - 异常告警仓储
// ==========================================
pub struct AnomalyLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AnomalyLogRepository {
    /// 创建新的 AnomalyLogRepository 实例
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

    /// 批量追加异常告警
    pub fn append_batch(
        &self,
        warnings: &[AnomalyWarning],
        created_at: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let created = fmt_dt(created_at);

        let mut count = 0;
        for w in warnings {
            tx.execute(
                r#"
                INSERT INTO anomaly_log (
                    anomaly_id, equipment_id, kind, window_start, window_end,
                    message, detail_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    Uuid::new_v4().to_string(),
                    w.equipment_id,
                    w.kind.to_db_str(),
                    w.window_start.map(fmt_dt),
                    w.window_end.map(fmt_dt),
                    w.message,
                    serde_json::to_string(&w.detail)?,
                    created,
                ],
            )?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 查询设备的异常告警,按创建时间降序
    pub fn list_by_equipment(
        &self,
        equipment_id: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<AnomalyWarning>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, kind, window_start, window_end, message, detail_json
            FROM anomaly_log
            WHERE equipment_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![equipment_id, limit as i64], |row| {
            let equipment_id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let window_start: Option<String> = row.get(2)?;
            let window_end: Option<String> = row.get(3)?;
            let message: String = row.get(4)?;
            let detail_json: String = row.get(5)?;
            Ok((equipment_id, kind, window_start, window_end, message, detail_json))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (equipment_id, kind, window_start, window_end, message, detail_json) = row?;
            out.push(AnomalyWarning {
                equipment_id,
                kind: AnomalyKind::from_str(&kind).ok_or_else(|| {
                    RepositoryError::FieldValueError {
                        field: "kind".to_string(),
                        message: format!("未知异常种类: {}", kind),
                    }
                })?,
                window_start: window_start.as_deref().map(parse_dt).transpose()?,
                window_end: window_end.as_deref().map(parse_dt).transpose()?,
                message,
                detail: serde_json::from_str(&detail_json)?,
            });
        }
        Ok(out)
    }
}
