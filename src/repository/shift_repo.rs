// ==========================================
// OEE 计算引擎 - 班次参考数据仓储
// ==========================================
// 来源: 外部排班系统同步写入,本引擎只读
// 红线: 不含业务逻辑,只负责数据访问
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::shift::{PlannedBreak, ShiftDefinition, ShiftInstance};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{fmt_dt, parse_dt};
use chrono::{NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

/// 班内时刻存储格式
const DB_TIME_FMT: &str = "%H:%M:%S";

// ==========================================
// ShiftRepository - 班次仓储
// ==========================================
pub struct ShiftRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ShiftRepository {
    /// 创建新的 ShiftRepository 实例
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

    /// 按代码查询班次定义
    pub fn find_definition(&self, shift_code: &str) -> RepositoryResult<Option<ShiftDefinition>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT shift_code, name, start_time, end_time, planned_breaks_json
            FROM shift_definition
            WHERE shift_code = ?1
            "#,
        )?;

        let mut rows = stmt.query_map(params![shift_code], map_definition_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RepositoryError::from)??)),
            None => Ok(None),
        }
    }

    /// 按实例ID查询班次实例
    pub fn find_instance(
        &self,
        shift_instance_id: &str,
    ) -> RepositoryResult<Option<ShiftInstance>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT shift_instance_id, shift_code, actual_start, actual_end,
                   early_close, break_windows_json
            FROM shift_instance
            WHERE shift_instance_id = ?1
            "#,
        )?;

        let mut rows = stmt.query_map(params![shift_instance_id], map_instance_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RepositoryError::from)??)),
            None => Ok(None),
        }
    }

    /// 查询与区间 [start, end) 相交的班次实例,按实际开始时间升序
    pub fn list_instances_overlapping(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<ShiftInstance>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT shift_instance_id, shift_code, actual_start, actual_end,
                   early_close, break_windows_json
            FROM shift_instance
            WHERE actual_start < ?2 AND actual_end > ?1
            ORDER BY actual_start ASC
            "#,
        )?;

        let rows = stmt.query_map(params![fmt_dt(start), fmt_dt(end)], map_instance_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(RepositoryError::from)??);
        }
        Ok(out)
    }

    /// 写入班次定义(排班同步入口,测试亦用)
    pub fn upsert_definition(&self, def: &ShiftDefinition) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO shift_definition (
                shift_code, name, start_time, end_time, planned_breaks_json
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                def.shift_code,
                def.name,
                def.start_time.format(DB_TIME_FMT).to_string(),
                def.end_time.format(DB_TIME_FMT).to_string(),
                serde_json::to_string(&def.planned_breaks)?,
            ],
        )?;
        Ok(())
    }

    /// 写入班次实例(排班同步入口,测试亦用)
    pub fn upsert_instance(&self, instance: &ShiftInstance) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let breaks: Vec<(String, String)> = instance
            .break_windows
            .iter()
            .map(|(s, e)| (fmt_dt(*s), fmt_dt(*e)))
            .collect();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO shift_instance (
                shift_instance_id, shift_code, actual_start, actual_end,
                early_close, break_windows_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                instance.shift_instance_id,
                instance.shift_code,
                fmt_dt(instance.actual_start),
                fmt_dt(instance.actual_end),
                instance.early_close as i64,
                serde_json::to_string(&breaks)?,
            ],
        )?;
        Ok(())
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_definition_row(
    row: &Row<'_>,
) -> rusqlite::Result<Result<ShiftDefinition, RepositoryError>> {
    let shift_code: String = row.get(0)?;
    let name: String = row.get(1)?;
    let start_time: String = row.get(2)?;
    let end_time: String = row.get(3)?;
    let breaks_json: String = row.get(4)?;

    Ok((|| {
        let planned_breaks: Vec<PlannedBreak> = serde_json::from_str(&breaks_json)?;
        Ok(ShiftDefinition {
            shift_code,
            name,
            start_time: parse_time(&start_time)?,
            end_time: parse_time(&end_time)?,
            planned_breaks,
        })
    })())
}

fn map_instance_row(row: &Row<'_>) -> rusqlite::Result<Result<ShiftInstance, RepositoryError>> {
    let shift_instance_id: String = row.get(0)?;
    let shift_code: String = row.get(1)?;
    let actual_start: String = row.get(2)?;
    let actual_end: String = row.get(3)?;
    let early_close: i64 = row.get(4)?;
    let breaks_json: String = row.get(5)?;

    Ok((|| {
        let raw_breaks: Vec<(String, String)> = serde_json::from_str(&breaks_json)?;
        let mut break_windows = Vec::with_capacity(raw_breaks.len());
        for (s, e) in &raw_breaks {
            break_windows.push((parse_dt(s)?, parse_dt(e)?));
        }
        Ok(ShiftInstance {
            shift_instance_id,
            shift_code,
            actual_start: parse_dt(&actual_start)?,
            actual_end: parse_dt(&actual_end)?,
            early_close: early_close != 0,
            break_windows,
        })
    })())
}

fn parse_time(s: &str) -> RepositoryResult<NaiveTime> {
    NaiveTime::parse_from_str(s, DB_TIME_FMT).map_err(|e| RepositoryError::FieldValueError {
        field: "time".to_string(),
        message: format!("无法解析时刻 '{}': {}", s, e),
    })
}
