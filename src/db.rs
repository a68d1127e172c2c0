// ==========================================
// OEE 计算引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout,减少并发写入时的偶发 busy 错误
// - 事件日志与结果存储的建表集中于此
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化数据库 schema
///
/// 说明:
/// - 事件日志三表只追加,唯一索引 (equipment_id, timestamp) 即去重键
///   (事件种类由表本身区分)
/// - oee_result 主键即 upsert 键; shift_instance_id 用空串哨兵值表示
///   "非班次窗口"(SQLite 主键列的 NULL 彼此不相等,不能入键)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS equipment (
            equipment_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            work_center_id TEXT NOT NULL,
            ideal_cycle_time_s REAL,
            nominal_speed_per_h REAL,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS shift_definition (
            shift_code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            planned_breaks_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS shift_instance (
            shift_instance_id TEXT PRIMARY KEY,
            shift_code TEXT NOT NULL REFERENCES shift_definition(shift_code),
            actual_start TEXT NOT NULL,
            actual_end TEXT NOT NULL,
            early_close INTEGER NOT NULL DEFAULT 0,
            break_windows_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS state_event (
            equipment_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            state TEXT NOT NULL,
            category TEXT NOT NULL,
            reason_code TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            ingested_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_state_event_eq_ts
            ON state_event(equipment_id, timestamp);

        CREATE TABLE IF NOT EXISTS count_event (
            equipment_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            total_count INTEGER NOT NULL,
            good_count INTEGER NOT NULL,
            reject_count INTEGER NOT NULL,
            actual_cycle_time_s REAL,
            ingested_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_count_event_eq_ts
            ON count_event(equipment_id, timestamp);

        CREATE TABLE IF NOT EXISTS quality_event (
            equipment_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            defect_code TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            ingested_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, timestamp)
        );
        CREATE INDEX IF NOT EXISTS idx_quality_event_eq_ts
            ON quality_event(equipment_id, timestamp);

        CREATE TABLE IF NOT EXISTS oee_result (
            equipment_id TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            shift_instance_id TEXT NOT NULL DEFAULT '',
            resolution TEXT NOT NULL,
            availability REAL,
            performance REAL,
            quality REAL,
            oee REAL,
            utilization REAL,
            teep REAL,
            missing_components_json TEXT NOT NULL DEFAULT '[]',
            loss_breakdown_json TEXT NOT NULL DEFAULT '{}',
            totals_json TEXT NOT NULL,
            preliminary INTEGER NOT NULL DEFAULT 0,
            anomaly_count INTEGER NOT NULL DEFAULT 0,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (equipment_id, window_start, window_end, shift_instance_id)
        );
        CREATE INDEX IF NOT EXISTS idx_oee_result_eq_res
            ON oee_result(equipment_id, resolution, window_start);

        CREATE TABLE IF NOT EXISTS anomaly_log (
            anomaly_id TEXT PRIMARY KEY,
            equipment_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            window_start TEXT,
            window_end TEXT,
            message TEXT NOT NULL,
            detail_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_anomaly_eq_kind
            ON anomaly_log(equipment_id, kind);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }
}
