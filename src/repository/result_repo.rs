// ==========================================
// OEE 计算引擎 - 计算结果仓储
// ==========================================
// upsert 键: (equipment_id, window_start, window_end, shift_instance_id)
// 并发规则: computed_at 后写获胜,无需分布式锁
// NULL 列语义: 指标为 NULL <=> NoData,绝不存 0 顶替
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::result::{LossBreakdown, MetricValue, OeeCalculationResult};
use crate::domain::segment::WindowTotals;
use crate::domain::types::{OeeComponent, Resolution};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{fmt_dt, parse_dt};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

/// 非班次窗口在主键列中的哨兵值
const NO_SHIFT_SENTINEL: &str = "";

// ==========================================
// OeeResultRepository - 计算结果仓储
// ==========================================
/// OEE 计算结果仓储
/// 职责: oee_result 表的 upsert 与查询
/// 红线: 不含业务逻辑,只负责数据访问
pub struct OeeResultRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OeeResultRepository {
    /// 创建新的 OeeResultRepository 实例
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

    /// upsert 计算结果
    ///
    /// # 说明
    /// - ON CONFLICT 按主键更新,但仅当新结果的 computed_at 不早于已存结果
    ///   (并发重算按计算时间戳定序,后写获胜)
    /// - 返回 true 表示本次写入生效,false 表示被更新的结果拦下
    pub fn upsert(&self, result: &OeeCalculationResult) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let shift_key = result
            .shift_instance_id
            .clone()
            .unwrap_or_else(|| NO_SHIFT_SENTINEL.to_string());

        let changed = conn.execute(
            r#"
            INSERT INTO oee_result (
                equipment_id, window_start, window_end, shift_instance_id,
                resolution, availability, performance, quality, oee,
                utilization, teep, missing_components_json, loss_breakdown_json,
                totals_json, preliminary, anomaly_count, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(equipment_id, window_start, window_end, shift_instance_id)
            DO UPDATE SET
                resolution = excluded.resolution,
                availability = excluded.availability,
                performance = excluded.performance,
                quality = excluded.quality,
                oee = excluded.oee,
                utilization = excluded.utilization,
                teep = excluded.teep,
                missing_components_json = excluded.missing_components_json,
                loss_breakdown_json = excluded.loss_breakdown_json,
                totals_json = excluded.totals_json,
                preliminary = excluded.preliminary,
                anomaly_count = excluded.anomaly_count,
                computed_at = excluded.computed_at
            WHERE excluded.computed_at >= oee_result.computed_at
            "#,
            params![
                result.equipment_id,
                fmt_dt(result.window_start),
                fmt_dt(result.window_end),
                shift_key,
                result.resolution.to_db_str(),
                result.availability.to_db(),
                result.performance.to_db(),
                result.quality.to_db(),
                result.oee.to_db(),
                result.utilization.to_db(),
                result.teep.to_db(),
                serde_json::to_string(&result.missing_components)?,
                serde_json::to_string(&result.loss_breakdown)?,
                serde_json::to_string(&result.totals)?,
                result.preliminary as i64,
                result.anomaly_count,
                fmt_dt(result.computed_at),
            ],
        )?;

        Ok(changed > 0)
    }

    /// 按键查询单个结果
    pub fn find_by_key(
        &self,
        equipment_id: &str,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        shift_instance_id: Option<&str>,
    ) -> RepositoryResult<Option<OeeCalculationResult>> {
        let conn = self.get_conn()?;
        let shift_key = shift_instance_id.unwrap_or(NO_SHIFT_SENTINEL);
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, window_start, window_end, shift_instance_id,
                   resolution, availability, performance, quality, oee,
                   utilization, teep, missing_components_json, loss_breakdown_json,
                   totals_json, preliminary, anomaly_count, computed_at
            FROM oee_result
            WHERE equipment_id = ?1 AND window_start = ?2
              AND window_end = ?3 AND shift_instance_id = ?4
            "#,
        )?;

        let mut rows = stmt.query_map(
            params![
                equipment_id,
                fmt_dt(window_start),
                fmt_dt(window_end),
                shift_key
            ],
            map_result_row,
        )?;

        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RepositoryError::from)??)),
            None => Ok(None),
        }
    }

    /// 查询设备在指定分辨率下与区间 [start, end) 相交的结果序列
    /// 按 window_start 升序(趋势查询)
    pub fn list_by_resolution(
        &self,
        equipment_id: &str,
        resolution: Resolution,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<OeeCalculationResult>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, window_start, window_end, shift_instance_id,
                   resolution, availability, performance, quality, oee,
                   utilization, teep, missing_components_json, loss_breakdown_json,
                   totals_json, preliminary, anomaly_count, computed_at
            FROM oee_result
            WHERE equipment_id = ?1 AND resolution = ?2
              AND window_start < ?4 AND window_end > ?3
            ORDER BY window_start ASC
            "#,
        )?;

        let rows = stmt.query_map(
            params![
                equipment_id,
                resolution.to_db_str(),
                fmt_dt(start),
                fmt_dt(end)
            ],
            map_result_row,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(RepositoryError::from)??);
        }
        Ok(out)
    }

    /// 查询标记为初步 (preliminary) 的结果(构成窗口齐备后待重算)
    pub fn list_preliminary(
        &self,
        equipment_id: &str,
    ) -> RepositoryResult<Vec<OeeCalculationResult>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, window_start, window_end, shift_instance_id,
                   resolution, availability, performance, quality, oee,
                   utilization, teep, missing_components_json, loss_breakdown_json,
                   totals_json, preliminary, anomaly_count, computed_at
            FROM oee_result
            WHERE equipment_id = ?1 AND preliminary = 1
            ORDER BY window_start ASC
            "#,
        )?;

        let rows = stmt.query_map(params![equipment_id], map_result_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(RepositoryError::from)??);
        }
        Ok(out)
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_result_row(
    row: &Row<'_>,
) -> rusqlite::Result<Result<OeeCalculationResult, RepositoryError>> {
    let equipment_id: String = row.get(0)?;
    let window_start: String = row.get(1)?;
    let window_end: String = row.get(2)?;
    let shift_instance_id: String = row.get(3)?;
    let resolution: String = row.get(4)?;
    let availability: Option<f64> = row.get(5)?;
    let performance: Option<f64> = row.get(6)?;
    let quality: Option<f64> = row.get(7)?;
    let oee: Option<f64> = row.get(8)?;
    let utilization: Option<f64> = row.get(9)?;
    let teep: Option<f64> = row.get(10)?;
    let missing_components_json: String = row.get(11)?;
    let loss_breakdown_json: String = row.get(12)?;
    let totals_json: String = row.get(13)?;
    let preliminary: i64 = row.get(14)?;
    let anomaly_count: i64 = row.get(15)?;
    let computed_at: String = row.get(16)?;

    Ok((|| {
        let missing_components: Vec<OeeComponent> =
            serde_json::from_str(&missing_components_json)?;
        let loss_breakdown: LossBreakdown = serde_json::from_str(&loss_breakdown_json)?;
        let totals: WindowTotals = serde_json::from_str(&totals_json)?;

        Ok(OeeCalculationResult {
            equipment_id,
            window_start: parse_dt(&window_start)?,
            window_end: parse_dt(&window_end)?,
            shift_instance_id: if shift_instance_id.is_empty() {
                None
            } else {
                Some(shift_instance_id)
            },
            resolution: Resolution::from_str(&resolution).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "resolution".to_string(),
                    message: format!("未知分辨率: {}", resolution),
                }
            })?,
            availability: MetricValue::from_db(availability),
            performance: MetricValue::from_db(performance),
            quality: MetricValue::from_db(quality),
            oee: MetricValue::from_db(oee),
            utilization: MetricValue::from_db(utilization),
            teep: MetricValue::from_db(teep),
            missing_components,
            loss_breakdown,
            totals,
            preliminary: preliminary != 0,
            anomaly_count,
            computed_at: parse_dt(&computed_at)?,
        })
    })())
}
