// ==========================================
// OEE 计算引擎 - 设备主数据仓储
// ==========================================
// 来源: 外部设备台账系统同步写入,本引擎只读
// 红线: 不含业务逻辑,只负责数据访问
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::equipment::Equipment;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// EquipmentRepository - 设备主数据仓储
// ==========================================
pub struct EquipmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EquipmentRepository {
    /// 创建新的 EquipmentRepository 实例
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

    /// 按设备编号查询
    pub fn find_by_id(&self, equipment_id: &str) -> RepositoryResult<Option<Equipment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, name, work_center_id, ideal_cycle_time_s,
                   nominal_speed_per_h, active
            FROM equipment
            WHERE equipment_id = ?1
            "#,
        )?;

        let mut rows = stmt.query_map(params![equipment_id], map_equipment_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// 查询工作中心下的全部设备
    pub fn list_by_work_center(&self, work_center_id: &str) -> RepositoryResult<Vec<Equipment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, name, work_center_id, ideal_cycle_time_s,
                   nominal_speed_per_h, active
            FROM equipment
            WHERE work_center_id = ?1
            ORDER BY equipment_id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![work_center_id], map_equipment_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// 查询全部在用设备
    pub fn list_active(&self) -> RepositoryResult<Vec<Equipment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT equipment_id, name, work_center_id, ideal_cycle_time_s,
                   nominal_speed_per_h, active
            FROM equipment
            WHERE active = 1
            ORDER BY equipment_id ASC
            "#,
        )?;

        let rows = stmt.query_map([], map_equipment_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// 写入/更新设备主数据(台账同步入口,测试亦用)
    pub fn upsert(&self, equipment: &Equipment) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO equipment (
                equipment_id, name, work_center_id, ideal_cycle_time_s,
                nominal_speed_per_h, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                equipment.equipment_id,
                equipment.name,
                equipment.work_center_id,
                equipment.ideal_cycle_time_s,
                equipment.nominal_speed_per_h,
                equipment.active as i64,
            ],
        )?;
        Ok(())
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_equipment_row(row: &Row<'_>) -> rusqlite::Result<Equipment> {
    Ok(Equipment {
        equipment_id: row.get(0)?,
        name: row.get(1)?,
        work_center_id: row.get(2)?,
        ideal_cycle_time_s: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
        nominal_speed_per_h: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
    })
}
