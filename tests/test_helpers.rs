// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、参考数据种子、引擎装配
// ==========================================

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::NamedTempFile;

use oee_engine::config::EngineConfig;
use oee_engine::db;
use oee_engine::domain::shift::ShiftInstance;
use oee_engine::domain::types::{EquipmentState, ReasonCode, StateCategory};
use oee_engine::domain::{Equipment, EquipmentStateEvent, ProductionCountEvent};
use oee_engine::engine::AggregationScheduler;
use oee_engine::repository::{
    AnomalyLogRepository, EquipmentRepository, EventLogRepository, OeeResultRepository,
    ShiftRepository,
};

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件(需要保持存活)
/// - String: 数据库文件路径
pub fn create_test_db() -> (NamedTempFile, String) {
    let temp_file = NamedTempFile::new().expect("创建临时文件失败");
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = db::open_sqlite_connection(&db_path).expect("打开数据库失败");
    db::init_schema(&conn).expect("初始化 schema 失败");

    (temp_file, db_path)
}

/// 测试引擎装配: 全套仓储 + 调度器
pub struct TestRig {
    pub event_repo: Arc<EventLogRepository>,
    pub equipment_repo: Arc<EquipmentRepository>,
    pub shift_repo: Arc<ShiftRepository>,
    pub result_repo: Arc<OeeResultRepository>,
    pub anomaly_repo: Arc<AnomalyLogRepository>,
    pub scheduler: Arc<AggregationScheduler>,
}

pub fn build_rig(db_path: &str) -> TestRig {
    build_rig_with_config(db_path, EngineConfig::default())
}

pub fn build_rig_with_config(db_path: &str, config: EngineConfig) -> TestRig {
    let event_repo = Arc::new(EventLogRepository::new(db_path).expect("事件仓储"));
    let equipment_repo = Arc::new(EquipmentRepository::new(db_path).expect("设备仓储"));
    let shift_repo = Arc::new(ShiftRepository::new(db_path).expect("班次仓储"));
    let result_repo = Arc::new(OeeResultRepository::new(db_path).expect("结果仓储"));
    let anomaly_repo = Arc::new(AnomalyLogRepository::new(db_path).expect("告警仓储"));
    let scheduler = Arc::new(AggregationScheduler::new(
        Arc::clone(&event_repo),
        Arc::clone(&equipment_repo),
        Arc::clone(&shift_repo),
        Arc::clone(&result_repo),
        Arc::clone(&anomaly_repo),
        config,
    ));
    TestRig {
        event_repo,
        equipment_repo,
        shift_repo,
        result_repo,
        anomaly_repo,
        scheduler,
    }
}

// ==========================================
// 时间与种子数据
// ==========================================

pub fn dt(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// 种子设备: 理想节拍 52 秒/件
pub fn seed_equipment(rig: &TestRig, equipment_id: &str, cycle_s: f64) {
    rig.equipment_repo
        .upsert(&Equipment {
            equipment_id: equipment_id.to_string(),
            name: format!("测试设备 {}", equipment_id),
            work_center_id: "WC-A".to_string(),
            ideal_cycle_time_s: cycle_s,
            nominal_speed_per_h: None,
            active: true,
        })
        .expect("设备种子写入失败");
}

/// 种子班次实例
pub fn seed_shift(
    rig: &TestRig,
    shift_instance_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    breaks: Vec<(NaiveDateTime, NaiveDateTime)>,
) {
    rig.shift_repo
        .upsert_definition(&oee_engine::domain::ShiftDefinition {
            shift_code: "A".to_string(),
            name: "早班".to_string(),
            start_time: chrono::NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: chrono::NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            planned_breaks: Vec::new(),
        })
        .expect("班次定义写入失败");
    rig.shift_repo
        .upsert_instance(&ShiftInstance {
            shift_instance_id: shift_instance_id.to_string(),
            shift_code: "A".to_string(),
            actual_start: start,
            actual_end: end,
            early_close: false,
            break_windows: breaks,
        })
        .expect("班次实例写入失败");
}

pub fn state_event(
    equipment_id: &str,
    ts: NaiveDateTime,
    state: EquipmentState,
    category: StateCategory,
    reason: &str,
    ingested_at: NaiveDateTime,
) -> EquipmentStateEvent {
    EquipmentStateEvent {
        equipment_id: equipment_id.to_string(),
        timestamp: ts,
        state,
        category,
        reason_code: ReasonCode::parse(reason),
        start_time: ts,
        end_time: None,
        ingested_at,
    }
}

pub fn count_event(
    equipment_id: &str,
    ts: NaiveDateTime,
    total: i64,
    good: i64,
    reject: i64,
    ingested_at: NaiveDateTime,
) -> ProductionCountEvent {
    ProductionCountEvent {
        equipment_id: equipment_id.to_string(),
        timestamp: ts,
        total_count: total,
        good_count: good,
        reject_count: reject,
        actual_cycle_time_s: None,
        ingested_at,
    }
}
