// ==========================================
// 遥测接收器集成测试
// ==========================================
// 覆盖: 批次部分成功 / 计数不变量拒绝 / 重复提交幂等 / CSV 解析
// ==========================================

mod test_helpers;

use std::sync::Arc;

use oee_engine::domain::types::{EquipmentState, StateCategory};
use oee_engine::domain::RawEventBatch;
use oee_engine::engine::EventIngestor;

use test_helpers::{build_rig, count_event, create_test_db, dt, seed_equipment, state_event};

fn ingestor(rig: &test_helpers::TestRig) -> EventIngestor {
    EventIngestor::new(Arc::clone(&rig.event_repo), Arc::clone(&rig.equipment_repo))
}

#[test]
fn test_batch_partial_success() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 52.0);
    let ing = ingestor(&rig);

    let batch = RawEventBatch {
        state_events: vec![state_event(
            "EQ-001",
            dt(2, 8, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            "NONE",
            dt(2, 8, 1),
        )],
        count_events: vec![
            count_event("EQ-001", dt(2, 9, 0), 60, 58, 2, dt(2, 9, 1)),
            // 坏记录: good + reject > total
            count_event("EQ-001", dt(2, 10, 0), 60, 59, 2, dt(2, 10, 1)),
            // 坏记录: 未知设备
            count_event("EQ-404", dt(2, 10, 0), 10, 10, 0, dt(2, 10, 1)),
        ],
        quality_events: vec![],
    };

    let report = ing.ingest_batch(batch).expect("批次入库");

    // 好记录照常入库,坏记录逐条拒绝,绝不静默丢弃
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected.len(), 2);
    assert!(report.rejected.iter().any(|r| r.reason.contains("计数不一致")));
    assert!(report.rejected.iter().any(|r| r.reason.contains("未知设备")));

    // 被拒绝的记录未进入事件日志
    let stored = rig
        .event_repo
        .list_count_events("EQ-001", dt(2, 0, 0), dt(3, 0, 0))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].total_count, 60);
}

#[test]
fn test_resubmission_is_idempotent_noop() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 52.0);
    let ing = ingestor(&rig);

    let batch = RawEventBatch {
        state_events: vec![state_event(
            "EQ-001",
            dt(2, 8, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            "NONE",
            dt(2, 8, 1),
        )],
        count_events: vec![count_event("EQ-001", dt(2, 9, 0), 60, 58, 2, dt(2, 9, 1))],
        quality_events: vec![],
    };

    let first = ing.ingest_batch(batch.clone()).expect("首次入库");
    assert_eq!(first.accepted, 2);
    assert_eq!(first.duplicates, 0);

    // 重复提交: 幂等落空,不是错误
    let second = ing.ingest_batch(batch).expect("重复入库");
    assert_eq!(second.accepted, 0);
    assert_eq!(second.duplicates, 2);
    assert!(second.rejected.is_empty());

    let stored = rig
        .event_repo
        .list_state_events("EQ-001", dt(2, 0, 0), dt(3, 0, 0))
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_negative_counts_rejected() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 52.0);
    let ing = ingestor(&rig);

    let batch = RawEventBatch {
        state_events: vec![],
        count_events: vec![count_event("EQ-001", dt(2, 9, 0), 10, -1, 2, dt(2, 9, 1))],
        quality_events: vec![],
    };
    let report = ing.ingest_batch(batch).expect("批次入库");
    assert_eq!(report.accepted, 0);
    assert_eq!(report.rejected.len(), 1);
    // 拒绝记录携带原始记录回显
    assert!(report.rejected[0].record_json.is_object());
}

#[test]
fn test_csv_ingest_with_bad_rows() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 52.0);
    let ing = ingestor(&rig);

    let csv = "\
equipment_id,timestamp,total_count,good_count,reject_count,actual_cycle_time_s
EQ-001,2026-03-02 09:00:00,60,58,2,53.5
EQ-001,not-a-timestamp,60,58,2,
EQ-001,2026-03-02 10:00:00,abc,58,2,
";
    let report = ing
        .ingest_count_csv(csv.as_bytes(), dt(2, 10, 30))
        .expect("CSV 入库");

    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected.len(), 2);
    assert!(report
        .rejected
        .iter()
        .any(|r| r.reason.contains("timestamp")));
    assert!(report
        .rejected
        .iter()
        .any(|r| r.reason.contains("total_count")));

    let stored = rig
        .event_repo
        .list_count_events("EQ-001", dt(2, 0, 0), dt(3, 0, 0))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].actual_cycle_time_s, Some(53.5));
}
