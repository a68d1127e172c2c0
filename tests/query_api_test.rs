// ==========================================
// 查询 API 集成测试
// ==========================================
// 覆盖: 点查新鲜度 / 未知设备 / 趋势有序性 /
//       损失帕累托排名与配置错误收集
// ==========================================

mod test_helpers;

use std::sync::Arc;

use oee_engine::api::{ApiError, OeeQueryApi, OeeQueryService, ParetoScope};
use oee_engine::domain::types::{EquipmentState, LossCategory, Resolution, StateCategory};
use oee_engine::domain::MetricValue;

use test_helpers::{
    build_rig, count_event, create_test_db, dt, seed_equipment, seed_shift, state_event,
};

fn query_api(rig: &test_helpers::TestRig) -> OeeQueryApi {
    OeeQueryApi::new(
        Arc::clone(&rig.scheduler),
        Arc::clone(&rig.equipment_repo),
        Arc::clone(&rig.shift_repo),
    )
}

#[tokio::test]
async fn test_get_oee_unknown_equipment_is_not_found() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    let api = query_api(&rig);

    let err = api
        .get_oee("EQ-404", dt(2, 8, 0), dt(2, 16, 0), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_get_oee_empty_window_returns_no_data_result() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 52.0);
    let api = query_api(&rig);

    let resp = api
        .get_oee("EQ-001", dt(2, 8, 0), dt(2, 16, 0), None)
        .await
        .unwrap();

    // 空窗口: NO_DATA 结果,不是裸零,也不是错误
    assert!(!resp.stale);
    assert_eq!(resp.result.availability, MetricValue::NoData);
    assert_eq!(resp.result.oee, MetricValue::NoData);
}

#[tokio::test]
async fn test_get_oee_recomputes_when_new_events_land() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 60.0);
    seed_shift(&rig, "S-A", dt(2, 8, 0), dt(2, 16, 0), vec![]);
    rig.event_repo
        .append_state_events(&[state_event(
            "EQ-001",
            dt(2, 8, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            "NONE",
            dt(2, 8, 1),
        )])
        .unwrap();
    let api = query_api(&rig);

    let first = api
        .get_oee("EQ-001", dt(2, 8, 0), dt(2, 16, 0), Some("S-A"))
        .await
        .unwrap();
    // 尚无计数: 质量 NoData
    assert_eq!(first.result.quality, MetricValue::NoData);

    // 新事件入库(入库时间晚于上次 computed_at)=> 缓存过期,点查触发重算
    rig.event_repo
        .append_count_events(&[oee_engine::ProductionCountEvent {
            ingested_at: chrono::Utc::now().naive_utc() + chrono::Duration::hours(1),
            ..count_event("EQ-001", dt(2, 12, 0), 400, 380, 20, dt(2, 12, 1))
        }])
        .unwrap();

    let second = api
        .get_oee("EQ-001", dt(2, 8, 0), dt(2, 16, 0), Some("S-A"))
        .await
        .unwrap();
    assert!(second.result.quality.is_defined());
    assert!((second.result.quality.value().unwrap() - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn test_get_trend_is_ordered_and_finite() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 60.0);
    rig.event_repo
        .append_state_events(&[state_event(
            "EQ-001",
            dt(2, 8, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            "NONE",
            dt(2, 8, 1),
        )])
        .unwrap();
    let api = query_api(&rig);

    let trend = api
        .get_trend("EQ-001", dt(2, 8, 0), dt(2, 14, 0), Resolution::Hourly)
        .await
        .unwrap();

    assert_eq!(trend.points.len(), 6);
    for pair in trend.points.windows(2) {
        assert!(pair[0].window_start < pair[1].window_start);
        assert_eq!(pair[0].window_end, pair[1].window_start);
    }

    // 趋势可重入: 再次查询得到相同序列
    let again = api
        .get_trend("EQ-001", dt(2, 8, 0), dt(2, 14, 0), Resolution::Hourly)
        .await
        .unwrap();
    assert_eq!(again.points.len(), trend.points.len());
    assert_eq!(again.points[0].window_start, trend.points[0].window_start);
}

#[tokio::test]
async fn test_loss_pareto_ranked_with_config_errors_collected() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    // 同一工作中心: EQ-001 正常,EQ-BAD 节拍非法
    seed_equipment(&rig, "EQ-001", 60.0);
    seed_equipment(&rig, "EQ-BAD", 0.0);

    rig.event_repo
        .append_state_events(&[
            state_event(
                "EQ-001",
                dt(2, 8, 0),
                EquipmentState::Producing,
                StateCategory::Production,
                "NONE",
                dt(2, 8, 1),
            ),
            // 2 小时故障 + 30 分钟换型
            state_event(
                "EQ-001",
                dt(2, 9, 0),
                EquipmentState::Down,
                StateCategory::AvailabilityLoss,
                "BREAKDOWN",
                dt(2, 9, 1),
            ),
            state_event(
                "EQ-001",
                dt(2, 11, 0),
                EquipmentState::Idle,
                StateCategory::AvailabilityLoss,
                "SETUP",
                dt(2, 11, 1),
            ),
            state_event(
                "EQ-001",
                dt(2, 11, 30),
                EquipmentState::Producing,
                StateCategory::Production,
                "NONE",
                dt(2, 11, 31),
            ),
            state_event(
                "EQ-BAD",
                dt(2, 8, 0),
                EquipmentState::Producing,
                StateCategory::Production,
                "NONE",
                dt(2, 8, 1),
            ),
        ])
        .unwrap();
    rig.event_repo
        .append_count_events(&[count_event("EQ-BAD", dt(2, 9, 30), 50, 50, 0, dt(2, 9, 31))])
        .unwrap();
    let api = query_api(&rig);

    let pareto = api
        .get_loss_pareto(
            ParetoScope::WorkCenter("WC-A".to_string()),
            dt(2, 8, 0),
            dt(2, 16, 0),
        )
        .await
        .unwrap();

    // 故障 7200 秒排第一,换型 1800 秒在后
    assert!(!pareto.entries.is_empty());
    assert_eq!(pareto.entries[0].category, LossCategory::EquipmentFailure);
    assert_eq!(pareto.entries[0].duration_s, 7200);
    let setup = pareto
        .entries
        .iter()
        .find(|e| e.category == LossCategory::SetupAdjustment)
        .expect("换型损失应在榜");
    assert_eq!(setup.duration_s, 1800);
    // 占比口径: 占全部损失时长
    assert!(pareto.entries[0].share > setup.share);

    // 坏设备的配置错误逐台收集,不中止查询
    assert!(pareto
        .config_errors
        .iter()
        .any(|e| e.equipment_id == "EQ-BAD"));

    // 未知工作中心 => NotFound
    let err = api
        .get_loss_pareto(
            ParetoScope::WorkCenter("WC-404".to_string()),
            dt(2, 8, 0),
            dt(2, 16, 0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_shift_summary_exposes_both_labeled_metrics() {
    let (_tmp, db_path) = create_test_db();
    let rig = build_rig(&db_path);
    seed_equipment(&rig, "EQ-001", 60.0);
    seed_shift(&rig, "S-A", dt(2, 8, 0), dt(2, 16, 0), vec![]);
    seed_shift(&rig, "S-B", dt(2, 16, 0), dt(2, 20, 0), vec![]);
    rig.event_repo
        .append_state_events(&[state_event(
            "EQ-001",
            dt(2, 8, 0),
            EquipmentState::Producing,
            StateCategory::Production,
            "NONE",
            dt(2, 8, 1),
        )])
        .unwrap();
    rig.event_repo
        .append_count_events(&[
            count_event("EQ-001", dt(2, 15, 30), 480, 480, 0, dt(2, 15, 31)),
            count_event("EQ-001", dt(2, 19, 30), 120, 120, 0, dt(2, 19, 31)),
        ])
        .unwrap();
    let api = query_api(&rig);

    let summary = api
        .get_shift_summary("EQ-001", &["S-A".to_string(), "S-B".to_string()])
        .await
        .unwrap();

    // 两种口径并列输出,且在本例中偏离
    let weighted = summary.weighted_oee.value().unwrap();
    let naive = summary.naive_average_oee.value().unwrap();
    assert!((weighted - naive).abs() > 0.05);
}
