// ==========================================
// OEE 计算引擎 - 服务主入口
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 职责: 初始化存储与调度器,持续增量重算
// ==========================================

use std::sync::{Arc, Mutex};

use oee_engine::config::EngineConfig;
use oee_engine::engine::AggregationScheduler;
use oee_engine::repository::{
    AnomalyLogRepository, EquipmentRepository, EventLogRepository, OeeResultRepository,
    ShiftRepository,
};
use oee_engine::{db, logging};

/// 默认数据库路径: <数据目录>/oee-engine/oee.db
fn default_db_path() -> String {
    let mut dir = dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    dir.push("oee-engine");
    std::fs::create_dir_all(&dir).ok();
    dir.push("oee.db");
    dir.to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", oee_engine::APP_NAME);
    tracing::info!("系统版本: {}", oee_engine::VERSION);
    tracing::info!("==================================================");

    // 数据库路径: 命令行第一参数覆盖默认
    let db_path = std::env::args().nth(1).unwrap_or_else(default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    // 配置: 数据库同目录 config.json,不存在时回落默认值
    let config_path = std::path::Path::new(&db_path).with_file_name("config.json");
    let config = EngineConfig::load(&config_path)?;
    config.validate()?;

    // 初始化 schema 并检查版本
    let conn = db::open_sqlite_connection(&db_path)?;
    db::init_schema(&conn)?;
    if let Some(version) = db::read_schema_version(&conn)? {
        if version != db::CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                found = version,
                expected = db::CURRENT_SCHEMA_VERSION,
                "schema_version 不匹配,请确认数据库迁移状态"
            );
        }
    }
    let shared = Arc::new(Mutex::new(conn));

    // 仓储共享同一连接(busy_timeout 已统一配置)
    let event_repo = Arc::new(EventLogRepository::from_connection(Arc::clone(&shared)));
    let equipment_repo = Arc::new(EquipmentRepository::from_connection(Arc::clone(&shared)));
    let shift_repo = Arc::new(ShiftRepository::from_connection(Arc::clone(&shared)));
    let result_repo = Arc::new(OeeResultRepository::from_connection(Arc::clone(&shared)));
    let anomaly_repo = Arc::new(AnomalyLogRepository::from_connection(Arc::clone(&shared)));

    let scheduler = Arc::new(AggregationScheduler::new(
        event_repo,
        equipment_repo,
        shift_repo,
        result_repo,
        anomaly_repo,
        config,
    ));

    tracing::info!("聚合调度器启动");
    scheduler.run_loop().await;
    Ok(())
}
