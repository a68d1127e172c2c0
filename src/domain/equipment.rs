// ==========================================
// OEE 计算引擎 - 设备领域模型
// ==========================================
// 依据: ISO 22400-2 设备主数据要求
// 来源: 外部设备台账系统,本引擎只读
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// Equipment - 设备
// ==========================================
// 红线: ideal_cycle_time_s <= 0 时该设备的表现性不可计算
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equipment {
    // ===== 标识 =====
    pub equipment_id: String,          // 设备编号
    pub name: String,                  // 设备名称
    pub work_center_id: String,        // 所属工作中心

    // ===== 参考数据 =====
    pub ideal_cycle_time_s: f64,       // 理想节拍 (秒/件), 表现性计算的必要参数
    pub nominal_speed_per_h: Option<f64>, // 铭牌速度 (件/小时)

    // ===== 状态 =====
    pub active: bool,                  // 是否在用
}

impl Equipment {
    /// 理想节拍是否有效(表现性可计算的前提)
    pub fn has_valid_cycle_time(&self) -> bool {
        self.ideal_cycle_time_s > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_time_validity() {
        let mut eq = Equipment {
            equipment_id: "EQ-001".to_string(),
            name: "冲压线 1".to_string(),
            work_center_id: "WC-A".to_string(),
            ideal_cycle_time_s: 52.0,
            nominal_speed_per_h: Some(69.0),
            active: true,
        };
        assert!(eq.has_valid_cycle_time());

        eq.ideal_cycle_time_s = 0.0;
        assert!(!eq.has_valid_cycle_time());

        eq.ideal_cycle_time_s = -1.0;
        assert!(!eq.has_valid_cycle_time());
    }
}
