//! # 关节限位与机器人描述
//!
//! 机器人描述给出关节数量、每个关节的名称 / 槽位 / 限位以及控制频率，
//! 通常从 TOML 文件加载：
//!
//! ```toml
//! frequency = 200.0
//!
//! [[joints]]
//! name = "RSP"
//! index = 0
//! min_position = -2.0
//! max_position = 2.0
//! nominal_speed = 0.8
//! max_speed = 1.5
//! nominal_accel = 1.0
//! max_accel = 3.0
//! ```

use crate::ProtocolError;
use crate::constants::{DEFAULT_FREQUENCY, MAX_JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 单个关节的运动学限位
///
/// 插值使用 nominal 值，限位检查使用 max 值。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JointLimits {
    /// 最小位置（rad）
    pub min_position: f64,
    /// 最大位置（rad）
    pub max_position: f64,
    /// 名义速度（rad/s）
    pub nominal_speed: f64,
    /// 最大速度（rad/s）
    pub max_speed: f64,
    /// 名义加速度（rad/s²）
    pub nominal_accel: f64,
    /// 最大加速度（rad/s²）
    pub max_accel: f64,
}

impl JointLimits {
    /// 检查限位本身是否自洽
    pub fn is_sane(&self) -> bool {
        let values = [
            self.min_position,
            self.max_position,
            self.nominal_speed,
            self.max_speed,
            self.nominal_accel,
            self.max_accel,
        ];
        values.iter().all(|v| v.is_finite())
            && self.min_position <= self.max_position
            && self.nominal_speed >= 0.0
            && self.max_speed >= 0.0
            && self.nominal_accel >= 0.0
            && self.max_accel >= 0.0
    }
}

/// 描述文件中的关节条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    /// 关节名称（如 "RSP"）
    pub name: String,
    /// 关节槽位（0..64）
    pub index: usize,
    #[serde(flatten)]
    pub limits: JointLimits,
}

/// 机器人描述
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RobotDescription {
    /// 控制频率（Hz），0 表示使用默认值
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub joints: Vec<JointInfo>,
}

impl RobotDescription {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ProtocolError> {
        let description: RobotDescription = toml::from_str(content)?;
        description.validate()?;
        Ok(description)
    }

    /// 从文件加载并校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 校验名称唯一、槽位唯一且在范围内、限位自洽
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(self.frequency.is_finite() && self.frequency >= 0.0) {
            return Err(ProtocolError::InvalidDescription(format!(
                "frequency must be non-negative, got {}",
                self.frequency
            )));
        }

        let mut seen_slots = 0u64;
        for (position, joint) in self.joints.iter().enumerate() {
            if joint.index >= MAX_JOINT_COUNT {
                return Err(ProtocolError::JointOutOfRange {
                    slot: joint.index,
                    max: MAX_JOINT_COUNT,
                });
            }
            if seen_slots & (1u64 << joint.index) != 0 {
                return Err(ProtocolError::InvalidDescription(format!(
                    "duplicate joint slot {}",
                    joint.index
                )));
            }
            seen_slots |= 1u64 << joint.index;

            if self.joints[..position].iter().any(|j| j.name == joint.name) {
                return Err(ProtocolError::InvalidDescription(format!(
                    "duplicate joint name {}",
                    joint.name
                )));
            }
            if !joint.limits.is_sane() {
                return Err(ProtocolError::InvalidDescription(format!(
                    "inconsistent limits for joint {}",
                    joint.name
                )));
            }
        }
        Ok(())
    }

    /// 关节数量
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// 控制频率（Hz），描述为 0 时返回 200
    pub fn frequency(&self) -> f64 {
        if self.frequency > 0.0 {
            self.frequency
        } else {
            DEFAULT_FREQUENCY
        }
    }

    /// 按槽位查找关节
    pub fn joint(&self, slot: usize) -> Option<&JointInfo> {
        self.joints.iter().find(|j| j.index == slot)
    }

    /// 名称 → 槽位
    pub fn joint_slot(&self, name: &str) -> Option<usize> {
        self.joints.iter().find(|j| j.name == name).map(|j| j.index)
    }

    /// 槽位 → 名称（未知槽位返回 "J<slot>"）
    pub fn joint_name(&self, slot: usize) -> String {
        self.joint(slot)
            .map(|j| j.name.clone())
            .unwrap_or_else(|| format!("J{}", slot))
    }

    pub fn limits(&self, slot: usize) -> Option<JointLimits> {
        self.joint(slot).map(|j| j.limits)
    }

    /// 所有已描述关节的槽位（按描述顺序）
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.joints.iter().map(|j| j.index)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
frequency = 100.0

[[joints]]
name = "RSP"
index = 0
min_position = -2.0
max_position = 2.0
nominal_speed = 1.0
max_speed = 2.0
nominal_accel = 0.8
max_accel = 4.0

[[joints]]
name = "REP"
index = 3
min_position = -2.5
max_position = 0.0
nominal_speed = 0.5
max_speed = 1.0
nominal_accel = 0.5
max_accel = 2.0
"#;

    #[test]
    fn test_parse_description() {
        let desc = RobotDescription::from_toml_str(SAMPLE).unwrap();
        assert_eq!(desc.joint_count(), 2);
        assert_eq!(desc.frequency(), 100.0);
        assert_eq!(desc.joint_slot("REP"), Some(3));
        assert_eq!(desc.joint_name(0), "RSP");
        assert_eq!(desc.joint_name(9), "J9");
        assert_eq!(desc.limits(3).unwrap().max_position, 0.0);
        assert_eq!(desc.slots().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_zero_frequency_defaults() {
        let desc = RobotDescription {
            frequency: 0.0,
            joints: Vec::new(),
        };
        assert_eq!(desc.frequency(), DEFAULT_FREQUENCY);
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let content = SAMPLE.replace("index = 3", "index = 0");
        let err = RobotDescription::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidDescription(_)));
    }

    #[test]
    fn test_slot_out_of_range_rejected() {
        let content = SAMPLE.replace("index = 3", "index = 64");
        let err = RobotDescription::from_toml_str(&content).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::JointOutOfRange { slot: 64, max: 64 }
        ));
    }

    #[test]
    fn test_inverted_position_limits_rejected() {
        let content = SAMPLE.replace("max_position = 0.0", "max_position = -3.0");
        assert!(RobotDescription::from_toml_str(&content).is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let err = RobotDescription::from_toml_str("frequency = [").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
    }
}
