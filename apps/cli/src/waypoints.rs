//! 路径点文件
//!
//! ```json
//! {
//!   "joints": ["RSP", "REP"],
//!   "interp": "optimal",
//!   "frequency": 200.0,
//!   "tolerance": 0.01,
//!   "waypoints": [[0.0, 0.0], [0.3, -0.5], [0.1, -0.9]]
//! }
//! ```
//!
//! 每一行按 `joints` 的顺序给出关节值；离线插值时第一行就是起点。

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use waypath_sdk::prelude::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointFile {
    pub joints: Vec<String>,
    #[serde(default)]
    pub interp: InterpMode,
    /// 0 表示使用机器人描述中的频率
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub tolerance: f64,
    pub waypoints: Vec<Vec<f64>>,
}

impl WaypointFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取路径点文件失败: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("解析路径点文件失败: {}", path.display()))
    }

    /// 按名称解析槽位并构造（未插值的）轨迹
    ///
    /// 文件中的列顺序任意，轨迹中的值按槽位升序排列。
    pub fn to_trajectory(&self, description: &RobotDescription) -> Result<Trajectory> {
        let slots = resolve_slots(&self.joints, description)?;
        let bitmap = JointBitmap::from_slots(slots.iter().copied())?;

        // 槽位升序 → 文件列
        let columns: Vec<usize> = bitmap
            .iter()
            .filter_map(|slot| slots.iter().position(|&s| s == slot))
            .collect();

        let mut trajectory =
            Trajectory::new(Params::new(self.frequency, self.interp, self.tolerance));
        trajectory.set_bitmap(bitmap)?;
        for (i, row) in self.waypoints.iter().enumerate() {
            if row.len() != slots.len() {
                bail!(
                    "第 {} 个路径点有 {} 个值，应为 {}",
                    i,
                    row.len(),
                    slots.len()
                );
            }
            let values = columns.iter().map(|&c| row[c]).collect();
            trajectory.push(PathElement::new(values, i as u64))?;
        }
        Ok(trajectory)
    }
}

/// 关节名称 → 槽位（保持输入顺序）
pub fn resolve_slots<N: AsRef<str>>(
    names: &[N],
    description: &RobotDescription,
) -> Result<Vec<usize>> {
    if names.is_empty() {
        bail!("关节列表为空");
    }
    let mut slots = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        let slot = description
            .joint_slot(name)
            .with_context(|| format!("未知关节: {}", name))?;
        if slots.contains(&slot) {
            bail!("关节重复: {}", name);
        }
        slots.push(slot);
    }
    Ok(slots)
}

/// 解析 "0.3,-0.5;0.1,-0.9" 形式的路径点列表
pub fn parse_waypoints(text: &str) -> Result<Vec<Vec<f64>>> {
    text.split(';')
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.split(',')
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .with_context(|| format!("无效的关节值: {:?}", v))
                })
                .collect()
        })
        .collect()
}
