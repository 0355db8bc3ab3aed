//! 轨迹文件限位检查

use crate::commands::config::CliConfig;
use crate::commands::interpolate::report_violations;
use anyhow::{Context, Result, bail};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use waypath_sdk::prelude::*;

/// 检查命令参数
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// 轨迹文件（`interpolate` 输出的 JSON）
    pub trajectory: PathBuf,

    /// 机器人描述文件（默认使用配置）
    #[arg(short, long)]
    pub description: Option<PathBuf>,
}

impl CheckCommand {
    pub async fn execute(self) -> Result<()> {
        let config = CliConfig::load()?;
        let description = config.resolve_description(self.description.as_deref())?;
        let trajectory = load_trajectory(&self.trajectory)?;

        if trajectory.interp_mode() != InterpMode::Raw {
            eprintln!(
                "⚠️  轨迹尚未插值（{}），按原样检查",
                trajectory.interp_mode().as_str()
            );
        }
        eprintln!(
            "{}: {} 个采样, {} 个关节",
            self.trajectory.display(),
            trajectory.len(),
            trajectory.bitmap().count()
        );

        let violations = trajectory.limit_violations(&description);
        report_violations(&violations);
        if !violations.is_empty() {
            bail!("轨迹违反 {} 处限位", violations.len());
        }
        Ok(())
    }
}

pub fn load_trajectory(path: &Path) -> Result<Trajectory> {
    let content =
        fs::read_to_string(path).with_context(|| format!("读取轨迹失败: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("解析轨迹失败: {}", path.display()))
}
