//! 离线插值命令

use crate::commands::config::CliConfig;
use crate::waypoints::WaypointFile;
use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use waypath_sdk::prelude::*;

/// 插值模式参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Spline,
    Optimal,
    Raw,
}

impl From<ModeArg> for InterpMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Spline => InterpMode::Spline,
            ModeArg::Optimal => InterpMode::Optimal,
            ModeArg::Raw => InterpMode::Raw,
        }
    }
}

/// 插值命令参数
#[derive(Args, Debug)]
pub struct InterpolateCommand {
    /// 路径点文件（JSON）
    pub input: PathBuf,

    /// 机器人描述文件（默认使用配置）
    #[arg(short, long)]
    pub description: Option<PathBuf>,

    /// 输出文件（默认输出到 stdout）
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// 覆盖文件中的插值模式
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// 覆盖采样频率（Hz）
    #[arg(short, long)]
    pub frequency: Option<f64>,

    /// 覆盖拐角容差（rad）
    #[arg(short, long)]
    pub tolerance: Option<f64>,
}

impl InterpolateCommand {
    pub async fn execute(self) -> Result<()> {
        let config = CliConfig::load()?;
        let description = config.resolve_description(self.description.as_deref())?;

        let mut file = WaypointFile::load(&self.input)?;
        if let Some(mode) = self.mode {
            file.interp = mode.into();
        }
        if let Some(freq) = self.frequency {
            file.frequency = freq;
        } else if file.frequency <= 0.0
            && let Some(freq) = config.frequency
        {
            file.frequency = freq;
        }
        if let Some(tol) = self.tolerance {
            file.tolerance = tol;
        }

        let trajectory = interpolate_file(&file, &description)?;
        let violations = trajectory.limit_violations(&description);

        let json = serde_json::to_string_pretty(&trajectory).context("序列化轨迹失败")?;
        match &self.output {
            Some(path) => {
                fs::write(path, json)
                    .with_context(|| format!("写入轨迹失败: {}", path.display()))?;
                info!(path = %path.display(), "Trajectory written");
            },
            None => println!("{}", json),
        }

        let frequency = trajectory.params().effective_frequency(&description);
        eprintln!(
            "✅ {} 个路径点 → {} 个采样 ({:.3} s @ {} Hz)",
            file.waypoints.len(),
            trajectory.len(),
            trajectory.len().saturating_sub(1) as f64 / frequency,
            frequency
        );
        report_violations(&violations);
        if !violations.is_empty() {
            bail!("轨迹违反 {} 处限位", violations.len());
        }
        Ok(())
    }
}

/// 构造并插值
pub fn interpolate_file(file: &WaypointFile, description: &RobotDescription) -> Result<Trajectory> {
    let mut trajectory = file.to_trajectory(description)?;
    trajectory
        .interpolate(description)
        .context("插值失败")?;
    Ok(trajectory)
}

/// 在 stderr 打印违规列表
pub fn report_violations(violations: &[waypath_sdk::protocol::LimitViolation]) {
    if violations.is_empty() {
        eprintln!("✅ 限位检查通过");
        return;
    }
    eprintln!("❌ {} 处限位违规:", violations.len());
    for v in violations {
        eprintln!(
            "  {:>6} [{}] sample {}: {} = {:.6} (limit {:.6})",
            v.name,
            v.slot,
            v.sample,
            v.kind.as_str(),
            v.value,
            v.limit
        );
    }
}
