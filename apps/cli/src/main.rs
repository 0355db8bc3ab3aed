//! # Waypath CLI
//!
//! 离线插值、限位检查和进程内回放演示。
//!
//! ```bash
//! # 配置默认机器人描述
//! waypath-cli config set --description robot.toml
//!
//! # 路径点文件 → 稠密轨迹 JSON
//! waypath-cli interpolate waypoints.json --output trajectory.json
//!
//! # 检查轨迹文件
//! waypath-cli check trajectory.json
//!
//! # Operator + Player + 模拟机器人（Ctrl-C 停止）
//! waypath-cli demo --joints RSP,REP --waypoints "0.3,-0.5;0.1,-0.9"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod sim;
mod waypoints;

use commands::{CheckCommand, ConfigCommand, DemoCommand, InterpolateCommand};

/// Waypath CLI - 轨迹命令行工具
#[derive(Parser, Debug)]
#[command(name = "waypath-cli")]
#[command(about = "Command-line interface for waypath trajectories", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 插值路径点文件
    Interpolate {
        #[command(flatten)]
        args: InterpolateCommand,
    },

    /// 检查轨迹文件的限位
    Check {
        #[command(flatten)]
        args: CheckCommand,
    },

    /// 在模拟机器人上回放
    Demo {
        #[command(flatten)]
        args: DemoCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("waypath_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config(cmd) => cmd.execute().await,
        Commands::Interpolate { args } => args.execute().await,
        Commands::Check { args } => args.execute().await,
        Commands::Demo { args } => args.execute().await,
    }
}
