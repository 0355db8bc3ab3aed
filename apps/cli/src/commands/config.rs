//! 配置管理命令
//!
//! 配置文件位于 `<config_dir>/waypath/config.toml`，保存默认机器人描述路径
//! 和默认采样频率。

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use waypath_sdk::RobotDescription;

/// 配置文件路径
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;

    path.push("waypath");
    Ok(path)
}

fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// 默认机器人描述文件
    pub description: Option<PathBuf>,

    /// 默认采样频率（Hz）
    pub frequency: Option<f64>,
}

impl CliConfig {
    /// 加载配置（文件不存在时返回默认配置）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("读取配置文件失败")?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    /// 保存配置
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }
        let body = toml::to_string_pretty(self).context("序列化配置失败")?;
        let content = format!("# Waypath CLI Configuration\n\n{}", body);
        fs::write(path, content).context("写入配置文件失败")?;
        Ok(())
    }

    /// 命令行参数优先，其次是配置中的默认描述
    pub fn resolve_description(&self, arg: Option<&Path>) -> Result<RobotDescription> {
        let path = match (arg, &self.description) {
            (Some(path), _) => path,
            (None, Some(path)) => path.as_path(),
            (None, None) => bail!(
                "未指定机器人描述：使用 --description 或 `waypath-cli config set --description <PATH>`"
            ),
        };
        RobotDescription::load(path)
            .with_context(|| format!("加载机器人描述失败: {}", path.display()))
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 机器人描述文件（TOML）
        #[arg(short, long)]
        description: Option<PathBuf>,

        /// 默认采样频率（Hz）
        #[arg(short, long)]
        frequency: Option<f64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

impl ConfigCommand {
    pub async fn execute(self) -> Result<()> {
        match self {
            ConfigCommand::Set {
                description,
                frequency,
            } => Self::set_(description, frequency).await,

            ConfigCommand::Get { key } => Self::get_(key).await,

            ConfigCommand::Check => Self::check_().await,
        }
    }

    async fn set_(description: Option<PathBuf>, frequency: Option<f64>) -> Result<()> {
        let mut config = CliConfig::load()?;

        if let Some(path) = description {
            // 保存前先确认文件可用
            RobotDescription::load(&path)
                .with_context(|| format!("无效的机器人描述: {}", path.display()))?;
            println!("✅ 设置默认机器人描述: {}", path.display());
            config.description = Some(path);
        }

        if let Some(freq) = frequency {
            if !(freq.is_finite() && freq > 0.0) {
                bail!("采样频率必须为正数: {}", freq);
            }
            config.frequency = Some(freq);
            println!("✅ 设置默认采样频率: {} Hz", freq);
        }

        config.save()?;
        Ok(())
    }

    async fn get_(key: String) -> Result<()> {
        let config = CliConfig::load()?;

        match key.as_str() {
            "description" => match &config.description {
                Some(path) => println!("{}", path.display()),
                None => println!("(未设置)"),
            },

            "frequency" => match config.frequency {
                Some(freq) => println!("{}", freq),
                None => println!("(未设置)"),
            },

            _ => {
                println!("Waypath CLI 配置:");
                println!("  机器人描述: {:?}", config.description);
                println!("  采样频率: {:?}", config.frequency);
            },
        }

        Ok(())
    }

    async fn check_() -> Result<()> {
        let config = CliConfig::load()?;
        let path = config_file()?;

        println!("配置文件: {}", path.display());
        match &config.description {
            Some(desc_path) => {
                let description = config.resolve_description(None)?;
                println!(
                    "  机器人描述: {} ({} 个关节, {} Hz)",
                    desc_path.display(),
                    description.joint_count(),
                    description.frequency()
                );
            },
            None => println!("  机器人描述: (未设置)"),
        }
        println!("  采样频率: {:?}", config.frequency);

        Ok(())
    }
}
