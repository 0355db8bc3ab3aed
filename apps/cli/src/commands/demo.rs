//! 进程内回放演示
//!
//! Operator 和 Player 通过进程内总线通信，Player 在独立线程上按控制频率
//! 调用 `step()`，驱动一个理想跟踪的模拟机器人。Ctrl-C 发送 Quit 并退出。

use crate::commands::config::CliConfig;
use crate::commands::interpolate::ModeArg;
use crate::sim::{SimCommands, SimRobot, SimState};
use crate::waypoints::{parse_waypoints, resolve_slots};
use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use spin_sleep::SpinSleeper;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use waypath_sdk::prelude::*;

/// 未指定描述时使用的演示机器人（右臂）
const DEMO_DESCRIPTION: &str = r#"
frequency = 200.0

[[joints]]
name = "RSP"
index = 0
min_position = -3.0
max_position = 3.0
nominal_speed = 0.8
max_speed = 1.5
nominal_accel = 1.0
max_accel = 3.0

[[joints]]
name = "RSR"
index = 1
min_position = -2.5
max_position = 0.5
nominal_speed = 0.8
max_speed = 1.5
nominal_accel = 1.0
max_accel = 3.0

[[joints]]
name = "REP"
index = 3
min_position = -2.5
max_position = 0.0
nominal_speed = 1.0
max_speed = 2.0
nominal_accel = 1.2
max_accel = 4.0
"#;

type SimPlayer = Player<MemoryChannel, SimState, SimCommands>;

/// 回放线程每个周期上报的进度
#[derive(Debug, Clone, Copy)]
struct Progress {
    instruction: Instruction,
    index: usize,
    len: usize,
}

/// 演示命令参数
#[derive(Args, Debug)]
pub struct DemoCommand {
    /// 机器人描述文件（默认使用配置，未配置时使用内置演示机器人）
    #[arg(short, long)]
    pub description: Option<PathBuf>,

    /// 参与运动的关节名称
    #[arg(short, long, value_delimiter = ',', default_value = "RSP,REP")]
    pub joints: Vec<String>,

    /// 路径点，行之间用 ';' 分隔
    #[arg(short, long, default_value = "0.3,-0.5;0.1,-0.9;0.0,0.0")]
    pub waypoints: String,

    /// 插值模式
    #[arg(short, long, value_enum, default_value_t = ModeArg::Spline)]
    pub mode: ModeArg,

    /// 拐角容差（rad，仅 optimal）
    #[arg(short, long, default_value_t = 0.01)]
    pub tolerance: f64,

    /// 传输等待时间（秒）
    #[arg(long, default_value_t = 5)]
    pub max_wait: u64,
}

impl DemoCommand {
    pub async fn execute(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.run())
            .await
            .context("回放任务异常退出")?
    }

    fn run(self) -> Result<()> {
        let config = CliConfig::load()?;
        let description = match (&self.description, &config.description) {
            (None, None) => RobotDescription::from_toml_str(DEMO_DESCRIPTION)?,
            _ => config.resolve_description(self.description.as_deref())?,
        };
        let slots = resolve_slots(&self.joints, &description)?;
        let waypoints = parse_waypoints(&self.waypoints)?;
        if waypoints.is_empty() {
            bail!("至少需要一个路径点");
        }

        let frequency = description.frequency();
        let transfer = TransferConfig::with_max_wait_secs(self.max_wait);
        let bus = MemoryBus::new();
        let robot = SimRobot::new();

        // Player 必须在 Operator 发布指令之前打开通道
        let player = Player::new(
            description.clone(),
            Channels::open(&bus),
            robot.state(),
            robot.commands(),
            PlayerConfig {
                transfer,
                ..PlayerConfig::default()
            },
        );

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (progress_tx, progress_rx) = crossbeam_channel::bounded::<Progress>(1);
        let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
        ctrlc::set_handler(move || {
            let _ = interrupt_tx.try_send(());
        })
        .context("设置 Ctrl-C 处理失败")?;

        let handle = thread::Builder::new()
            .name("waypath-player".to_string())
            .spawn(move || playback_loop(player, frequency, stop_rx, progress_tx))
            .context("启动回放线程失败")?;

        let mut operator = Operator::new(description, Channels::open(&bus), robot.state())
            .with_transfer_config(transfer);
        operator.set_joint_names(&self.joints)?;
        operator.set_interp_mode(self.mode.into());
        operator.set_tolerance(self.tolerance);
        operator.add_waypoints(&waypoints)?;

        println!(
            "▶ {} 个路径点, 关节 {:?}, {} 插值 @ {} Hz",
            waypoints.len(),
            self.joints,
            InterpMode::from(self.mode).as_str(),
            frequency
        );

        let outcome = operator
            .send_new_trajectory(Instruction::Run)
            .context("发送轨迹失败")
            .and_then(|()| watch(&progress_rx, &interrupt_rx));

        if let Err(e) = operator.send_instruction(Instruction::Quit) {
            warn!(error = %e, "Failed to publish Quit");
        }
        thread::sleep(Duration::from_secs_f64(5.0 / frequency));
        let _ = stop_tx.send(());
        handle
            .join()
            .map_err(|_| anyhow!("回放线程 panic"))?;

        let positions = robot.positions();
        for (name, slot) in self.joints.iter().zip(&slots) {
            println!("  {:>6} [{}] = {:+.4}", name, slot, positions[*slot]);
        }
        outcome
    }
}

/// 等待回放结束或 Ctrl-C
fn watch(progress: &Receiver<Progress>, interrupt: &Receiver<()>) -> Result<()> {
    // 丢弃加载之前的空闲进度
    while progress.try_recv().is_ok() {}

    let mut reported = None;
    loop {
        crossbeam_channel::select! {
            recv(progress) -> msg => {
                let p = msg.map_err(|_| anyhow!("回放线程意外退出"))?;
                if p.instruction == Instruction::Quit {
                    bail!("回放端拒绝了轨迹（详见日志）");
                }
                let decile = (p.index + 1) * 10 / p.len.max(1);
                if reported != Some(decile) {
                    reported = Some(decile);
                    println!("  {:>3}%  {}/{}", decile * 10, p.index + 1, p.len);
                }
                if p.index + 1 >= p.len {
                    println!("✅ 回放完成");
                    return Ok(());
                }
            },
            recv(interrupt) -> _ => {
                println!("\n⏹ 中断");
                return Ok(());
            },
        }
    }
}

fn playback_loop(
    mut player: SimPlayer,
    frequency: f64,
    stop: Receiver<()>,
    progress: Sender<Progress>,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => info!("Player thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set player thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    let period = Duration::from_secs_f64(1.0 / frequency);
    let sleeper = SpinSleeper::default();
    info!(frequency, "Playback loop started");

    loop {
        match stop.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {},
        }

        if !player.step() {
            warn!(index = player.index(), "Playback tick failed");
        }
        let _ = progress.try_send(Progress {
            instruction: player.current_instruction(),
            index: player.index(),
            len: player.trajectory().len(),
        });

        sleeper.sleep(period);
    }
    info!("Playback loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_description_is_valid() {
        let description = RobotDescription::from_toml_str(DEMO_DESCRIPTION).unwrap();
        assert_eq!(description.joint_count(), 3);
        assert_eq!(description.joint_slot("REP"), Some(3));
    }

    #[test]
    fn test_default_waypoints_fit_default_joints() {
        let description = RobotDescription::from_toml_str(DEMO_DESCRIPTION).unwrap();
        let slots = resolve_slots(&["RSP", "REP"], &description).unwrap();
        let rows = parse_waypoints("0.3,-0.5;0.1,-0.9;0.0,0.0").unwrap();
        assert!(rows.iter().all(|r| r.len() == slots.len()));
    }

    #[test]
    fn test_playback_loop_stops_on_signal() {
        let bus = MemoryBus::new();
        let robot = SimRobot::new();
        let player = Player::new(
            RobotDescription::default(),
            Channels::open(&bus),
            robot.state(),
            robot.commands(),
            PlayerConfig::default(),
        );
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (progress_tx, progress_rx) = crossbeam_channel::bounded(1);
        let handle = thread::spawn(move || playback_loop(player, 200.0, stop_rx, progress_tx));

        let p = progress_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(p.instruction, Instruction::Quit);
        assert_eq!(p.len, 0);

        stop_tx.send(()).unwrap();
        handle.join().unwrap();
    }
}
