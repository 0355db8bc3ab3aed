//! Player - 每个控制周期执行一次的轨迹回放状态机
//!
//! 状态由两条指令描述：`current`（正在执行的）和 `incoming`（最近收到的）。
//! 每次 `step()`：
//!
//! 1. 刷新测量状态，失败则本周期失败
//! 2. 时钟没有前进时直接返回
//! 3. 非阻塞读取最新指令
//! 4. 收到新的 Load / LoadAndGo：接收、校验连续性、插值、检查限位，
//!    成功后占有关节并切换到 Pause / Run
//! 5. 收到 Quit：释放关节，清空轨迹
//! 6. 当前为 Quit 而收到其它指令：尝试接收新轨迹
//! 7. 否则按 Run / Pause / Reverse 移动索引并下发位置命令
//!
//! 加载失败不会向上返回错误：Player 退回 Quit，等待下一条外部指令。

use crate::interfaces::{CommandSink, JointMode, JointStateSource};
use crate::{Channels, ControlError};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use waypath_channel::BroadcastChannel;
use waypath_interp::Interpolate;
use waypath_protocol::{Instruction, JointBitmap, PathElement, RobotDescription, Trajectory};
use waypath_transfer::{TransferConfig, receive_trajectory};

/// Player 配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerConfig {
    pub transfer: TransferConfig,
    /// 轨迹参数中容差为 0 时使用的连续性容差（rad）
    pub continuity_tolerance: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            continuity_tolerance: 1e-3,
        }
    }
}

/// 轨迹回放状态机
pub struct Player<C, S, K> {
    description: RobotDescription,
    channels: Channels<C>,
    state: S,
    sink: K,
    config: PlayerConfig,

    trajectory: Trajectory,
    current: Instruction,
    incoming: Instruction,
    index: usize,
    /// 刚加载的轨迹还没有播放过第一帧
    fresh: bool,
    last_tick: Option<Instant>,
    last_emitted: Option<PathElement>,
}

impl<C, S, K> Player<C, S, K>
where
    C: BroadcastChannel,
    S: JointStateSource,
    K: CommandSink,
{
    /// 创建 Player；打开前残留在通道里的帧被丢弃
    pub fn new(
        description: RobotDescription,
        mut channels: Channels<C>,
        state: S,
        sink: K,
        config: PlayerConfig,
    ) -> Self {
        if let Err(e) = channels.flush() {
            warn!(error = %e, "Failed to flush channels on startup");
        }
        Self {
            description,
            channels,
            state,
            sink,
            config,
            trajectory: Trajectory::default(),
            current: Instruction::Quit,
            incoming: Instruction::Quit,
            index: 0,
            fresh: false,
            last_tick: None,
            last_emitted: None,
        }
    }

    pub fn current_instruction(&self) -> Instruction {
        self.current
    }

    pub fn incoming_instruction(&self) -> Instruction {
        self.incoming
    }

    /// 播放索引
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn is_loaded(&self) -> bool {
        !self.trajectory.is_empty()
    }

    /// 最近一次下发的采样
    pub fn last_emitted(&self) -> Option<&PathElement> {
        self.last_emitted.as_ref()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// 以当前时间执行一个周期
    pub fn step(&mut self) -> bool {
        self.step_at(Instant::now())
    }

    /// 以给定时间执行一个周期；返回 false 表示本周期失败
    pub fn step_at(&mut self, now: Instant) -> bool {
        if let Err(e) = self.state.refresh() {
            warn!(error = %e, "Failed to refresh joint state");
            return false;
        }

        if let Some(last) = self.last_tick
            && now <= last
        {
            trace!("Clock has not advanced, skipping tick");
            return true;
        }
        self.last_tick = Some(now);

        let fresh_instruction = match self.channels.instruction.try_latest() {
            Ok(Some(received)) => match Instruction::decode(&received.frame) {
                Ok(instruction) => {
                    debug!(instruction = %instruction, "Instruction received");
                    self.incoming = instruction;
                    true
                },
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed instruction");
                    false
                },
            },
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "Instruction channel failure");
                return false;
            },
        };

        if fresh_instruction && self.incoming.is_load() {
            self.load(self.incoming);
            true
        } else if self.incoming == Instruction::Quit && self.current != Instruction::Quit {
            info!("Quit received, releasing joints");
            self.stop();
            true
        } else if self.current == Instruction::Quit && self.incoming != Instruction::Quit {
            self.load(self.incoming);
            true
        } else {
            self.current = self.incoming;
            self.play()
        }
    }

    /// 接收并启用新轨迹；失败时退回 Quit
    fn load(&mut self, requested: Instruction) {
        let previous = self.trajectory.bitmap();
        match self.receive_checked() {
            Ok(trajectory) => {
                let bitmap = trajectory.bitmap();
                self.release_slots(previous, Some(bitmap));
                self.trajectory = trajectory;
                self.index = 0;
                self.fresh = true;
                self.current = match requested {
                    Instruction::LoadAndGo => Instruction::Run,
                    Instruction::Load => Instruction::Pause,
                    other => other,
                };
                self.incoming = self.current;

                if let Err(e) = self.engage() {
                    error!(error = %e, "Failed to take control of joints");
                    self.stop();
                    return;
                }
                info!(
                    elements = self.trajectory.len(),
                    joints = bitmap.count(),
                    instruction = %self.current,
                    "Trajectory loaded"
                );
            },
            Err(e) => {
                warn!(error = %e, kind = %e.kind(), "Rejected trajectory");
                self.release_slots(previous, None);
                self.trajectory.clear();
                self.current = Instruction::Quit;
                self.incoming = Instruction::Quit;
            },
        }
    }

    fn receive_checked(&mut self) -> Result<Trajectory, ControlError> {
        let mut trajectory = Trajectory::default();
        receive_trajectory(
            &mut self.channels.trajectory,
            &mut self.channels.feedback,
            &mut trajectory,
            &self.config.transfer,
        )?;

        self.check_continuity(&trajectory)?;
        trajectory.interpolate(&self.description)?;

        if !trajectory.check_limits(&self.description) {
            let count = trajectory.limit_violations(&self.description).len();
            return Err(ControlError::LimitsViolated(count));
        }
        Ok(trajectory)
    }

    /// 第 0 帧必须与每个活动关节的测量值一致
    fn check_continuity(&self, trajectory: &Trajectory) -> Result<(), ControlError> {
        let first = trajectory
            .element(0)
            .ok_or(ControlError::TooShort(trajectory.len()))?;
        let tolerance = if trajectory.params().tolerance > 0.0 {
            trajectory.params().tolerance
        } else {
            self.config.continuity_tolerance
        };

        let mut offending = Vec::new();
        for (rank, slot) in trajectory.active_joints().enumerate() {
            let expected = first.values[rank];
            let measured = self.state.reference(slot);
            let matches = measured.is_some_and(|m| (m - expected).abs() <= tolerance);
            if !matches {
                let name = self.description.joint_name(slot);
                warn!(
                    joint = %name,
                    slot,
                    expected,
                    measured = ?measured,
                    tolerance,
                    "Trajectory start does not match measured state"
                );
                offending.push(name);
            }
        }

        if offending.is_empty() {
            Ok(())
        } else {
            Err(ControlError::Discontinuous { joints: offending })
        }
    }

    /// 占有活动关节并下发第 0 帧
    fn engage(&mut self) -> Result<(), ControlError> {
        for slot in self.trajectory.active_joints() {
            self.sink.claim(slot)?;
        }
        self.emit(0)
    }

    fn play(&mut self) -> bool {
        let len = self.trajectory.len();
        if len == 0 {
            return true;
        }

        if self.fresh {
            self.fresh = false;
            self.last_emitted = self.trajectory.element(0).cloned();
        }

        match self.current {
            Instruction::Run => self.index = (self.index + 1).min(len - 1),
            Instruction::Reverse => self.index = self.index.saturating_sub(1),
            _ => {},
        }

        match self.emit(self.index) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, index = self.index, "Failed to send joint commands");
                false
            },
        }
    }

    fn emit(&mut self, index: usize) -> Result<(), ControlError> {
        let Some(element) = self.trajectory.element(index) else {
            return Ok(());
        };
        for (rank, slot) in self.trajectory.active_joints().enumerate() {
            self.sink.set_mode(slot, JointMode::Rigid)?;
            self.sink.set_position(slot, element.values[rank])?;
        }
        self.sink.flush()?;
        self.last_emitted = Some(element.clone());
        trace!(index, "Sample emitted");
        Ok(())
    }

    /// 释放全部关节并清空轨迹
    fn stop(&mut self) {
        self.release_slots(self.trajectory.bitmap(), None);
        self.trajectory.clear();
        self.index = 0;
        self.fresh = false;
        self.current = Instruction::Quit;
        self.incoming = Instruction::Quit;
    }

    /// 释放 `slots` 中不在 `keep` 里的关节
    fn release_slots(&mut self, slots: JointBitmap, keep: Option<JointBitmap>) {
        for slot in slots.iter() {
            if keep.is_some_and(|k| k.contains(slot)) {
                continue;
            }
            if let Err(e) = self.sink.release(slot) {
                warn!(slot, error = %e, "Failed to release joint");
            }
        }
    }
}
