//! Operator - 轨迹生产者
//!
//! 在命令进程中累积路径点，按需构造轨迹并通过分块协议发送给 Player。
//!
//! # 连续性
//!
//! 构造出的轨迹第 0 帧总是所有活动关节的当前测量值，Player 依赖这一点
//! 拒绝与机器人当前姿态不连续的轨迹。后续每个路径点只覆盖映射到的
//! 关节槽位，其余槽位保持上一帧写入的值。
//!
//! # 示例
//!
//! ```rust,no_run
//! use waypath_channel::MemoryBus;
//! use waypath_control::{Channels, JointStateSource, Operator};
//! use waypath_protocol::{Instruction, RobotDescription};
//!
//! # fn run<S: JointStateSource>(
//! #     description: RobotDescription,
//! #     state: S,
//! # ) -> Result<(), waypath_control::ControlError> {
//! let bus = MemoryBus::new();
//! let mut operator = Operator::new(description, Channels::open(&bus), state);
//!
//! operator.set_joint_indices(&[0, 3])?;
//! operator.add_waypoint(&[0.3, -0.5])?;
//! operator.send_new_trajectory(Instruction::Run)?;
//! # Ok(())
//! # }
//! ```

use crate::interfaces::JointStateSource;
use crate::{Channels, ControlError};
use smallvec::SmallVec;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use waypath_channel::BroadcastChannel;
use waypath_interp::Interpolate;
use waypath_protocol::{
    Instruction, InterpMode, JointBitmap, JointLimits, MAX_JOINT_COUNT, Params, PathElement,
    RobotDescription, Trajectory,
};
use waypath_transfer::{TransferConfig, cancel_transfer, send_trajectory};

/// 把高层指令映射为"发送新轨迹"时实际发布的指令
///
/// - Run / LoadAndGo → LoadAndGo
/// - Pause / Reverse / Load → Load
/// - Quit → 无效
pub fn outgoing_instruction(requested: Instruction) -> Result<Instruction, ControlError> {
    match requested {
        Instruction::Run | Instruction::LoadAndGo => Ok(Instruction::LoadAndGo),
        Instruction::Pause | Instruction::Reverse | Instruction::Load => Ok(Instruction::Load),
        Instruction::Quit => Err(ControlError::InvalidInstruction(requested)),
    }
}

/// 轨迹生产者
pub struct Operator<C, S> {
    description: RobotDescription,
    channels: Channels<C>,
    state: S,
    transfer: TransferConfig,
    params: Params,
    /// 外部下标 → 关节槽位
    mapping: Option<SmallVec<[usize; 16]>>,
    waypoints: Vec<Vec<f64>>,
    trajectory: Trajectory,
    constructed: bool,
}

impl<C, S> Operator<C, S>
where
    C: BroadcastChannel,
    S: JointStateSource,
{
    pub fn new(description: RobotDescription, channels: Channels<C>, state: S) -> Self {
        let params = Params::new(description.frequency(), InterpMode::Spline, 0.0);
        Self {
            description,
            channels,
            state,
            transfer: TransferConfig::default(),
            params,
            mapping: None,
            waypoints: Vec::new(),
            trajectory: Trajectory::default(),
            constructed: false,
        }
    }

    pub fn with_transfer_config(mut self, config: TransferConfig) -> Self {
        self.transfer = config;
        self
    }

    pub fn description(&self) -> &RobotDescription {
        &self.description
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn set_interp_mode(&mut self, mode: InterpMode) {
        self.params.interp = mode;
        self.constructed = false;
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.params.frequency = frequency;
        self.constructed = false;
    }

    /// 位置容差，同时也是时间最优插值的拐角容差
    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.params.tolerance = tolerance;
        self.constructed = false;
    }

    /// 用自定义限位替代描述中的限位
    pub fn set_custom_limits<I>(&mut self, limits: I) -> Result<(), ControlError>
    where
        I: IntoIterator<Item = (usize, JointLimits)>,
    {
        self.params.set_custom_limits(limits)?;
        self.constructed = false;
        Ok(())
    }

    /// 设置外部下标 → 关节槽位的映射
    ///
    /// 槽位必须唯一且小于 64。重新设置会让已构造的轨迹失效；映射宽度变化时
    /// 已累积的路径点也会被丢弃。
    pub fn set_joint_indices(&mut self, slots: &[usize]) -> Result<(), ControlError> {
        if slots.is_empty() {
            return Err(ControlError::InvalidMapping("empty joint list".to_string()));
        }
        let mut seen = HashSet::with_capacity(slots.len());
        for &slot in slots {
            if slot >= MAX_JOINT_COUNT {
                return Err(ControlError::InvalidMapping(format!(
                    "slot {} out of range (max {})",
                    slot, MAX_JOINT_COUNT
                )));
            }
            if !seen.insert(slot) {
                return Err(ControlError::InvalidMapping(format!(
                    "slot {} mapped twice",
                    slot
                )));
            }
        }

        let width_changed = self.mapping.as_ref().is_some_and(|m| m.len() != slots.len());
        if width_changed && !self.waypoints.is_empty() {
            warn!(
                dropped = self.waypoints.len(),
                "Joint mapping width changed, clearing waypoints"
            );
            self.waypoints.clear();
        }

        self.mapping = Some(SmallVec::from_slice(slots));
        self.constructed = false;
        info!(joints = ?slots, "Joint mapping set");
        Ok(())
    }

    /// 按关节名称设置映射
    pub fn set_joint_names<N: AsRef<str>>(&mut self, names: &[N]) -> Result<(), ControlError> {
        let slots = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.description
                    .joint_slot(name)
                    .ok_or_else(|| ControlError::UnknownJoint(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.set_joint_indices(&slots)
    }

    pub fn joint_indices(&self) -> Option<&[usize]> {
        self.mapping.as_deref()
    }

    fn width(&self) -> Result<usize, ControlError> {
        self.mapping
            .as_ref()
            .map(|m| m.len())
            .ok_or(ControlError::Uninitialized)
    }

    pub fn add_waypoint(&mut self, waypoint: &[f64]) -> Result<(), ControlError> {
        let expected = self.width()?;
        if waypoint.len() != expected {
            return Err(ControlError::ArrayMismatch {
                expected,
                actual: waypoint.len(),
            });
        }
        self.waypoints.push(waypoint.to_vec());
        self.constructed = false;
        Ok(())
    }

    /// 批量追加；任何一个长度不符时一个都不追加
    pub fn add_waypoints<W: AsRef<[f64]>>(&mut self, waypoints: &[W]) -> Result<(), ControlError> {
        let expected = self.width()?;
        if let Some(bad) = waypoints.iter().find(|w| w.as_ref().len() != expected) {
            return Err(ControlError::ArrayMismatch {
                expected,
                actual: bad.as_ref().len(),
            });
        }
        self.waypoints
            .extend(waypoints.iter().map(|w| w.as_ref().to_vec()));
        self.constructed = false;
        Ok(())
    }

    pub fn remove_last(&mut self) -> Result<Vec<f64>, ControlError> {
        let removed = self.waypoints.pop().ok_or(ControlError::NoWaypoints)?;
        self.constructed = false;
        Ok(removed)
    }

    pub fn clear_waypoints(&mut self) {
        self.waypoints.clear();
        self.constructed = false;
    }

    pub fn waypoints(&self) -> &[Vec<f64>] {
        &self.waypoints
    }

    /// 当前轨迹（必要时重新构造）
    pub fn current_trajectory(&mut self) -> Result<&Trajectory, ControlError> {
        self.ensure_constructed()?;
        Ok(&self.trajectory)
    }

    /// 在本地插值当前轨迹（离线使用，不发送）
    pub fn interpolate(&mut self) -> Result<&Trajectory, ControlError> {
        self.ensure_constructed()?;
        self.trajectory.interpolate(&self.description)?;
        Ok(&self.trajectory)
    }

    fn ensure_constructed(&mut self) -> Result<(), ControlError> {
        if !self.constructed {
            self.trajectory = self.build()?;
            self.constructed = true;
        }
        Ok(())
    }

    fn build(&mut self) -> Result<Trajectory, ControlError> {
        let mapping = self.mapping.clone().ok_or(ControlError::Uninitialized)?;
        let bitmap = JointBitmap::from_slots(mapping.iter().copied())?;

        self.state.refresh()?;

        // 全宽累加器：每个路径点只覆盖映射到的槽位
        let mut accumulator = [0.0f64; MAX_JOINT_COUNT];
        for slot in bitmap.iter() {
            accumulator[slot] = self
                .state
                .reference(slot)
                .ok_or(ControlError::NoReference(slot))?;
        }

        let mut trajectory = Trajectory::new(self.params.clone());
        trajectory.set_bitmap(bitmap)?;
        let gather = |acc: &[f64; MAX_JOINT_COUNT]| -> Vec<f64> {
            bitmap.iter().map(|slot| acc[slot]).collect()
        };
        trajectory.push(PathElement::new(gather(&accumulator), 0))?;

        for (i, waypoint) in self.waypoints.iter().enumerate() {
            for (&slot, &value) in mapping.iter().zip(waypoint) {
                accumulator[slot] = value;
            }
            trajectory.push(PathElement::new(gather(&accumulator), i as u64 + 1))?;
        }

        debug!(
            elements = trajectory.len(),
            joints = bitmap.count(),
            "Trajectory constructed"
        );
        Ok(trajectory)
    }

    /// 发送当前轨迹，使用 [`with_transfer_config`](Self::with_transfer_config) 设置的等待时间
    ///
    /// 先清空反馈通道，再发布（映射后的）指令，然后执行分块传输。
    pub fn send_new_trajectory(&mut self, instruction: Instruction) -> Result<(), ControlError> {
        let transfer = self.transfer;
        self.send_new_trajectory_with(instruction, &transfer)
    }

    /// 同 [`send_new_trajectory`](Self::send_new_trajectory)，本次发送使用 `transfer`
    pub fn send_new_trajectory_with(
        &mut self,
        instruction: Instruction,
        transfer: &TransferConfig,
    ) -> Result<(), ControlError> {
        if self.mapping.is_none() {
            return Err(ControlError::Uninitialized);
        }
        self.ensure_constructed()?;
        if self.trajectory.len() < 2 {
            return Err(ControlError::TooShort(self.trajectory.len()));
        }
        let outgoing = outgoing_instruction(instruction)?;

        self.channels.feedback.flush()?;
        self.channels.instruction.publish(&outgoing.encode())?;
        info!(
            requested = %instruction,
            outgoing = %outgoing,
            elements = self.trajectory.len(),
            "Sending new trajectory"
        );

        send_trajectory(
            &mut self.channels.trajectory,
            &mut self.channels.feedback,
            &self.trajectory,
            transfer,
        )?;
        Ok(())
    }

    /// 只发布指令（切换已加载轨迹的播放状态或退出）
    pub fn send_instruction(&mut self, instruction: Instruction) -> Result<(), ControlError> {
        self.channels.instruction.publish(&instruction.encode())?;
        debug!(instruction = %instruction, "Instruction published");
        Ok(())
    }

    /// 中止正在进行的传输
    pub fn cancel_transfer(&mut self) -> Result<(), ControlError> {
        cancel_transfer(&mut self.channels.trajectory)?;
        Ok(())
    }
}
