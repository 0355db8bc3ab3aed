//! # Waypath Control
//!
//! 轨迹的生产者与消费者：
//!
//! - [`Operator`]：在命令进程中累积路径点，构造轨迹并通过分块协议发送
//! - [`Player`]：在实时回放进程中每个控制周期调用一次 `step()`，
//!   接收、校验、插值并按索引逐帧下发关节位置命令
//!
//! 两者都不创建线程；唯一的阻塞点是传输协议中的带超时读取。
//!
//! 外部协作者（关节状态、关节命令）通过 [`interfaces`] 中的 trait 注入。

pub mod interfaces;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod operator;
pub mod player;

pub use interfaces::{CommandSink, InterfaceError, JointMode, JointStateSource};
pub use operator::{Operator, outgoing_instruction};
pub use player::{Player, PlayerConfig};

use thiserror::Error;
use waypath_channel::{BroadcastChannel, ChannelError, MemoryBus, MemoryChannel};
use waypath_interp::InterpError;
use waypath_protocol::{
    ErrorKind, FEEDBACK_CHANNEL, INSTRUCTION_CHANNEL, Instruction, ProtocolError,
    TRAJECTORY_CHANNEL,
};
use waypath_transfer::TransferError;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 路径点长度与活动关节数不符
    #[error("Waypoint length mismatch: expected {expected}, got {actual}")]
    ArrayMismatch { expected: usize, actual: usize },

    /// 轨迹元素不足
    #[error("Trajectory too short: {0} elements")]
    TooShort(usize),

    #[error("Invalid joint mapping: {0}")]
    InvalidMapping(String),

    #[error("Unknown joint name: {0}")]
    UnknownJoint(String),

    /// 指令不适用于当前操作
    #[error("Instruction {0} is not valid for this operation")]
    InvalidInstruction(Instruction),

    #[error("No waypoint to remove")]
    NoWaypoints,

    #[error("Joint mapping not set")]
    Uninitialized,

    /// 某个关节没有测量值
    #[error("No measured reference for joint slot {0}")]
    NoReference(usize),

    /// 轨迹首帧与测量值不连续
    #[error("Trajectory does not start at measured state: {joints:?}")]
    Discontinuous { joints: Vec<String> },

    #[error("Trajectory violates {0} joint limits")]
    LimitsViolated(usize),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Interpolation error: {0}")]
    Interp(#[from] InterpError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::ArrayMismatch { .. }
            | ControlError::TooShort(_)
            | ControlError::Discontinuous { .. }
            | ControlError::LimitsViolated(_) => ErrorKind::ArrayMismatch,
            ControlError::InvalidMapping(_)
            | ControlError::UnknownJoint(_)
            | ControlError::InvalidInstruction(_)
            | ControlError::NoWaypoints => ErrorKind::IndexOutOfBounds,
            ControlError::Uninitialized | ControlError::NoReference(_) => {
                ErrorKind::Uninitialized
            },
            ControlError::Transfer(e) => e.kind(),
            ControlError::Interp(e) => e.kind(),
            ControlError::Protocol(e) => e.kind(),
            ControlError::Interface(_) => ErrorKind::AchError,
            ControlError::Channel(ChannelError::Timeout) => ErrorKind::Timeout,
            ControlError::Channel(_) => ErrorKind::AchError,
        }
    }
}

/// 子系统使用的三个命名通道
pub struct Channels<C> {
    pub trajectory: C,
    pub feedback: C,
    pub instruction: C,
}

impl Channels<MemoryChannel> {
    /// 在进程内总线上打开标准名称的三个通道
    pub fn open(bus: &MemoryBus) -> Self {
        Self {
            trajectory: bus.open(TRAJECTORY_CHANNEL),
            feedback: bus.open(FEEDBACK_CHANNEL),
            instruction: bus.open(INSTRUCTION_CHANNEL),
        }
    }
}

impl<C: BroadcastChannel> Channels<C> {
    /// 丢弃三个通道上的所有未读帧
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        self.trajectory.flush()?;
        self.feedback.flush()?;
        self.instruction.flush()
    }
}
