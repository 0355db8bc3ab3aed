//! # Waypath Protocol
//!
//! 轨迹子系统的数据模型与线上布局定义（无传输依赖）
//!
//! ## 模块
//!
//! - `constants`: 协议常量（最大关节数、chunk 容量、哨兵值）
//! - `limits`: 关节限位与机器人描述
//! - `trajectory`: 轨迹、路径点、位图与限位检查
//! - `wire`: Chunk / Feedback / Instruction 的二进制编解码
//!
//! ## 字节序
//!
//! 线上布局统一使用小端字节序，所有记录均为固定长度。

pub mod constants;
pub mod limits;
pub mod trajectory;
pub mod wire;

// 重新导出常用类型
pub use constants::*;
pub use limits::{JointInfo, JointLimits, RobotDescription};
pub use trajectory::{
    InterpMode, JointBitmap, LimitViolation, Params, PathElement, Trajectory, ViolationKind,
};
pub use wire::{Chunk, Feedback, FeedbackState, Instruction};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid record length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid chunk header tag")]
    InvalidHeader,

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: u64 },

    #[error("Joint slot {slot} out of range (max {max})")]
    JointOutOfRange { slot: usize, max: usize },

    #[error("Element width mismatch: bitmap has {expected} joints, element has {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("Bitmap already set and elements present")]
    BitmapLocked,

    #[error("Invalid robot description: {0}")]
    InvalidDescription(String),

    #[error("Description parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 子系统统一的错误类别
///
/// 各层错误枚举都通过 `kind()` 映射到这里，便于日志和跨进程上报。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 路径点长度不符或轨迹过短
    ArrayMismatch,
    /// 关节映射无效、指令不适用或从空列表删除
    IndexOutOfBounds,
    /// 在时限内未收到 chunk / feedback
    Timeout,
    /// chunk_id 不匹配或提前收到 Finished
    SynchError,
    /// 接收端报告非监听状态，或收到取消哨兵
    Interrupted,
    /// 传输层故障
    AchError,
    /// 映射或描述尚未加载
    Uninitialized,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ArrayMismatch => "ARRAY_MISMATCH",
            ErrorKind::IndexOutOfBounds => "INDEX_OUT_OF_BOUNDS",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::SynchError => "SYNCH_ERROR",
            ErrorKind::Interrupted => "INTERRUPTED",
            ErrorKind::AchError => "ACH_ERROR",
            ErrorKind::Uninitialized => "UNINITIALIZED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidLength { .. }
            | ProtocolError::InvalidHeader
            | ProtocolError::InvalidValue { .. } => ErrorKind::SynchError,
            ProtocolError::JointOutOfRange { .. } => ErrorKind::IndexOutOfBounds,
            ProtocolError::WidthMismatch { .. } | ProtocolError::BitmapLocked => {
                ErrorKind::ArrayMismatch
            },
            ProtocolError::InvalidDescription(_)
            | ProtocolError::Parse(_)
            | ProtocolError::Io(_) => ErrorKind::Uninitialized,
        }
    }
}
