//! # Waypath Transfer
//!
//! 在两个广播通道（轨迹数据 + 反馈）上分块传输轨迹的停等协议。
//!
//! ## 握手流程
//!
//! ```text
//! Sender                                  Receiver
//!   |                                        | 清空输出轨迹
//!   |  <---------- Feedback{READ_READY, -1} --|
//!   | -- Chunk{id=0, total=N} -------------> |
//!   |  <---------- Feedback{LISTENING, 0} ---|
//!   |                 ...                    |
//!   | -- Chunk{id=N-1, total=N} -----------> |
//!   |  <---------- Feedback{FINISHED, N-1} --|
//! ```
//!
//! 任一时刻最多只有一个未确认的 chunk。任何协议错误都会中止整个传输，
//! 调用方需要从头重新发送。
//!
//! 接收方反馈中的 `chunk_id` 永远是它最后一个真正接受的 chunk（还没有
//! 接受任何 chunk 时为 -1）。

mod receiver;
mod sender;

pub use receiver::receive_trajectory;
pub use sender::{cancel_transfer, send_trajectory};

use std::time::Duration;
use thiserror::Error;
use waypath_channel::ChannelError;
use waypath_protocol::{CHUNK_CAPACITY, ErrorKind, FeedbackState, ProtocolError};

/// 传输层错误类型
#[derive(Error, Debug)]
pub enum TransferError {
    /// 在时限内没有收到 chunk / feedback
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// 对端确认的 chunk_id 与期望不符
    #[error("Chunk id mismatch: expected {expected}, received {received}")]
    SynchError { expected: i32, received: i32 },

    /// 在最后一个 chunk 之前收到 FINISHED
    #[error("Receiver finished after chunk {chunk_id} of {total_chunks}")]
    EarlyFinish { chunk_id: i32, total_chunks: u32 },

    /// 接收方报告了非监听状态
    #[error("Receiver reported {0}")]
    Interrupted(FeedbackState),

    /// 发送方取消了传输
    #[error("Transfer canceled by sender")]
    Canceled,

    /// 接收方始终没有就绪
    #[error("Receiver not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    /// 记录无法解析
    #[error("Malformed record: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Timeout(_) | TransferError::NotReady { .. } => ErrorKind::Timeout,
            TransferError::SynchError { .. }
            | TransferError::EarlyFinish { .. }
            | TransferError::Malformed(_) => ErrorKind::SynchError,
            TransferError::Interrupted(_) | TransferError::Canceled => ErrorKind::Interrupted,
            TransferError::Channel(ChannelError::Timeout) => ErrorKind::Timeout,
            TransferError::Channel(_) => ErrorKind::AchError,
        }
    }
}

/// 传输配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// 每个 chunk / feedback 的最长等待时间
    pub max_wait: Duration,
    /// 等待 READ_READY 的轮询次数
    pub ready_attempts: u32,
    /// 就绪轮询间隔
    pub ready_poll: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::with_max_wait_secs(5)
    }
}

impl TransferConfig {
    /// 按秒设置等待时间；就绪轮询每秒一次，次数等于秒数
    pub fn with_max_wait_secs(secs: u64) -> Self {
        Self {
            max_wait: Duration::from_secs(secs),
            ready_attempts: secs.clamp(1, u32::MAX as u64) as u32,
            ready_poll: Duration::from_secs(1),
        }
    }
}

/// N 个元素需要的 chunk 数（空轨迹也占一个 chunk）
pub fn chunk_count(elements: usize) -> usize {
    elements.div_ceil(CHUNK_CAPACITY).max(1)
}
