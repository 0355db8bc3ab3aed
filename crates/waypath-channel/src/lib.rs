//! # Waypath Channel Layer
//!
//! 广播通道抽象层：每个通道有一个稳定的名称，发布方只管"发布最新"，
//! 订阅方各自维护读游标，可以阻塞等待下一帧或只取最新一帧。
//!
//! 通道是有界的环形缓冲：订阅方读得太慢时旧帧会被覆盖，`get` 会通过
//! `Received::missed` 报告丢了多少帧，而不是报错。

use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;

pub mod memory;

pub use memory::{ChannelConfig, MemoryBus, MemoryChannel};

/// 通道层统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Read timeout")]
    Timeout,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Channel {0} closed")]
    Closed(String),
}

/// 读取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetMode {
    /// 下一帧未读数据（按发布顺序）
    Next,
    /// 只取最新的未读帧，跳过中间帧
    Latest,
}

/// 等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// 不阻塞，没有数据立即返回 `Timeout`
    Poll,
    /// 相对时限
    For(Duration),
    /// 绝对时限
    Until(Instant),
}

impl Wait {
    pub fn seconds(secs: u64) -> Self {
        Wait::For(Duration::from_secs(secs))
    }

    /// 转换为绝对截止时间（`Poll` 返回 None）
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Wait::Poll => None,
            Wait::For(d) => Some(Instant::now() + d),
            Wait::Until(t) => Some(t),
        }
    }
}

/// 一次成功读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub frame: Bytes,
    /// 被覆盖或跳过的帧数
    pub missed: u64,
}

pub trait BroadcastChannel {
    /// 通道名称
    fn name(&self) -> &str;

    /// 发布一帧
    fn publish(&mut self, frame: &[u8]) -> Result<(), ChannelError>;

    /// 读取一帧，按 `wait` 阻塞
    fn get(&mut self, wait: Wait, mode: GetMode) -> Result<Received, ChannelError>;

    /// 丢弃所有未读帧
    fn flush(&mut self) -> Result<(), ChannelError>;

    /// 非阻塞读取最新帧
    fn try_latest(&mut self) -> Result<Option<Received>, ChannelError> {
        match self.get(Wait::Poll, GetMode::Latest) {
            Ok(received) => Ok(Some(received)),
            Err(ChannelError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<C: BroadcastChannel + ?Sized> BroadcastChannel for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn publish(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        (**self).publish(frame)
    }

    fn get(&mut self, wait: Wait, mode: GetMode) -> Result<Received, ChannelError> {
        (**self).get(wait, mode)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        (**self).flush()
    }
}
