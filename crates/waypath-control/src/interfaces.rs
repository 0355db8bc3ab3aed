//! 外部接口
//!
//! 关节描述、测量状态和关节命令都由外部协作者提供。

use thiserror::Error;

/// 外部接口错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceError {
    /// 无法刷新测量状态
    #[error("Joint state unavailable: {0}")]
    StateUnavailable(String),

    #[error("Joint slot {0} is not known to the command interface")]
    UnknownJoint(usize),

    /// 向未占有的关节下发命令
    #[error("Joint slot {0} is not claimed")]
    NotClaimed(usize),

    #[error("Command interface error: {0}")]
    Command(String),
}

/// 测量关节状态
pub trait JointStateSource {
    /// 按需刷新
    fn refresh(&mut self) -> Result<(), InterfaceError>;

    /// 关节的当前参考值（rad）
    fn reference(&self, slot: usize) -> Option<f64>;
}

/// 关节控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JointMode {
    /// 刚性位置控制
    #[default]
    Rigid,
    /// 柔顺
    Compliant,
    /// 断电
    Off,
}

/// 关节命令接口
///
/// `set_mode` / `set_position` 只是缓存，`flush()` 一次性下发。
pub trait CommandSink {
    /// 获取关节所有权
    fn claim(&mut self, slot: usize) -> Result<(), InterfaceError>;

    /// 释放关节所有权
    fn release(&mut self, slot: usize) -> Result<(), InterfaceError>;

    fn set_mode(&mut self, slot: usize, mode: JointMode) -> Result<(), InterfaceError>;

    fn set_position(&mut self, slot: usize, value: f64) -> Result<(), InterfaceError>;

    fn flush(&mut self) -> Result<(), InterfaceError>;
}

impl<T: JointStateSource + ?Sized> JointStateSource for Box<T> {
    fn refresh(&mut self) -> Result<(), InterfaceError> {
        (**self).refresh()
    }

    fn reference(&self, slot: usize) -> Option<f64> {
        (**self).reference(slot)
    }
}

impl<T: CommandSink + ?Sized> CommandSink for Box<T> {
    fn claim(&mut self, slot: usize) -> Result<(), InterfaceError> {
        (**self).claim(slot)
    }

    fn release(&mut self, slot: usize) -> Result<(), InterfaceError> {
        (**self).release(slot)
    }

    fn set_mode(&mut self, slot: usize, mode: JointMode) -> Result<(), InterfaceError> {
        (**self).set_mode(slot, mode)
    }

    fn set_position(&mut self, slot: usize, value: f64) -> Result<(), InterfaceError> {
        (**self).set_position(slot, value)
    }

    fn flush(&mut self) -> Result<(), InterfaceError> {
        (**self).flush()
    }
}
