//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use waypath_sdk::prelude::*;
//! ```

// 数据模型
pub use waypath_protocol::{
    Instruction, InterpMode, JointBitmap, JointInfo, JointLimits, Params, PathElement,
    RobotDescription, Trajectory,
};

// 插值（trait 需要在作用域内才能调用 `interpolate()`）
pub use waypath_interp::Interpolate;

// 通道
pub use waypath_channel::{BroadcastChannel, MemoryBus, MemoryChannel};

// 控制
pub use waypath_control::{
    Channels, CommandSink, JointMode, JointStateSource, Operator, Player, PlayerConfig,
};
pub use waypath_transfer::TransferConfig;

// 错误类型
pub use waypath_channel::ChannelError;
pub use waypath_control::{ControlError, InterfaceError};
pub use waypath_interp::InterpError;
pub use waypath_protocol::{ErrorKind, ProtocolError};
pub use waypath_transfer::TransferError;
