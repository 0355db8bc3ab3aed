//! Waypath SDK - 人形机器人运动路径子系统
//!
//! 把稀疏路径点变成按控制频率采样的稠密轨迹，通过广播通道分块传给
//! 实时回放进程，并在每个控制周期逐帧下发关节位置命令。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 轨迹数据模型、限位检查、线上记录编解码
//! - **通道层** (`channel`): 广播通道抽象和进程内实现
//! - **插值层** (`interp`): 样条插值和时间最优插值
//! - **传输层** (`transfer`): 停等式分块传输
//! - **控制层** (`control`): Operator（生产者）和 Player（逐周期消费者）
//!
//! # 快速开始
//!
//! ```rust
//! use waypath_sdk::prelude::*;
//! ```

pub use waypath_channel as channel;
pub use waypath_control as control;
pub use waypath_interp as interp;
pub use waypath_protocol as protocol;
pub use waypath_transfer as transfer;

pub mod prelude;

// 常用类型
pub use waypath_channel::{BroadcastChannel, ChannelError, MemoryBus, MemoryChannel};
pub use waypath_control::{
    Channels, CommandSink, ControlError, InterfaceError, JointMode, JointStateSource, Operator,
    Player, PlayerConfig,
};
pub use waypath_interp::{InterpError, Interpolate};
pub use waypath_protocol::{
    ErrorKind, Instruction, InterpMode, JointLimits, PathElement, ProtocolError,
    RobotDescription, Trajectory,
};
pub use waypath_transfer::{TransferConfig, TransferError};

use std::sync::Once;

static LOGGER: Once = Once::new();

/// 初始化日志
///
/// 安装 `tracing-subscriber` 的 fmt 订阅者（`RUST_LOG` 覆盖默认的 `info`），
/// 并把 `log` 记录转发到 `tracing`。可以多次调用；全局订阅者已经被
/// 其他代码设置时静默跳过。
pub fn init_logger() {
    LOGGER.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return;
        }
        let _ = tracing_log::LogTracer::init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_is_idempotent() {
        init_logger();
        init_logger();
        tracing::info!("logger initialised twice");
    }
}
