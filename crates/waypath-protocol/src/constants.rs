//! 协议常量定义
//!
//! 发送端和接收端必须使用同一组常量，否则线上布局不兼容。

/// 单条轨迹可以携带的最大关节数（= 位图宽度）
pub const MAX_JOINT_COUNT: usize = 64;

/// 每个 Chunk 最多携带的 PathElement 数量
pub const CHUNK_CAPACITY: usize = 100;

/// Chunk 头部标签（16 字节，不足部分补 0）
pub const CHUNK_HEADER: [u8; 16] = *b"waypath-chunk-v1";

/// 发送端取消传输时使用的 chunk_id 哨兵值
pub const CANCEL_CHUNK_ID: i32 = -2;

/// 接收端尚未接受任何 chunk 时的 chunk_id
pub const NO_CHUNK_ID: i32 = -1;

/// 描述文件未给出控制频率时使用的默认频率（Hz）
pub const DEFAULT_FREQUENCY: f64 = 200.0;

/// 限位检查使用的数值容差
pub const LIMIT_EPSILON: f64 = 1e-6;

/// 时间最优插值的默认拐角容差（弧度）
pub const DEFAULT_CORNER_TOLERANCE: f64 = 0.01;

/// 轨迹数据通道名称
pub const TRAJECTORY_CHANNEL: &str = "waypath-trajectory";

/// 接收端反馈通道名称
pub const FEEDBACK_CHANNEL: &str = "waypath-feedback";

/// 播放指令通道名称
pub const INSTRUCTION_CHANNEL: &str = "waypath-instruction";
