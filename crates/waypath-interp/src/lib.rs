//! # Waypath Interpolation
//!
//! 把稀疏的关节空间路径点转换为按控制频率锁定的稠密采样。
//!
//! - `spline`: 逐段三次缓入缓出插值，每段时长由名义速度 / 加速度决定
//! - `optimal`: 带圆弧过渡的时间最优路径参数化
//!
//! 两种算法都只使用活动关节的 `nominal_speed` / `nominal_accel`（按位图顺序）。
//! 插值成功后轨迹的模式被置为 `Raw`，再次插值是空操作。
//!
//! # 示例
//!
//! ```rust,no_run
//! use waypath_interp::Interpolate;
//! use waypath_protocol::{RobotDescription, Trajectory};
//!
//! # fn run(mut trajectory: Trajectory, description: RobotDescription) {
//! trajectory.interpolate(&description).expect("interpolation failed");
//! assert!(trajectory.check_limits(&description));
//! # }
//! ```

pub mod optimal;
pub mod spline;

use thiserror::Error;
use tracing::{debug, info};
use waypath_protocol::{
    DEFAULT_CORNER_TOLERANCE, ErrorKind, InterpMode, PathElement, ProtocolError,
    RobotDescription, Trajectory,
};

pub use optimal::{BlendedPath, TimeOptimalTrajectory};
pub use spline::{DominantBound, SegmentTiming};

/// 插值错误类型
#[derive(Error, Debug)]
pub enum InterpError {
    /// 速度或加速度上限无效（≤0 或非有限值）
    #[error("Invalid bounds for joint slot {slot}: speed {speed}, accel {accel}")]
    InvalidBounds { slot: usize, speed: f64, accel: f64 },

    #[error("No limits available for joint slot {0}")]
    MissingLimits(usize),

    #[error("Invalid frequency: {0}")]
    InvalidFrequency(f64),

    #[error("Interpolation mode {0} is not implemented")]
    Unsupported(&'static str),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl InterpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InterpError::InvalidBounds { .. } | InterpError::Dimension { .. } => {
                ErrorKind::ArrayMismatch
            },
            InterpError::InvalidFrequency(_) => ErrorKind::ArrayMismatch,
            InterpError::MissingLimits(_) => ErrorKind::Uninitialized,
            InterpError::Unsupported(_) => ErrorKind::IndexOutOfBounds,
            InterpError::Protocol(e) => e.kind(),
        }
    }
}

/// 活动关节的名义速度 / 加速度上限（按位图顺序）
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub speed: Vec<f64>,
    pub accel: Vec<f64>,
}

impl Bounds {
    /// 从轨迹参数（自定义限位优先）和描述中收集活动关节的名义上限
    pub fn for_trajectory(
        trajectory: &Trajectory,
        description: &RobotDescription,
    ) -> Result<Self, InterpError> {
        let params = trajectory.params();
        let mut speed = Vec::with_capacity(params.bitmap().count());
        let mut accel = Vec::with_capacity(params.bitmap().count());

        for slot in params.bitmap().iter() {
            let limits = params
                .effective_limits(slot, description)
                .ok_or(InterpError::MissingLimits(slot))?;
            let (v, a) = (limits.nominal_speed, limits.nominal_accel);
            if !(v.is_finite() && v > 0.0 && a.is_finite() && a > 0.0) {
                return Err(InterpError::InvalidBounds {
                    slot,
                    speed: v,
                    accel: a,
                });
            }
            speed.push(v);
            accel.push(a);
        }

        Ok(Self { speed, accel })
    }

    pub fn len(&self) -> usize {
        self.speed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed.is_empty()
    }
}

/// 对轨迹做原地插值
pub trait Interpolate {
    fn interpolate(&mut self, description: &RobotDescription) -> Result<(), InterpError>;
}

impl Interpolate for Trajectory {
    fn interpolate(&mut self, description: &RobotDescription) -> Result<(), InterpError> {
        let mode = self.interp_mode();
        if self.len() < 2 || mode == InterpMode::Raw {
            debug!(
                elements = self.len(),
                mode = mode.as_str(),
                "Nothing to interpolate"
            );
            return Ok(());
        }

        let frequency = self.params().effective_frequency(description);
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(InterpError::InvalidFrequency(frequency));
        }
        let bounds = Bounds::for_trajectory(self, description)?;

        let dense: Vec<PathElement> = match mode {
            InterpMode::Spline => spline::densify(self.elements(), &bounds, frequency)?,
            InterpMode::Optimal => {
                let tolerance = if self.params().tolerance > 0.0 {
                    self.params().tolerance
                } else {
                    DEFAULT_CORNER_TOLERANCE
                };
                optimal::densify(self.elements(), &bounds, frequency, tolerance)?
            },
            InterpMode::Densify => return Err(InterpError::Unsupported(mode.as_str())),
            InterpMode::Raw => return Ok(()),
        };

        info!(
            mode = mode.as_str(),
            waypoints = self.len(),
            samples = dense.len(),
            frequency,
            "Trajectory interpolated"
        );

        self.replace_elements(dense)?;
        self.set_frequency(frequency);
        self.set_interp_mode(InterpMode::Raw);
        Ok(())
    }
}
