//! Spline 插值 - 逐段缓入缓出
//!
//! 每一对相邻路径点之间使用三次 smoothstep 曲线：
//!
//! ```text
//! u(t) = t²(3 - 2t),  t ∈ [0, 1]
//! x(t) = last + u(t)·(next - last)
//! ```
//!
//! 该曲线的峰值速度为 `3Δx / 2T`，峰值加速度为 `6Δx / T²`，因此每个关节
//! 所需的最短时长为：
//!
//! ```text
//! T_vel   = 3·|Δx| / (2·v_max)
//! T_accel = sqrt(6·|Δx| / a_max)
//! T_j     = max(T_vel, T_accel)
//! ```
//!
//! 段时长取所有活动关节的最大值，采样数为 `ceil(T · frequency)`，段末
//! 采样严格等于下一个路径点。

use crate::{Bounds, InterpError};
use tracing::debug;
use waypath_protocol::PathElement;

/// 决定段时长的约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DominantBound {
    Velocity,
    Acceleration,
    /// 没有运动
    None,
}

impl DominantBound {
    pub fn as_str(self) -> &'static str {
        match self {
            DominantBound::Velocity => "velocity",
            DominantBound::Acceleration => "acceleration",
            DominantBound::None => "none",
        }
    }
}

/// 一段的时长信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    /// 段时长（秒）
    pub duration: f64,
    /// 采样数
    pub ticks: usize,
    pub dominant: DominantBound,
    /// 决定时长的关节（按位图顺序的下标）
    pub joint: Option<usize>,
}

/// smoothstep：`t²(3 - 2t)`
pub fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// 单个关节移动 `delta` 所需的最短时长及起决定作用的约束
pub fn min_duration(delta: f64, max_speed: f64, max_accel: f64) -> (f64, DominantBound) {
    let distance = delta.abs();
    if distance == 0.0 {
        return (0.0, DominantBound::None);
    }
    let t_vel = 3.0 * distance / (2.0 * max_speed);
    let t_accel = (6.0 * distance / max_accel).sqrt();
    if t_vel >= t_accel {
        (t_vel, DominantBound::Velocity)
    } else {
        (t_accel, DominantBound::Acceleration)
    }
}

/// 计算一段的时长：取所有关节的最大值
pub fn segment_timing(
    last: &[f64],
    next: &[f64],
    bounds: &Bounds,
    frequency: f64,
) -> Result<SegmentTiming, InterpError> {
    if last.len() != bounds.len() || next.len() != bounds.len() {
        return Err(InterpError::Dimension {
            expected: bounds.len(),
            actual: last.len().max(next.len()),
        });
    }

    let mut timing = SegmentTiming {
        duration: 0.0,
        ticks: 0,
        dominant: DominantBound::None,
        joint: None,
    };
    for j in 0..bounds.len() {
        let (t, dominant) = min_duration(next[j] - last[j], bounds.speed[j], bounds.accel[j]);
        if t > timing.duration {
            timing.duration = t;
            timing.dominant = dominant;
            timing.joint = Some(j);
        }
    }
    timing.ticks = (timing.duration * frequency).ceil() as usize;
    Ok(timing)
}

/// 对整条路径点序列做 spline 插值
///
/// 输出第一个元素等于输入第一个元素；每段产出 `ticks - 1` 个中间采样加
/// 一个精确的段末采样（无运动的段只产出段末采样）。`phase_index` 记录
/// 采样所属的输入段。
pub fn densify(
    elements: &[PathElement],
    bounds: &Bounds,
    frequency: f64,
) -> Result<Vec<PathElement>, InterpError> {
    let Some(first) = elements.first() else {
        return Ok(Vec::new());
    };

    let mut dense = vec![PathElement::new(first.values.clone(), 0)];
    for (segment, pair) in elements.windows(2).enumerate() {
        let (last, next) = (&pair[0].values, &pair[1].values);
        let timing = segment_timing(last, next, bounds, frequency)?;
        let phase = segment as u64;

        debug!(
            segment,
            duration = timing.duration,
            ticks = timing.ticks,
            bound = timing.dominant.as_str(),
            joint = ?timing.joint,
            "Spline segment timing"
        );

        for tick in 1..timing.ticks {
            let u = smoothstep(tick as f64 / timing.ticks as f64);
            let values = last
                .iter()
                .zip(next.iter())
                .map(|(a, b)| a + u * (b - a))
                .collect();
            dense.push(PathElement::new(values, phase));
        }
        dense.push(PathElement::new(next.clone(), phase));
    }

    Ok(dense)
}
