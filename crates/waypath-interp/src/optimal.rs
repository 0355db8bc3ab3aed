//! 时间最优插值
//!
//! 分两步完成：
//!
//! 1. `BlendedPath`：把路径点连成折线，在每个内部拐角处用圆弧过渡，
//!    圆弧离拐角的最大偏差不超过 `max_deviation`。无法过渡的拐角
//!    （原路折返）记录为停止点。
//! 2. `TimeOptimalTrajectory`：在弧长网格上计算速度上限曲线
//!    （速度约束 + 加速度约束），先正向以最大加速度积分，再反向以
//!    最大减速度积分，两者取小即为路径速度曲线，最后积分出时间轴。
//!
//! 关节约束在路径坐标下的形式：
//!
//! ```text
//! |q'_j(s) · ṡ|                  ≤ v_j
//! |q'_j(s) · s̈ + q''_j(s) · ṡ²|  ≤ a_j
//! ```

use crate::{Bounds, InterpError};
use nalgebra::DVector;
use tracing::debug;
use waypath_protocol::PathElement;

/// 弧长网格步长
const PATH_RESOLUTION: f64 = 1e-3;
/// 网格区间数上限
const MAX_GRID_INTERVALS: usize = 100_000;
const MIN_SEGMENT_LENGTH: f64 = 1e-9;
const MIN_CORNER_ANGLE: f64 = 1e-6;
const BISECTION_STEPS: usize = 60;
const EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
enum Shape {
    Linear {
        start: DVector<f64>,
        direction: DVector<f64>,
    },
    Circular {
        center: DVector<f64>,
        radius: f64,
        x: DVector<f64>,
        y: DVector<f64>,
    },
}

#[derive(Debug, Clone)]
struct Segment {
    shape: Shape,
    /// 段起点在整条路径上的弧长
    start: f64,
    length: f64,
    /// 所属的输入路径段
    source: usize,
}

impl Segment {
    fn position(&self, s: f64) -> DVector<f64> {
        match &self.shape {
            Shape::Linear { start, direction } => start + direction * s,
            Shape::Circular {
                center,
                radius,
                x,
                y,
            } => {
                let phi = s / radius;
                center + (x * phi.cos() + y * phi.sin()) * *radius
            },
        }
    }

    fn tangent(&self, s: f64) -> DVector<f64> {
        match &self.shape {
            Shape::Linear { direction, .. } => direction.clone(),
            Shape::Circular { radius, x, y, .. } => {
                let phi = s / radius;
                y * phi.cos() - x * phi.sin()
            },
        }
    }

    fn curvature(&self, s: f64) -> DVector<f64> {
        match &self.shape {
            Shape::Linear { direction, .. } => DVector::zeros(direction.len()),
            Shape::Circular {
                radius, x, y, ..
            } => {
                let phi = s / radius;
                -(x * phi.cos() + y * phi.sin()) / *radius
            },
        }
    }
}

/// 拐角处理结果
enum Corner {
    /// 共线，无需处理
    Straight,
    /// 折返或没有空间过渡，必须在拐角处停下
    Sharp,
    Blend {
        distance: f64,
        radius: f64,
        angle: f64,
        center: DVector<f64>,
        x: DVector<f64>,
        y2: DVector<f64>,
    },
}

fn corner(
    prev: &DVector<f64>,
    point: &DVector<f64>,
    next: &DVector<f64>,
    max_deviation: f64,
) -> Corner {
    let incoming = point - prev;
    let outgoing = next - point;
    let y1 = incoming.normalize();
    let y2 = outgoing.normalize();

    let angle = y1.dot(&y2).clamp(-1.0, 1.0).acos();
    if angle < MIN_CORNER_ANGLE {
        return Corner::Straight;
    }
    if angle > std::f64::consts::PI - MIN_CORNER_ANGLE {
        return Corner::Sharp;
    }

    let half = angle / 2.0;
    let distance = (incoming.norm() / 2.0)
        .min(outgoing.norm() / 2.0)
        .min(max_deviation * half.sin() / (1.0 - half.cos()));
    if distance < MIN_SEGMENT_LENGTH {
        return Corner::Sharp;
    }

    let radius = distance / half.tan();
    let center = point + (&y2 - &y1).normalize() * (radius / half.cos());
    let x = (point - &y1 * distance - &center).normalize();

    Corner::Blend {
        distance,
        radius,
        angle,
        center,
        x,
        y2,
    }
}

/// 带圆弧过渡的折线路径（按弧长参数化）
#[derive(Debug, Clone)]
pub struct BlendedPath {
    segments: Vec<Segment>,
    length: f64,
    dimension: usize,
    /// 必须停下的拐角（弧长）
    stops: Vec<f64>,
}

impl BlendedPath {
    pub fn new(waypoints: &[DVector<f64>], max_deviation: f64) -> Result<Self, InterpError> {
        let dimension = waypoints.first().map_or(0, |w| w.len());
        if let Some(bad) = waypoints.iter().find(|w| w.len() != dimension) {
            return Err(InterpError::Dimension {
                expected: dimension,
                actual: bad.len(),
            });
        }

        // 合并重复点，保留原始下标
        let mut points: Vec<(usize, &DVector<f64>)> = Vec::with_capacity(waypoints.len());
        for (index, waypoint) in waypoints.iter().enumerate() {
            match points.last() {
                Some((_, last)) if (waypoint - *last).norm() < MIN_SEGMENT_LENGTH => {},
                _ => points.push((index, waypoint)),
            }
        }

        let mut path = Self {
            segments: Vec::new(),
            length: 0.0,
            dimension,
            stops: Vec::new(),
        };
        let Some(&(_, first)) = points.first() else {
            return Ok(path);
        };

        let mut cursor = first.clone();
        for k in 1..points.len() {
            let (index, point) = points[k];
            let source = index - 1;
            let prev = points[k - 1].1;

            let shape = match points.get(k + 1) {
                Some(&(_, next)) => corner(prev, point, next, max_deviation),
                None => Corner::Straight,
            };

            match shape {
                Corner::Blend {
                    distance,
                    radius,
                    angle,
                    center,
                    x,
                    y2,
                } => {
                    let y1 = (point - prev).normalize();
                    let line_end = point - &y1 * distance;
                    path.push_linear(&cursor, &line_end, source);
                    path.push_segment(
                        Shape::Circular {
                            center,
                            radius,
                            x,
                            y: y1,
                        },
                        radius * angle,
                        source,
                    );
                    cursor = point + &y2 * distance;
                },
                Corner::Sharp => {
                    path.push_linear(&cursor, point, source);
                    path.stops.push(path.length);
                    cursor = point.clone();
                },
                Corner::Straight => {
                    path.push_linear(&cursor, point, source);
                    cursor = point.clone();
                },
            }
        }

        debug!(
            waypoints = waypoints.len(),
            segments = path.segments.len(),
            stops = path.stops.len(),
            length = path.length,
            "Blended path constructed"
        );
        Ok(path)
    }

    fn push_linear(&mut self, from: &DVector<f64>, to: &DVector<f64>, source: usize) {
        let delta = to - from;
        let length = delta.norm();
        if length < MIN_SEGMENT_LENGTH {
            return;
        }
        self.push_segment(
            Shape::Linear {
                start: from.clone(),
                direction: delta / length,
            },
            length,
            source,
        );
    }

    fn push_segment(&mut self, shape: Shape, length: f64, source: usize) {
        self.segments.push(Segment {
            shape,
            start: self.length,
            length,
            source,
        });
        self.length += length;
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn locate(&self, s: f64) -> Option<(&Segment, f64)> {
        let index = self
            .segments
            .partition_point(|seg| seg.start <= s)
            .saturating_sub(1);
        let segment = self.segments.get(index)?;
        Some((segment, (s - segment.start).clamp(0.0, segment.length)))
    }

    pub fn position(&self, s: f64) -> DVector<f64> {
        match self.locate(s) {
            Some((segment, local)) => segment.position(local),
            None => DVector::zeros(self.dimension),
        }
    }

    pub fn tangent(&self, s: f64) -> DVector<f64> {
        match self.locate(s) {
            Some((segment, local)) => segment.tangent(local),
            None => DVector::zeros(self.dimension),
        }
    }

    pub fn curvature(&self, s: f64) -> DVector<f64> {
        match self.locate(s) {
            Some((segment, local)) => segment.curvature(local),
            None => DVector::zeros(self.dimension),
        }
    }

    /// 弧长位置所属的输入路径段
    pub fn segment_index(&self, s: f64) -> usize {
        self.locate(s).map_or(0, |(segment, _)| segment.source)
    }
}

/// 给定 ṡ² 时 s̈ 的可行区间；不可行时下界大于上界
fn acceleration_range(
    tangent: &DVector<f64>,
    curvature: &DVector<f64>,
    sdot_sq: f64,
    max_accel: &[f64],
) -> (f64, f64) {
    let mut lower = f64::NEG_INFINITY;
    let mut upper = f64::INFINITY;
    for j in 0..tangent.len() {
        let offset = curvature[j] * sdot_sq;
        if tangent[j].abs() > EPS {
            let a = (-max_accel[j] - offset) / tangent[j];
            let b = (max_accel[j] - offset) / tangent[j];
            lower = lower.max(a.min(b));
            upper = upper.min(a.max(b));
        } else if offset.abs() > max_accel[j] {
            return (f64::INFINITY, f64::NEG_INFINITY);
        }
    }
    (lower, upper)
}

/// 网格点上的 ṡ 上限
fn velocity_limit(
    tangent: &DVector<f64>,
    curvature: &DVector<f64>,
    max_velocity: &[f64],
    max_accel: &[f64],
) -> f64 {
    let mut limit = f64::INFINITY;
    for j in 0..tangent.len() {
        if tangent[j].abs() > EPS {
            limit = limit.min(max_velocity[j] / tangent[j].abs());
        }
    }

    if curvature.iter().all(|c| c.abs() <= EPS) {
        return limit;
    }

    let feasible = |sdot_sq: f64| {
        let (lower, upper) = acceleration_range(tangent, curvature, sdot_sq, max_accel);
        lower <= upper
    };

    let mut high = if limit.is_finite() { limit * limit } else { 1.0 };
    if !limit.is_finite() {
        while feasible(high) && high < 1e12 {
            high *= 2.0;
        }
    }
    if feasible(high) {
        return limit;
    }

    let mut low = 0.0;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (low + high);
        if feasible(mid) {
            low = mid;
        } else {
            high = mid;
        }
    }
    limit.min(low.sqrt())
}

/// 沿 `BlendedPath` 的时间最优参数化
#[derive(Debug, Clone)]
pub struct TimeOptimalTrajectory {
    path: BlendedPath,
    /// 网格：弧长 / 路径速度 / 时间
    s: Vec<f64>,
    sdot: Vec<f64>,
    t: Vec<f64>,
}

impl TimeOptimalTrajectory {
    pub fn new(
        path: BlendedPath,
        max_velocity: &[f64],
        max_accel: &[f64],
    ) -> Result<Self, InterpError> {
        for bounds in [max_velocity, max_accel] {
            if bounds.len() != path.dimension() {
                return Err(InterpError::Dimension {
                    expected: path.dimension(),
                    actual: bounds.len(),
                });
            }
        }
        for (j, (&v, &a)) in max_velocity.iter().zip(max_accel).enumerate() {
            if !(v.is_finite() && v > 0.0 && a.is_finite() && a > 0.0) {
                return Err(InterpError::InvalidBounds {
                    slot: j,
                    speed: v,
                    accel: a,
                });
            }
        }

        let length = path.length();
        if length < MIN_SEGMENT_LENGTH {
            return Ok(Self {
                path,
                s: vec![0.0],
                sdot: vec![0.0],
                t: vec![0.0],
            });
        }

        let intervals = ((length / PATH_RESOLUTION).ceil() as usize).clamp(1, MAX_GRID_INTERVALS);
        let ds = length / intervals as f64;
        let mut s: Vec<f64> = (0..=intervals).map(|k| k as f64 * ds).collect();
        s[intervals] = length;

        let tangents: Vec<DVector<f64>> = s.iter().map(|&x| path.tangent(x)).collect();
        let curvatures: Vec<DVector<f64>> = s.iter().map(|&x| path.curvature(x)).collect();

        let mut limit: Vec<f64> = (0..=intervals)
            .map(|k| velocity_limit(&tangents[k], &curvatures[k], max_velocity, max_accel))
            .collect();
        limit[0] = 0.0;
        limit[intervals] = 0.0;
        for &stop in &path.stops {
            let k = ((stop / ds).round() as usize).min(intervals);
            limit[k] = 0.0;
        }

        // 正向：最大加速
        let mut sdot = vec![0.0; intervals + 1];
        for k in 0..intervals {
            let v_sq = sdot[k] * sdot[k];
            let (lower, upper) = acceleration_range(&tangents[k], &curvatures[k], v_sq, max_accel);
            let accel = if lower <= upper { upper } else { 0.0 };
            sdot[k + 1] = (v_sq + 2.0 * accel * ds).max(0.0).sqrt().min(limit[k + 1]);
        }

        // 反向：最大减速
        for k in (1..=intervals).rev() {
            let v_sq = sdot[k] * sdot[k];
            let (lower, upper) = acceleration_range(&tangents[k], &curvatures[k], v_sq, max_accel);
            let decel = lower.min(upper);
            let reachable = (v_sq - 2.0 * decel * ds).max(0.0).sqrt();
            sdot[k - 1] = sdot[k - 1].min(reachable);
        }

        let min_accel = max_accel.iter().copied().fold(f64::INFINITY, f64::min);
        let mut t = vec![0.0; intervals + 1];
        for k in 0..intervals {
            let mean = 0.5 * (sdot[k] + sdot[k + 1]);
            let dt = if mean > 1e-9 {
                ds / mean
            } else {
                (2.0 * ds / min_accel).sqrt()
            };
            t[k + 1] = t[k] + dt;
        }

        debug!(
            length,
            intervals,
            duration = t[intervals],
            "Time-optimal parameterization complete"
        );

        Ok(Self { path, s, sdot, t })
    }

    pub fn duration(&self) -> f64 {
        self.t.last().copied().unwrap_or(0.0)
    }

    pub fn path(&self) -> &BlendedPath {
        &self.path
    }

    /// 时间 → 弧长（区间内按匀加速处理）
    fn path_position(&self, time: f64) -> f64 {
        let last = self.t.len() - 1;
        if time <= 0.0 || last == 0 {
            return 0.0;
        }
        if time >= self.t[last] {
            return self.s[last];
        }

        let k = self
            .t
            .partition_point(|&x| x <= time)
            .saturating_sub(1)
            .min(last - 1);
        let dt = self.t[k + 1] - self.t[k];
        if dt <= 0.0 {
            return self.s[k];
        }
        let tau = time - self.t[k];
        let accel = (self.sdot[k + 1] - self.sdot[k]) / dt;
        let s = self.s[k] + self.sdot[k] * tau + 0.5 * accel * tau * tau;
        s.clamp(self.s[k], self.s[k + 1])
    }

    pub fn position(&self, time: f64) -> DVector<f64> {
        self.path.position(self.path_position(time))
    }

    pub fn segment_index(&self, time: f64) -> usize {
        self.path.segment_index(self.path_position(time))
    }
}

/// 对整条路径点序列做时间最优插值
///
/// 第一个和最后一个采样严格等于输入的首尾路径点。
pub fn densify(
    elements: &[PathElement],
    bounds: &Bounds,
    frequency: f64,
    max_deviation: f64,
) -> Result<Vec<PathElement>, InterpError> {
    let (Some(first), Some(last)) = (elements.first(), elements.last()) else {
        return Ok(Vec::new());
    };

    let waypoints: Vec<DVector<f64>> = elements
        .iter()
        .map(|e| DVector::from_column_slice(&e.values))
        .collect();
    let path = BlendedPath::new(&waypoints, max_deviation)?;
    let trajectory = TimeOptimalTrajectory::new(path, &bounds.speed, &bounds.accel)?;

    let duration = trajectory.duration();
    let ticks = (duration * frequency).ceil() as usize;
    debug!(duration, ticks, max_deviation, "Sampling time-optimal trajectory");

    let mut dense = Vec::with_capacity(ticks + 1);
    dense.push(PathElement::new(first.values.clone(), 0));
    for tick in 1..ticks {
        let time = tick as f64 / frequency;
        let values = trajectory.position(time).iter().copied().collect();
        dense.push(PathElement::new(values, trajectory.segment_index(time) as u64));
    }
    let final_segment = elements.len().saturating_sub(2) as u64;
    dense.push(PathElement::new(last.values.clone(), final_segment));

    Ok(dense)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn points(rows: &[&[f64]]) -> Vec<DVector<f64>> {
        rows.iter().map(|r| DVector::from_column_slice(r)).collect()
    }

    fn elements(rows: &[&[f64]]) -> Vec<PathElement> {
        rows.iter()
            .enumerate()
            .map(|(i, r)| PathElement::new(r.to_vec(), i as u64))
            .collect()
    }

    fn bounds(speed: f64, accel: f64, joints: usize) -> Bounds {
        Bounds {
            speed: vec![speed; joints],
            accel: vec![accel; joints],
        }
    }

    #[test]
    fn test_short_line_is_triangular_profile() {
        // L=1, a=0.8：达不到 v=1，T = 2·sqrt(L/a)
        let path = BlendedPath::new(&points(&[&[0.0], &[1.0]]), 0.01).unwrap();
        let traj = TimeOptimalTrajectory::new(path, &[1.0], &[0.8]).unwrap();
        let expected = 2.0 * (1.0f64 / 0.8).sqrt();
        assert!((traj.duration() - expected).abs() < 1e-2, "{}", traj.duration());
    }

    #[test]
    fn test_long_line_is_trapezoidal_profile() {
        // L=6, v=1, a=0.8：加减速各 1.25s / 0.625，匀速 4.75
        let path = BlendedPath::new(&points(&[&[0.0], &[6.0]]), 0.01).unwrap();
        let traj = TimeOptimalTrajectory::new(path, &[1.0], &[0.8]).unwrap();
        assert!((traj.duration() - 7.25).abs() < 1e-2, "{}", traj.duration());
        assert!((traj.position(traj.duration() / 2.0)[0] - 3.0).abs() < 1e-2);
    }

    #[test]
    fn test_blend_stays_within_deviation() {
        let corner = DVector::from_column_slice(&[1.0, 0.0]);
        let path = BlendedPath::new(&points(&[&[0.0, 0.0], &[1.0, 0.0], &[1.0, 1.0]]), 0.01)
            .unwrap();
        // 两段直线加一段圆弧
        assert_eq!(path.segments.len(), 3);
        assert!(path.stops.is_empty());
        assert!(path.length() < 2.0);

        let closest = (0..=1000)
            .map(|k| path.length() * k as f64 / 1000.0)
            .map(|s| (path.position(s) - &corner).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(closest > 0.009 && closest < 0.0105, "{closest}");
    }

    #[test]
    fn test_blend_is_tangent_continuous() {
        let path = BlendedPath::new(&points(&[&[0.0, 0.0], &[1.0, 0.0], &[1.0, 1.0]]), 0.05)
            .unwrap();
        let arc = &path.segments[1];
        let entry = path.tangent(arc.start);
        let exit = path.tangent(arc.start + arc.length - 1e-12);
        assert!((entry - DVector::from_column_slice(&[1.0, 0.0])).norm() < 1e-6);
        assert!((exit - DVector::from_column_slice(&[0.0, 1.0])).norm() < 1e-6);
        // 圆弧两端与直线端点连续
        let before = path.segments[0].position(path.segments[0].length);
        assert!((path.position(arc.start) - before).norm() < 1e-9);
    }

    #[test]
    fn test_reversal_stops_at_corner() {
        let input = elements(&[&[0.0], &[1.0], &[0.0]]);
        let dense = densify(&input, &bounds(1.0, 0.8, 1), 200.0, 0.01).unwrap();

        let peak = dense
            .iter()
            .map(|e| e.values[0])
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(peak <= 1.0 + 1e-9);
        assert!(peak > 0.99);
        // 两段三角速度曲线
        let duration = dense.len() as f64 / 200.0;
        assert!((duration - 4.0 * (1.0f64 / 0.8).sqrt()).abs() < 0.05, "{duration}");
    }

    #[test]
    fn test_densify_endpoints_and_phases() {
        let input = elements(&[&[0.0, 0.0], &[0.5, 0.1], &[0.5, 0.6], &[0.2, 0.6]]);
        let dense = densify(&input, &bounds(1.0, 0.8, 2), 100.0, 0.01).unwrap();

        assert_eq!(dense.first().unwrap().values, vec![0.0, 0.0]);
        assert_eq!(dense.first().unwrap().phase_index, 0);
        assert_eq!(dense.last().unwrap().values, vec![0.2, 0.6]);
        assert_eq!(dense.last().unwrap().phase_index, 2);
        for pair in dense.windows(2) {
            assert!(pair[1].phase_index >= pair[0].phase_index);
        }
        assert!(dense.iter().any(|e| e.phase_index == 1));
    }

    #[test]
    fn test_duplicate_waypoints_are_merged() {
        let input = elements(&[&[0.0], &[0.0], &[0.5]]);
        let dense = densify(&input, &bounds(1.0, 0.8, 1), 100.0, 0.01).unwrap();
        // 运动发生在第二段
        assert!(dense[1..].iter().all(|e| e.phase_index == 1));
        assert_eq!(dense.last().unwrap().values, vec![0.5]);
    }

    #[test]
    fn test_stationary_path() {
        let input = elements(&[&[0.3], &[0.3]]);
        let dense = densify(&input, &bounds(1.0, 0.8, 1), 100.0, 0.01).unwrap();
        assert_eq!(dense.len(), 2);
        assert!(dense.iter().all(|e| e.values == vec![0.3]));
    }

    #[test]
    fn test_invalid_bounds() {
        let path = BlendedPath::new(&points(&[&[0.0], &[1.0]]), 0.01).unwrap();
        let err = TimeOptimalTrajectory::new(path.clone(), &[f64::NAN], &[1.0]).unwrap_err();
        assert!(matches!(err, InterpError::InvalidBounds { slot: 0, .. }));
        let err = TimeOptimalTrajectory::new(path, &[1.0, 1.0], &[1.0]).unwrap_err();
        assert!(matches!(err, InterpError::Dimension { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_sampled_speed_respects_bound(
            start in -1.0f64..1.0,
            end in -1.0f64..1.0,
            speed in 0.2f64..2.0,
        ) {
            let input = elements(&[&[start], &[end]]);
            let frequency = 100.0;
            let dense = densify(&input, &bounds(speed, 1.0, 1), frequency, 0.01).unwrap();

            prop_assert_eq!(dense.first().unwrap().values[0], start);
            prop_assert_eq!(dense.last().unwrap().values[0], end);
            for pair in dense.windows(2) {
                let sampled = (pair[1].values[0] - pair[0].values[0]).abs() * frequency;
                prop_assert!(sampled <= speed * (1.0 + 1e-3) + 1e-9);
            }
        }
    }
}
