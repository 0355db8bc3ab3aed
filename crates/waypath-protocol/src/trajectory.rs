//! 轨迹数据模型
//!
//! 线上格式是 64 槽位的定长数组加位图；内存中的 `PathElement` 只保存
//! 位图选中的关节，按位图顺序（槽位从小到大）排列。位图只在序列化时
//! 用于散布 / 收集数据。
//!
//! # 不变量
//!
//! - 位图在追加任何元素之前设置，之后不再改变
//! - 每个元素的宽度等于位图中置位的数量
//! - `phase_index` 单调不减

use crate::ProtocolError;
use crate::constants::{LIMIT_EPSILON, MAX_JOINT_COUNT};
use crate::limits::{JointLimits, RobotDescription};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// 关节活动位图（第 n 位对应槽位 n）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointBitmap(u64);

impl JointBitmap {
    pub const EMPTY: JointBitmap = JointBitmap(0);

    pub fn from_bits(bits: u64) -> Self {
        JointBitmap(bits)
    }

    /// 由槽位列表构建位图，重复或越界的槽位返回错误
    pub fn from_slots<I: IntoIterator<Item = usize>>(slots: I) -> Result<Self, ProtocolError> {
        let mut bits = 0u64;
        for slot in slots {
            if slot >= MAX_JOINT_COUNT {
                return Err(ProtocolError::JointOutOfRange {
                    slot,
                    max: MAX_JOINT_COUNT,
                });
            }
            bits |= 1u64 << slot;
        }
        Ok(JointBitmap(bits))
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, slot: usize) -> bool {
        slot < MAX_JOINT_COUNT && self.0 & (1u64 << slot) != 0
    }

    /// 活动关节数量
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// 按槽位从小到大遍历活动关节
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_JOINT_COUNT).filter(move |&slot| self.contains(slot))
    }

    /// 槽位在稠密元素中的下标
    pub fn rank(self, slot: usize) -> Option<usize> {
        if !self.contains(slot) {
            return None;
        }
        let below = if slot == 0 {
            0
        } else {
            self.0 & (u64::MAX >> (64 - slot))
        };
        Some(below.count_ones() as usize)
    }
}

/// 插值模式
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[serde(rename_all = "lowercase")]
pub enum InterpMode {
    /// 三次缓入缓出分段插值
    #[default]
    Spline = 0,
    /// 时间最优路径参数化
    Optimal = 1,
    /// 保留，未实现
    Densify = 2,
    /// 已是稠密采样，不再插值
    Raw = 3,
}

impl InterpMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InterpMode::Spline => "spline",
            InterpMode::Optimal => "optimal",
            InterpMode::Densify => "densify",
            InterpMode::Raw => "raw",
        }
    }
}

/// 轨迹参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// 采样频率（Hz），0 表示使用描述中的频率
    pub frequency: f64,
    pub interp: InterpMode,
    /// 位置容差（rad），也用作时间最优插值的拐角容差
    pub tolerance: f64,
    bitmap: JointBitmap,
    /// 按槽位索引的自定义限位（长度固定为 `MAX_JOINT_COUNT`）
    custom_limits: Option<Vec<JointLimits>>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            interp: InterpMode::Spline,
            tolerance: 0.0,
            bitmap: JointBitmap::EMPTY,
            custom_limits: None,
        }
    }
}

impl Params {
    pub fn new(frequency: f64, interp: InterpMode, tolerance: f64) -> Self {
        Self {
            frequency,
            interp,
            tolerance,
            ..Self::default()
        }
    }

    pub fn bitmap(&self) -> JointBitmap {
        self.bitmap
    }

    pub fn custom_limits(&self) -> Option<&[JointLimits]> {
        self.custom_limits.as_deref()
    }

    /// 设置自定义限位，未给出的槽位保持默认（全 0）
    pub fn set_custom_limits<I>(&mut self, limits: I) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = (usize, JointLimits)>,
    {
        let mut table = vec![JointLimits::default(); MAX_JOINT_COUNT];
        for (slot, limit) in limits {
            if slot >= MAX_JOINT_COUNT {
                return Err(ProtocolError::JointOutOfRange {
                    slot,
                    max: MAX_JOINT_COUNT,
                });
            }
            table[slot] = limit;
        }
        self.custom_limits = Some(table);
        Ok(())
    }

    pub fn clear_custom_limits(&mut self) {
        self.custom_limits = None;
    }

    pub(crate) fn set_custom_table(&mut self, table: Option<Vec<JointLimits>>) {
        self.custom_limits = table;
    }

    pub(crate) fn with_bitmap(mut self, bitmap: JointBitmap) -> Self {
        self.bitmap = bitmap;
        self
    }

    /// 有效采样频率
    pub fn effective_frequency(&self, description: &RobotDescription) -> f64 {
        if self.frequency > 0.0 {
            self.frequency
        } else {
            description.frequency()
        }
    }

    /// 有效限位：优先使用自定义限位
    pub fn effective_limits(
        &self,
        slot: usize,
        description: &RobotDescription,
    ) -> Option<JointLimits> {
        match &self.custom_limits {
            Some(table) => table.get(slot).copied(),
            None => description.limits(slot),
        }
    }
}

/// 轨迹中的一个采样点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathElement {
    /// 活动关节的参考值（按位图顺序）
    pub values: Vec<f64>,
    /// 该采样来自的输入路径段
    pub phase_index: u64,
}

impl PathElement {
    pub fn new(values: Vec<f64>, phase_index: u64) -> Self {
        Self {
            values,
            phase_index,
        }
    }
}

/// 限位违规类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    NotANumber,
    Position,
    Speed,
    Acceleration,
    /// 描述和自定义限位中都找不到该关节
    MissingLimits,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::NotANumber => "nan",
            ViolationKind::Position => "position",
            ViolationKind::Speed => "speed",
            ViolationKind::Acceleration => "acceleration",
            ViolationKind::MissingLimits => "missing-limits",
        }
    }
}

/// 一条限位违规记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub slot: usize,
    pub name: String,
    pub sample: usize,
    pub kind: ViolationKind,
    pub value: f64,
    pub limit: f64,
}

/// 轨迹：有序的采样点序列加参数
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryRepr")]
pub struct Trajectory {
    params: Params,
    elements: Vec<PathElement>,
}

#[derive(Deserialize)]
struct TrajectoryRepr {
    params: Params,
    elements: Vec<PathElement>,
}

impl TryFrom<TrajectoryRepr> for Trajectory {
    type Error = ProtocolError;

    fn try_from(repr: TrajectoryRepr) -> Result<Self, Self::Error> {
        let mut trajectory = Trajectory::new(repr.params);
        trajectory.replace_elements(repr.elements)?;
        Ok(trajectory)
    }
}

impl Trajectory {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            elements: Vec::new(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn bitmap(&self) -> JointBitmap {
        self.params.bitmap
    }

    pub fn frequency(&self) -> f64 {
        self.params.frequency
    }

    pub fn interp_mode(&self) -> InterpMode {
        self.params.interp
    }

    pub fn set_interp_mode(&mut self, mode: InterpMode) {
        self.params.interp = mode;
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.params.frequency = frequency;
    }

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.params.tolerance = tolerance;
    }

    pub fn set_custom_limits<I>(&mut self, limits: I) -> Result<(), ProtocolError>
    where
        I: IntoIterator<Item = (usize, JointLimits)>,
    {
        self.params.set_custom_limits(limits)
    }

    /// 设置位图；一旦追加了元素就不能再改
    pub fn set_bitmap(&mut self, bitmap: JointBitmap) -> Result<(), ProtocolError> {
        if !self.elements.is_empty() && bitmap != self.params.bitmap {
            return Err(ProtocolError::BitmapLocked);
        }
        self.params.bitmap = bitmap;
        Ok(())
    }

    /// 整体替换参数（接收端采用 chunk 中的参数）
    pub fn set_params(&mut self, params: Params) -> Result<(), ProtocolError> {
        if !self.elements.is_empty() && params.bitmap != self.params.bitmap {
            return Err(ProtocolError::BitmapLocked);
        }
        self.params = params;
        Ok(())
    }

    pub fn push(&mut self, element: PathElement) -> Result<(), ProtocolError> {
        let expected = self.params.bitmap.count();
        if element.values.len() != expected {
            return Err(ProtocolError::WidthMismatch {
                expected,
                actual: element.values.len(),
            });
        }
        self.elements.push(element);
        Ok(())
    }

    /// 替换全部元素（插值结果写回）
    pub fn replace_elements(&mut self, elements: Vec<PathElement>) -> Result<(), ProtocolError> {
        let expected = self.params.bitmap.count();
        if let Some(bad) = elements.iter().find(|e| e.values.len() != expected) {
            return Err(ProtocolError::WidthMismatch {
                expected,
                actual: bad.values.len(),
            });
        }
        self.elements = elements;
        Ok(())
    }

    /// 清空元素与参数
    pub fn clear(&mut self) {
        self.params = Params::default();
        self.elements.clear();
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub fn element(&self, sample: usize) -> Option<&PathElement> {
        self.elements.get(sample)
    }

    /// 活动关节槽位（按位图顺序）
    pub fn active_joints(&self) -> impl Iterator<Item = usize> {
        self.params.bitmap.iter()
    }

    /// 某个采样点上某个关节的参考值
    pub fn value(&self, sample: usize, slot: usize) -> Option<f64> {
        let rank = self.params.bitmap.rank(slot)?;
        self.elements.get(sample).map(|e| e.values[rank])
    }

    /// 稠密采样 → 输入路径段
    pub fn path_segment_index(&self, sample: usize) -> Option<u64> {
        self.elements.get(sample).map(|e| e.phase_index)
    }

    /// 收集所有限位违规（不会在第一处违规时停止）
    pub fn limit_violations(&self, description: &RobotDescription) -> Vec<LimitViolation> {
        let frequency = self.params.effective_frequency(description);
        let eps = LIMIT_EPSILON;
        let mut violations = Vec::new();

        for (rank, slot) in self.params.bitmap.iter().enumerate() {
            let name = description.joint_name(slot);
            let Some(limits) = self.params.effective_limits(slot, description) else {
                violations.push(LimitViolation {
                    slot,
                    name,
                    sample: 0,
                    kind: ViolationKind::MissingLimits,
                    value: f64::NAN,
                    limit: f64::NAN,
                });
                continue;
            };

            let last = self.elements.len().saturating_sub(1);
            for (i, element) in self.elements.iter().enumerate() {
                let value = element.values[rank];
                let mut report = |kind, value, limit| {
                    violations.push(LimitViolation {
                        slot,
                        name: name.clone(),
                        sample: i,
                        kind,
                        value,
                        limit,
                    })
                };

                if value.is_nan() {
                    report(ViolationKind::NotANumber, value, f64::NAN);
                    continue;
                }
                if value < limits.min_position - eps {
                    report(ViolationKind::Position, value, limits.min_position);
                }
                if value > limits.max_position + eps {
                    report(ViolationKind::Position, value, limits.max_position);
                }

                if i > 0 {
                    let prev = self.elements[i - 1].values[rank];
                    let speed = (value - prev).abs() * frequency;
                    if speed > limits.max_speed + eps {
                        report(ViolationKind::Speed, speed, limits.max_speed);
                    }
                }

                if i > 0 && i < last {
                    let prev = self.elements[i - 1].values[rank];
                    let next = self.elements[i + 1].values[rank];
                    let accel = (next - 2.0 * value + prev).abs() * frequency * frequency;
                    if accel > limits.max_accel + eps {
                        report(ViolationKind::Acceleration, accel, limits.max_accel);
                    }
                }
            }
        }

        violations
    }

    /// 检查限位，逐条记录违规日志，全部通过时返回 true
    pub fn check_limits(&self, description: &RobotDescription) -> bool {
        let violations = self.limit_violations(description);
        for v in &violations {
            warn!(
                joint = %v.name,
                slot = v.slot,
                sample = v.sample,
                kind = v.kind.as_str(),
                value = v.value,
                limit = v.limit,
                "Trajectory violates joint limit"
            );
        }
        violations.is_empty()
    }
}
