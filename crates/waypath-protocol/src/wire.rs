//! 线上记录定义与编解码
//!
//! 三种记录在广播通道上传输，均为定长、小端：
//!
//! ```text
//! Chunk       = header[16] | Params | PathElement × 100 | chunk_size:u32 | chunk_id:i32 | total_chunks:u32
//! Params      = frequency:f64 | interp:u8 | tolerance:f64 | bitmap:u64 | custom:u8 | JointLimits × 64
//! PathElement = reference:f64 × 64 | phase_index:u64
//! Feedback    = state:u8 | chunk_id:u32 | expected_size:u32
//! Instruction = instruction:u8
//! ```
//!
//! `Feedback.chunk_id` 以 i32 的补码写入，因此接收前的 -1 可以原样传递。

use crate::ProtocolError;
use crate::constants::{CANCEL_CHUNK_ID, CHUNK_CAPACITY, CHUNK_HEADER, MAX_JOINT_COUNT};
use crate::limits::JointLimits;
use crate::trajectory::{InterpMode, JointBitmap, Params, PathElement};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

const LIMITS_WIRE_SIZE: usize = 6 * 8;

/// Params 的线上长度
pub const PARAMS_WIRE_SIZE: usize = 8 + 1 + 8 + 8 + 1 + MAX_JOINT_COUNT * LIMITS_WIRE_SIZE;

/// 单个 PathElement 的线上长度
pub const ELEMENT_WIRE_SIZE: usize = MAX_JOINT_COUNT * 8 + 8;

/// Chunk 的线上长度
pub const CHUNK_WIRE_SIZE: usize =
    CHUNK_HEADER.len() + PARAMS_WIRE_SIZE + CHUNK_CAPACITY * ELEMENT_WIRE_SIZE + 4 + 4 + 4;

/// Feedback 的线上长度
pub const FEEDBACK_WIRE_SIZE: usize = 1 + 4 + 4;

/// Instruction 的线上长度
pub const INSTRUCTION_WIRE_SIZE: usize = 1;

// ============================================================================
// Feedback State
// ============================================================================

/// 接收端状态
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
pub enum FeedbackState {
    #[default]
    Ignoring = 0,
    ReadReady = 1,
    Listening = 2,
    Timeout = 3,
    Discontinuity = 4,
    AchError = 5,
    Finished = 6,
    Canceled = 7,
}

impl FeedbackState {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackState::Ignoring => "IGNORING",
            FeedbackState::ReadReady => "READ_READY",
            FeedbackState::Listening => "LISTENING",
            FeedbackState::Timeout => "TIMEOUT",
            FeedbackState::Discontinuity => "DISCONTINUITY",
            FeedbackState::AchError => "ACH_ERROR",
            FeedbackState::Finished => "FINISHED",
            FeedbackState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for FeedbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Instruction
// ============================================================================

/// 播放指令
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
pub enum Instruction {
    #[default]
    Quit = 0,
    Run = 1,
    Pause = 2,
    Reverse = 3,
    Load = 4,
    LoadAndGo = 5,
}

impl Instruction {
    pub fn as_str(self) -> &'static str {
        match self {
            Instruction::Quit => "QUIT",
            Instruction::Run => "RUN",
            Instruction::Pause => "PAUSE",
            Instruction::Reverse => "REVERSE",
            Instruction::Load => "LOAD",
            Instruction::LoadAndGo => "LOAD_AND_GO",
        }
    }

    /// 是否要求接收新轨迹
    pub fn is_load(self) -> bool {
        matches!(self, Instruction::Load | Instruction::LoadAndGo)
    }

    pub fn encode(self) -> [u8; INSTRUCTION_WIRE_SIZE] {
        [self.into()]
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != INSTRUCTION_WIRE_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: INSTRUCTION_WIRE_SIZE,
                actual: buf.len(),
            });
        }
        Instruction::try_from(buf[0]).map_err(|e| ProtocolError::InvalidValue {
            field: "Instruction",
            value: e.number as u64,
        })
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Instruction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "quit" => Ok(Instruction::Quit),
            "run" => Ok(Instruction::Run),
            "pause" => Ok(Instruction::Pause),
            "reverse" => Ok(Instruction::Reverse),
            "load" => Ok(Instruction::Load),
            "loadandgo" => Ok(Instruction::LoadAndGo),
            _ => Err(ProtocolError::InvalidValue {
                field: "Instruction",
                value: u64::MAX,
            }),
        }
    }
}

// ============================================================================
// Feedback
// ============================================================================

/// 接收端确认 / 状态记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub state: FeedbackState,
    /// 最近一次接受的 chunk_id（尚未接受时为 -1）
    pub chunk_id: i32,
    /// 复用为总 chunk 数
    pub expected_size: u32,
}

impl Feedback {
    pub fn new(state: FeedbackState, chunk_id: i32, expected_size: u32) -> Self {
        Self {
            state,
            chunk_id,
            expected_size,
        }
    }

    pub fn encode(&self) -> [u8; FEEDBACK_WIRE_SIZE] {
        let mut buf = [0u8; FEEDBACK_WIRE_SIZE];
        buf[0] = self.state.into();
        buf[1..5].copy_from_slice(&(self.chunk_id as u32).to_le_bytes());
        buf[5..9].copy_from_slice(&self.expected_size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != FEEDBACK_WIRE_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: FEEDBACK_WIRE_SIZE,
                actual: buf.len(),
            });
        }
        let state = FeedbackState::try_from(buf[0]).map_err(|e| ProtocolError::InvalidValue {
            field: "FeedbackState",
            value: e.number as u64,
        })?;
        let chunk_id = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as i32;
        let expected_size = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
        Ok(Self {
            state,
            chunk_id,
            expected_size,
        })
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 传输中的一段轨迹（≤ 100 个元素）
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub params: Params,
    pub elements: Vec<PathElement>,
    pub chunk_id: i32,
    pub total_chunks: u32,
}

impl Chunk {
    /// 取消传输的哨兵 chunk
    pub fn cancel() -> Self {
        Self {
            params: Params::default(),
            elements: Vec::new(),
            chunk_id: CANCEL_CHUNK_ID,
            total_chunks: 0,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.chunk_id == CANCEL_CHUNK_ID
    }

    pub fn chunk_size(&self) -> usize {
        self.elements.len()
    }

    /// 编码为定长记录（未使用的槽位和元素填 0）
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.elements.len() > CHUNK_CAPACITY {
            return Err(ProtocolError::InvalidValue {
                field: "chunk_size",
                value: self.elements.len() as u64,
            });
        }
        let bitmap = self.params.bitmap();
        let width = bitmap.count();

        let mut buf = BytesMut::with_capacity(CHUNK_WIRE_SIZE);
        buf.put_slice(&CHUNK_HEADER);
        encode_params(&self.params, &mut buf);

        for element in &self.elements {
            if element.values.len() != width {
                return Err(ProtocolError::WidthMismatch {
                    expected: width,
                    actual: element.values.len(),
                });
            }
            let mut slots = [0.0f64; MAX_JOINT_COUNT];
            for (value, slot) in element.values.iter().zip(bitmap.iter()) {
                slots[slot] = *value;
            }
            for value in slots {
                buf.put_f64_le(value);
            }
            buf.put_u64_le(element.phase_index);
        }
        buf.put_bytes(0, (CHUNK_CAPACITY - self.elements.len()) * ELEMENT_WIRE_SIZE);

        buf.put_u32_le(self.elements.len() as u32);
        buf.put_i32_le(self.chunk_id);
        buf.put_u32_le(self.total_chunks);

        debug_assert_eq!(buf.len(), CHUNK_WIRE_SIZE);
        Ok(buf.freeze())
    }

    /// 从定长记录解码；头部标签不符时返回 `InvalidHeader`
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != CHUNK_WIRE_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: CHUNK_WIRE_SIZE,
                actual: data.len(),
            });
        }
        if data[..CHUNK_HEADER.len()] != CHUNK_HEADER {
            return Err(ProtocolError::InvalidHeader);
        }

        let mut buf = &data[CHUNK_HEADER.len()..];
        let params = decode_params(&mut buf)?;
        let bitmap = params.bitmap();

        let mut body = &buf[..CHUNK_CAPACITY * ELEMENT_WIRE_SIZE];
        let mut tail = &buf[CHUNK_CAPACITY * ELEMENT_WIRE_SIZE..];
        let chunk_size = tail.get_u32_le() as usize;
        let chunk_id = tail.get_i32_le();
        let total_chunks = tail.get_u32_le();

        if chunk_size > CHUNK_CAPACITY {
            return Err(ProtocolError::InvalidValue {
                field: "chunk_size",
                value: chunk_size as u64,
            });
        }

        let mut elements = Vec::with_capacity(chunk_size);
        for _ in 0..chunk_size {
            let mut slots = [0.0f64; MAX_JOINT_COUNT];
            for slot in slots.iter_mut() {
                *slot = body.get_f64_le();
            }
            let phase_index = body.get_u64_le();
            let values = bitmap.iter().map(|slot| slots[slot]).collect();
            elements.push(PathElement::new(values, phase_index));
        }

        Ok(Self {
            params,
            elements,
            chunk_id,
            total_chunks,
        })
    }
}

fn encode_params(params: &Params, buf: &mut BytesMut) {
    buf.put_f64_le(params.frequency);
    buf.put_u8(params.interp.into());
    buf.put_f64_le(params.tolerance);
    buf.put_u64_le(params.bitmap().bits());
    match params.custom_limits() {
        Some(table) => {
            buf.put_u8(1);
            for slot in 0..MAX_JOINT_COUNT {
                let limits = table.get(slot).copied().unwrap_or_default();
                encode_limits(&limits, buf);
            }
        },
        None => {
            buf.put_u8(0);
            buf.put_bytes(0, MAX_JOINT_COUNT * LIMITS_WIRE_SIZE);
        },
    }
}

fn encode_limits(limits: &JointLimits, buf: &mut BytesMut) {
    buf.put_f64_le(limits.min_position);
    buf.put_f64_le(limits.max_position);
    buf.put_f64_le(limits.nominal_speed);
    buf.put_f64_le(limits.max_speed);
    buf.put_f64_le(limits.nominal_accel);
    buf.put_f64_le(limits.max_accel);
}

fn decode_params(buf: &mut &[u8]) -> Result<Params, ProtocolError> {
    let frequency = buf.get_f64_le();
    let raw_interp = buf.get_u8();
    let interp = InterpMode::try_from(raw_interp).map_err(|_| ProtocolError::InvalidValue {
        field: "InterpMode",
        value: raw_interp as u64,
    })?;
    let tolerance = buf.get_f64_le();
    let bitmap = JointBitmap::from_bits(buf.get_u64_le());
    let custom = buf.get_u8() != 0;

    let mut table = Vec::with_capacity(MAX_JOINT_COUNT);
    for _ in 0..MAX_JOINT_COUNT {
        table.push(JointLimits {
            min_position: buf.get_f64_le(),
            max_position: buf.get_f64_le(),
            nominal_speed: buf.get_f64_le(),
            max_speed: buf.get_f64_le(),
            nominal_accel: buf.get_f64_le(),
            max_accel: buf.get_f64_le(),
        });
    }

    let mut params = Params::new(frequency, interp, tolerance).with_bitmap(bitmap);
    params.set_custom_table(custom.then_some(table));
    Ok(params)
}
