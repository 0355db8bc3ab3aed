//! Mock 外部接口（测试用）
//!
//! `MockJointState` 和 `RecordingCommandSink` 都可以克隆，克隆体共享
//! 同一份数据，测试代码可以在把它们交给 Operator / Player 之后继续
//! 修改测量值或检查命令记录。

use crate::interfaces::{CommandSink, InterfaceError, JointMode, JointStateSource};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// 模拟测量状态
#[derive(Clone, Default)]
pub struct MockJointState {
    values: Arc<Mutex<HashMap<usize, f64>>>,
    failing: Arc<AtomicBool>,
    refreshes: Arc<AtomicUsize>,
}

impl MockJointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I: IntoIterator<Item = (usize, f64)>>(values: I) -> Self {
        let state = Self::default();
        state.values.lock().extend(values);
        state
    }

    pub fn set(&self, slot: usize, value: f64) {
        self.values.lock().insert(slot, value);
    }

    pub fn get(&self, slot: usize) -> Option<f64> {
        self.values.lock().get(&slot).copied()
    }

    /// 让后续 `refresh()` 失败
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl JointStateSource for MockJointState {
    fn refresh(&mut self) -> Result<(), InterfaceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(InterfaceError::StateUnavailable("mock failure".to_string()));
        }
        Ok(())
    }

    fn reference(&self, slot: usize) -> Option<f64> {
        self.get(slot)
    }
}

/// 记录下来的一条命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Claim(usize),
    Release(usize),
    Mode(usize, JointMode),
    Position(usize, f64),
    Flush,
}

#[derive(Default)]
struct SinkState {
    log: Vec<Command>,
    claimed: BTreeSet<usize>,
    pending: BTreeMap<usize, f64>,
    flushes: usize,
}

/// 记录所有命令的命令接口
///
/// 可选地跟随一个 `MockJointState`：每次 `flush()` 把位置命令写回测量值，
/// 模拟理想跟踪的关节。
#[derive(Clone, Default)]
pub struct RecordingCommandSink {
    inner: Arc<Mutex<SinkState>>,
    follow: Option<MockJointState>,
}

impl RecordingCommandSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn following(state: MockJointState) -> Self {
        Self {
            inner: Arc::default(),
            follow: Some(state),
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().log.clone()
    }

    pub fn clear(&self) {
        self.inner.lock().log.clear();
    }

    pub fn claimed(&self) -> Vec<usize> {
        self.inner.lock().claimed.iter().copied().collect()
    }

    pub fn flush_count(&self) -> usize {
        self.inner.lock().flushes
    }

    /// 最近一次下发给某关节的位置
    pub fn last_position(&self, slot: usize) -> Option<f64> {
        self.inner.lock().log.iter().rev().find_map(|c| match c {
            Command::Position(s, v) if *s == slot => Some(*v),
            _ => None,
        })
    }
}

impl CommandSink for RecordingCommandSink {
    fn claim(&mut self, slot: usize) -> Result<(), InterfaceError> {
        let mut inner = self.inner.lock();
        inner.claimed.insert(slot);
        inner.log.push(Command::Claim(slot));
        Ok(())
    }

    fn release(&mut self, slot: usize) -> Result<(), InterfaceError> {
        let mut inner = self.inner.lock();
        inner.claimed.remove(&slot);
        inner.pending.remove(&slot);
        inner.log.push(Command::Release(slot));
        Ok(())
    }

    fn set_mode(&mut self, slot: usize, mode: JointMode) -> Result<(), InterfaceError> {
        let mut inner = self.inner.lock();
        if !inner.claimed.contains(&slot) {
            return Err(InterfaceError::NotClaimed(slot));
        }
        inner.log.push(Command::Mode(slot, mode));
        Ok(())
    }

    fn set_position(&mut self, slot: usize, value: f64) -> Result<(), InterfaceError> {
        let mut inner = self.inner.lock();
        if !inner.claimed.contains(&slot) {
            return Err(InterfaceError::NotClaimed(slot));
        }
        inner.pending.insert(slot, value);
        inner.log.push(Command::Position(slot, value));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), InterfaceError> {
        let pending = {
            let mut inner = self.inner.lock();
            inner.flushes += 1;
            inner.log.push(Command::Flush);
            std::mem::take(&mut inner.pending)
        };
        if let Some(state) = &self.follow {
            for (slot, value) in pending {
                state.set(slot, value);
            }
        }
        Ok(())
    }
}
