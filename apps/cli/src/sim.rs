//! 模拟机器人
//!
//! 关节位置保存在 `ArcSwap` 中：回放线程 `flush()` 时整体替换，Operator
//! 和主线程无锁读取快照。命令立即生效（理想跟踪）。

use arc_swap::ArcSwap;
use std::sync::Arc;
use waypath_sdk::protocol::MAX_JOINT_COUNT;
use waypath_sdk::{CommandSink, InterfaceError, JointMode, JointStateSource};

/// 模拟机器人（克隆后共享同一组关节）
#[derive(Clone)]
pub struct SimRobot {
    positions: Arc<ArcSwap<Vec<f64>>>,
}

impl SimRobot {
    pub fn new() -> Self {
        Self {
            positions: Arc::new(ArcSwap::from_pointee(vec![0.0; MAX_JOINT_COUNT])),
        }
    }

    /// 当前所有槽位的位置
    pub fn positions(&self) -> Arc<Vec<f64>> {
        self.positions.load_full()
    }

    /// 测量状态接口
    pub fn state(&self) -> SimState {
        SimState {
            shared: self.positions.clone(),
            snapshot: self.positions.load_full(),
        }
    }

    /// 命令接口
    pub fn commands(&self) -> SimCommands {
        SimCommands {
            shared: self.positions.clone(),
            claimed: 0,
            pending: Vec::new(),
        }
    }
}

impl Default for SimRobot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimState {
    shared: Arc<ArcSwap<Vec<f64>>>,
    snapshot: Arc<Vec<f64>>,
}

impl JointStateSource for SimState {
    fn refresh(&mut self) -> Result<(), InterfaceError> {
        self.snapshot = self.shared.load_full();
        Ok(())
    }

    fn reference(&self, slot: usize) -> Option<f64> {
        self.snapshot.get(slot).copied()
    }
}

pub struct SimCommands {
    shared: Arc<ArcSwap<Vec<f64>>>,
    /// 已占有槽位的位图
    claimed: u64,
    pending: Vec<(usize, f64)>,
}

impl SimCommands {
    fn check_claimed(&self, slot: usize) -> Result<(), InterfaceError> {
        if slot >= MAX_JOINT_COUNT {
            return Err(InterfaceError::UnknownJoint(slot));
        }
        if self.claimed & (1u64 << slot) == 0 {
            return Err(InterfaceError::NotClaimed(slot));
        }
        Ok(())
    }
}

impl CommandSink for SimCommands {
    fn claim(&mut self, slot: usize) -> Result<(), InterfaceError> {
        if slot >= MAX_JOINT_COUNT {
            return Err(InterfaceError::UnknownJoint(slot));
        }
        self.claimed |= 1u64 << slot;
        Ok(())
    }

    fn release(&mut self, slot: usize) -> Result<(), InterfaceError> {
        if slot >= MAX_JOINT_COUNT {
            return Err(InterfaceError::UnknownJoint(slot));
        }
        self.claimed &= !(1u64 << slot);
        self.pending.retain(|&(s, _)| s != slot);
        Ok(())
    }

    fn set_mode(&mut self, slot: usize, _mode: JointMode) -> Result<(), InterfaceError> {
        self.check_claimed(slot)
    }

    fn set_position(&mut self, slot: usize, value: f64) -> Result<(), InterfaceError> {
        self.check_claimed(slot)?;
        self.pending.push((slot, value));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), InterfaceError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut next = self.shared.load_full().as_ref().clone();
        for (slot, value) in self.pending.drain(..) {
            next[slot] = value;
        }
        self.shared.store(Arc::new(next));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_updates_state() {
        let robot = SimRobot::new();
        let mut state = robot.state();
        let mut commands = robot.commands();

        assert_eq!(
            commands.set_position(3, 0.5),
            Err(InterfaceError::NotClaimed(3))
        );
        commands.claim(3).unwrap();
        commands.set_position(3, 0.5).unwrap();
        state.refresh().unwrap();
        assert_eq!(state.reference(3), Some(0.0));

        commands.flush().unwrap();
        // 刷新前仍是旧快照
        assert_eq!(state.reference(3), Some(0.0));
        state.refresh().unwrap();
        assert_eq!(state.reference(3), Some(0.5));
        assert_eq!(robot.positions()[3], 0.5);
    }

    #[test]
    fn test_release_drops_pending() {
        let robot = SimRobot::new();
        let mut commands = robot.commands();
        commands.claim(1).unwrap();
        commands.set_position(1, 0.2).unwrap();
        commands.release(1).unwrap();
        commands.flush().unwrap();
        assert_eq!(robot.positions()[1], 0.0);
        assert_eq!(commands.claim(64), Err(InterfaceError::UnknownJoint(64)));
    }
}
