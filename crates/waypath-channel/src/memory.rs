//! 进程内广播总线
//!
//! 每个命名通道是一个有界环形缓冲，帧带单调递增的序号；每个
//! `MemoryChannel` 句柄持有自己的读游标。新句柄的游标从 0 开始，
//! 因此能看到打开之前仍留在缓冲中的帧（`flush()` 可以跳过它们）。

use crate::{BroadcastChannel, ChannelError, GetMode, Received, Wait};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// 通道配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// 环形缓冲深度（帧）
    pub frame_capacity: usize,
    /// 单帧最大字节数
    pub max_frame_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 16,
            max_frame_size: 64 * 1024,
        }
    }
}

struct Ring {
    /// (序号, 帧)
    frames: VecDeque<(u64, Bytes)>,
    next_seq: u64,
    closed: bool,
}

struct Shared {
    name: String,
    config: ChannelConfig,
    ring: Mutex<Ring>,
    cond: Condvar,
}

/// 命名通道注册表；克隆后共享同一组通道
#[derive(Clone, Default)]
pub struct MemoryBus {
    channels: Arc<Mutex<HashMap<String, Arc<Shared>>>>,
    config: ChannelConfig,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            channels: Arc::default(),
            config,
        }
    }

    /// 打开（必要时创建）一个命名通道，返回独立游标的句柄
    pub fn open(&self, name: &str) -> MemoryChannel {
        let shared = {
            let mut channels = self.channels.lock();
            channels
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(channel = name, "Creating in-process channel");
                    Arc::new(Shared {
                        name: name.to_string(),
                        config: self.config,
                        ring: Mutex::new(Ring {
                            frames: VecDeque::with_capacity(self.config.frame_capacity),
                            next_seq: 0,
                            closed: false,
                        }),
                        cond: Condvar::new(),
                    })
                })
                .clone()
        };
        MemoryChannel { shared, cursor: 0 }
    }

    /// 关闭所有通道并唤醒阻塞中的读取方
    pub fn close(&self) {
        let channels = self.channels.lock();
        for shared in channels.values() {
            shared.ring.lock().closed = true;
            shared.cond.notify_all();
        }
    }
}

/// 通道句柄（每个句柄一个读游标）
pub struct MemoryChannel {
    shared: Arc<Shared>,
    /// 下一个要读的序号
    cursor: u64,
}

impl BroadcastChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn publish(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        let max = self.shared.config.max_frame_size;
        if frame.len() > max {
            return Err(ChannelError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }

        let mut ring = self.shared.ring.lock();
        if ring.closed {
            return Err(ChannelError::Closed(self.shared.name.clone()));
        }
        let seq = ring.next_seq;
        ring.frames.push_back((seq, Bytes::copy_from_slice(frame)));
        ring.next_seq += 1;
        while ring.frames.len() > self.shared.config.frame_capacity.max(1) {
            ring.frames.pop_front();
        }
        drop(ring);

        trace!(channel = %self.shared.name, seq, len = frame.len(), "Published frame");
        self.shared.cond.notify_all();
        Ok(())
    }

    fn get(&mut self, wait: Wait, mode: GetMode) -> Result<Received, ChannelError> {
        let deadline = wait.deadline();
        let mut ring = self.shared.ring.lock();

        loop {
            if ring.closed {
                return Err(ChannelError::Closed(self.shared.name.clone()));
            }

            if self.cursor < ring.next_seq
                && let Some(&(oldest, _)) = ring.frames.front()
            {
                let received = match mode {
                    GetMode::Latest => {
                        let (seq, frame) = ring.frames.back().cloned().unwrap_or_default();
                        let missed = seq.saturating_sub(self.cursor);
                        self.cursor = ring.next_seq;
                        Received { frame, missed }
                    },
                    GetMode::Next => {
                        let missed = oldest.saturating_sub(self.cursor);
                        self.cursor = self.cursor.max(oldest);
                        let index = (self.cursor - oldest) as usize;
                        let frame = ring.frames[index].1.clone();
                        self.cursor += 1;
                        Received { frame, missed }
                    },
                };
                return Ok(received);
            }

            let Some(deadline) = deadline else {
                return Err(ChannelError::Timeout);
            };
            if self.shared.cond.wait_until(&mut ring, deadline).timed_out()
                && (self.cursor >= ring.next_seq || ring.frames.is_empty())
                && !ring.closed
            {
                return Err(ChannelError::Timeout);
            }
        }
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        let ring = self.shared.ring.lock();
        self.cursor = ring.next_seq;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_next_reads_in_order() {
        let bus = MemoryBus::new();
        let mut tx = bus.open("test");
        let mut rx = bus.open("test");

        tx.publish(b"a").unwrap();
        tx.publish(b"b").unwrap();

        let first = rx.get(Wait::Poll, GetMode::Next).unwrap();
        assert_eq!(&first.frame[..], b"a");
        assert_eq!(first.missed, 0);
        let second = rx.get(Wait::Poll, GetMode::Next).unwrap();
        assert_eq!(&second.frame[..], b"b");
        assert_eq!(rx.get(Wait::Poll, GetMode::Next), Err(ChannelError::Timeout));
    }

    #[test]
    fn test_latest_skips_older_frames() {
        let bus = MemoryBus::new();
        let mut tx = bus.open("test");
        let mut rx = bus.open("test");

        for byte in 0u8..5 {
            tx.publish(&[byte]).unwrap();
        }
        let latest = rx.get(Wait::Poll, GetMode::Latest).unwrap();
        assert_eq!(&latest.frame[..], &[4]);
        assert_eq!(latest.missed, 4);
        // 已经读过最新帧
        assert_eq!(rx.try_latest().unwrap(), None);
    }

    #[test]
    fn test_overwritten_frames_reported_as_missed() {
        let bus = MemoryBus::with_config(ChannelConfig {
            frame_capacity: 2,
            max_frame_size: 16,
        });
        let mut tx = bus.open("test");
        let mut rx = bus.open("test");
        for byte in 0u8..5 {
            tx.publish(&[byte]).unwrap();
        }
        let next = rx.get(Wait::Poll, GetMode::Next).unwrap();
        assert_eq!(&next.frame[..], &[3]);
        assert_eq!(next.missed, 3);
    }

    #[test]
    fn test_flush_discards_unread() {
        let bus = MemoryBus::new();
        let mut tx = bus.open("test");
        let mut rx = bus.open("test");
        tx.publish(b"stale").unwrap();
        rx.flush().unwrap();
        assert_eq!(rx.try_latest().unwrap(), None);
        tx.publish(b"fresh").unwrap();
        assert_eq!(&rx.try_latest().unwrap().unwrap().frame[..], b"fresh");
    }

    #[test]
    fn test_frame_too_large() {
        let bus = MemoryBus::with_config(ChannelConfig {
            frame_capacity: 4,
            max_frame_size: 2,
        });
        let mut tx = bus.open("test");
        assert_eq!(
            tx.publish(b"abc"),
            Err(ChannelError::FrameTooLarge { size: 3, max: 2 })
        );
    }

    #[test]
    fn test_relative_timeout() {
        let bus = MemoryBus::new();
        let mut rx = bus.open("quiet");
        let start = Instant::now();
        let result = rx.get(Wait::For(Duration::from_millis(50)), GetMode::Next);
        assert_eq!(result, Err(ChannelError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_blocking_get_wakes_on_publish() {
        let bus = MemoryBus::new();
        let mut rx = bus.open("wake");
        let publisher = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.open("wake").publish(b"ping").unwrap();
        });
        let received = rx.get(Wait::seconds(2), GetMode::Next).unwrap();
        assert_eq!(&received.frame[..], b"ping");
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_reader() {
        let bus = MemoryBus::new();
        let mut rx = bus.open("closing");
        let closer = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        let result = rx.get(Wait::seconds(2), GetMode::Next);
        assert!(matches!(result, Err(ChannelError::Closed(_))));
        handle.join().unwrap();
    }

    #[test]
    fn test_channels_are_independent() {
        let bus = MemoryBus::new();
        let mut a = bus.open("a");
        let mut b = bus.open("b");
        a.publish(b"x").unwrap();
        assert_eq!(b.try_latest().unwrap(), None);
        assert_eq!(a.name(), "a");
    }
}
