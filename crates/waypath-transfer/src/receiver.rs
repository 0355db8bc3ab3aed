//! 接收端

use crate::{TransferConfig, TransferError};
use tracing::{debug, error, info, trace, warn};
use waypath_channel::{BroadcastChannel, ChannelError, GetMode, Wait};
use waypath_protocol::{
    Chunk, Feedback, FeedbackState, NO_CHUNK_ID, ProtocolError, Trajectory,
};

/// 接收一条轨迹到 `out`
///
/// 宣告 READ_READY 之前先丢弃输入通道上的旧帧，只接受之后发布的 chunk。
/// 失败时 `out` 被清空，并且已经向发送方发布了对应的反馈状态
/// （TIMEOUT / DISCONTINUITY / CANCELED / ACH_ERROR）。
pub fn receive_trajectory<I, F>(
    input: &mut I,
    feedback: &mut F,
    out: &mut Trajectory,
    config: &TransferConfig,
) -> Result<(), TransferError>
where
    I: BroadcastChannel + ?Sized,
    F: BroadcastChannel + ?Sized,
{
    out.clear();
    input.flush()?;
    feedback.publish(&Feedback::new(FeedbackState::ReadReady, NO_CHUNK_ID, 0).encode())?;
    debug!(channel = input.name(), "Receiver ready");

    let result = receive_chunks(input, feedback, out, config);
    if result.is_err() {
        out.clear();
    }
    result
}

fn receive_chunks<I, F>(
    input: &mut I,
    feedback: &mut F,
    out: &mut Trajectory,
    config: &TransferConfig,
) -> Result<(), TransferError>
where
    I: BroadcastChannel + ?Sized,
    F: BroadcastChannel + ?Sized,
{
    let mut chunk_id: i32 = NO_CHUNK_ID;
    let mut total_chunks: u32 = 1;

    while i64::from(chunk_id) < i64::from(total_chunks) - 1 {
        let received = match input.get(Wait::For(config.max_wait), GetMode::Next) {
            Ok(received) => received,
            Err(ChannelError::Timeout) => {
                report(feedback, FeedbackState::Timeout, chunk_id, total_chunks);
                error!(last_chunk = chunk_id, "Timed out waiting for chunk");
                return Err(TransferError::Timeout("chunk"));
            },
            Err(e) => {
                report(feedback, FeedbackState::AchError, chunk_id, total_chunks);
                return Err(e.into());
            },
        };
        if received.missed > 0 {
            warn!(missed = received.missed, "Chunk frames overwritten before read");
        }

        let chunk = match Chunk::decode(&received.frame) {
            Ok(chunk) => chunk,
            Err(e) => {
                report(feedback, FeedbackState::Discontinuity, chunk_id, total_chunks);
                error!(error = %e, last_chunk = chunk_id, "Malformed chunk");
                return Err(e.into());
            },
        };

        if chunk.is_cancel() {
            report(feedback, FeedbackState::Canceled, chunk_id, total_chunks);
            info!(last_chunk = chunk_id, "Transfer canceled by sender");
            return Err(TransferError::Canceled);
        }

        let expected = chunk_id + 1;
        if chunk.chunk_id != expected {
            report(feedback, FeedbackState::Discontinuity, chunk_id, total_chunks);
            error!(
                expected,
                received = chunk.chunk_id,
                "Chunk sequence discontinuity"
            );
            return Err(TransferError::SynchError {
                expected,
                received: chunk.chunk_id,
            });
        }

        if i64::from(chunk.chunk_id) >= i64::from(chunk.total_chunks) {
            report(feedback, FeedbackState::Discontinuity, chunk_id, total_chunks);
            let e = ProtocolError::InvalidValue {
                field: "total_chunks",
                value: u64::from(chunk.total_chunks),
            };
            error!(error = %e, chunk_id = chunk.chunk_id, "Chunk announces impossible total");
            return Err(e.into());
        }

        let (accepted_id, announced_total, size) =
            (chunk.chunk_id, chunk.total_chunks, chunk.chunk_size());
        if let Err(e) = accept(out, chunk) {
            report(feedback, FeedbackState::Discontinuity, chunk_id, total_chunks);
            error!(error = %e, chunk_id = accepted_id, "Chunk does not fit trajectory");
            return Err(e.into());
        }

        chunk_id = accepted_id;
        total_chunks = announced_total;
        let state = if i64::from(chunk_id) == i64::from(total_chunks) - 1 {
            FeedbackState::Finished
        } else {
            FeedbackState::Listening
        };
        feedback.publish(&Feedback::new(state, chunk_id, total_chunks).encode())?;
        trace!(chunk_id, total_chunks, size, state = %state, "Chunk accepted");
    }

    info!(
        elements = out.len(),
        total_chunks, "Trajectory received"
    );
    Ok(())
}

fn accept(out: &mut Trajectory, chunk: Chunk) -> Result<(), ProtocolError> {
    out.set_params(chunk.params)?;
    for element in chunk.elements {
        out.push(element)?;
    }
    Ok(())
}

/// 在错误路径上发布反馈；发布失败只记日志
fn report<F>(feedback: &mut F, state: FeedbackState, chunk_id: i32, total_chunks: u32)
where
    F: BroadcastChannel + ?Sized,
{
    if let Err(e) = feedback.publish(&Feedback::new(state, chunk_id, total_chunks).encode()) {
        warn!(error = %e, state = %state, "Failed to publish feedback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_trajectory;
    use std::thread;
    use std::time::{Duration, Instant};
    use waypath_channel::{MemoryBus, MemoryChannel};
    use waypath_protocol::{InterpMode, JointBitmap, Params, PathElement};

    fn config(ms: u64) -> TransferConfig {
        TransferConfig {
            max_wait: Duration::from_millis(ms),
            ready_attempts: 20,
            ready_poll: Duration::from_millis(50),
        }
    }

    fn trajectory(len: usize) -> Trajectory {
        let mut traj = Trajectory::new(Params::new(200.0, InterpMode::Raw, 0.001));
        traj.set_bitmap(JointBitmap::from_slots([1, 4, 9]).unwrap()).unwrap();
        for i in 0..len {
            let x = i as f64 * 0.01;
            traj.push(PathElement::new(vec![x, -x, 0.5 * x], (i / 10) as u64))
                .unwrap();
        }
        traj
    }

    fn chunk_frame(traj: &Trajectory, chunk_id: i32, total_chunks: u32) -> Vec<u8> {
        Chunk {
            params: traj.params().clone(),
            elements: traj.elements()[..2].to_vec(),
            chunk_id,
            total_chunks,
        }
        .encode()
        .unwrap()
        .to_vec()
    }

    /// 等接收方宣告 READ_READY 后再发布 `frames`
    fn publish_when_ready(bus: &MemoryBus, frames: Vec<Vec<u8>>) -> thread::JoinHandle<()> {
        let mut output = bus.open("traj");
        let mut ready = bus.open("fb");
        thread::spawn(move || {
            loop {
                let received = ready
                    .get(Wait::For(Duration::from_secs(1)), GetMode::Next)
                    .unwrap();
                if Feedback::decode(&received.frame).unwrap().state == FeedbackState::ReadReady {
                    break;
                }
            }
            for frame in frames {
                output.publish(&frame).unwrap();
            }
        })
    }

    fn last_feedback(ch: &mut MemoryChannel) -> Feedback {
        Feedback::decode(&ch.try_latest().unwrap().unwrap().frame).unwrap()
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        let bus = MemoryBus::new();
        let original = trajectory(250);

        let sender_bus = bus.clone();
        let to_send = original.clone();
        let sender = thread::spawn(move || {
            let mut output = sender_bus.open("traj");
            let mut feedback = sender_bus.open("fb");
            send_trajectory(&mut output, &mut feedback, &to_send, &config(1000))
        });

        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut received = Trajectory::default();
        receive_trajectory(&mut input, &mut feedback, &mut received, &config(1000)).unwrap();
        sender.join().unwrap().unwrap();

        assert_eq!(received, original);
    }

    #[test]
    fn test_discontinuity_after_gap() {
        let bus = MemoryBus::new();
        let traj = trajectory(2);
        let frames = [0, 1, 3].map(|id| chunk_frame(&traj, id, 5)).to_vec();
        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("fb");
        let publisher = publish_when_ready(&bus, frames);
        let mut out = Trajectory::default();
        let err = receive_trajectory(&mut input, &mut feedback, &mut out, &config(200))
            .unwrap_err();
        publisher.join().unwrap();

        assert!(matches!(
            err,
            TransferError::SynchError {
                expected: 2,
                received: 3
            }
        ));
        let fb = last_feedback(&mut observer);
        assert_eq!(fb.state, FeedbackState::Discontinuity);
        // 反馈中只报告真正接受过的 chunk
        assert_eq!(fb.chunk_id, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_stale_chunks_discarded_before_ready() {
        let bus = MemoryBus::new();
        let traj = trajectory(2);
        let mut input = bus.open("traj");
        // 上一次中断的传输遗留的帧
        let mut stale = bus.open("traj");
        stale.publish(&chunk_frame(&traj, 1, 3)).unwrap();

        let mut feedback = bus.open("fb");
        let publisher = publish_when_ready(&bus, vec![chunk_frame(&traj, 0, 1)]);
        let mut out = Trajectory::default();
        receive_trajectory(&mut input, &mut feedback, &mut out, &config(500)).unwrap();
        publisher.join().unwrap();

        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_timeout_without_chunks() {
        let bus = MemoryBus::new();
        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("fb");
        let mut out = Trajectory::default();

        let start = Instant::now();
        let err = receive_trajectory(&mut input, &mut feedback, &mut out, &config(100))
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout("chunk")));
        assert!(start.elapsed() >= Duration::from_millis(90));

        let fb = last_feedback(&mut observer);
        assert_eq!(fb.state, FeedbackState::Timeout);
        assert_eq!(fb.chunk_id, NO_CHUNK_ID);
    }

    #[test]
    fn test_cancel_sentinel() {
        let bus = MemoryBus::new();
        let traj = trajectory(2);
        let frames = vec![
            chunk_frame(&traj, 0, 3),
            Chunk::cancel().encode().unwrap().to_vec(),
        ];

        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("fb");
        let publisher = publish_when_ready(&bus, frames);
        let mut out = Trajectory::default();
        let err = receive_trajectory(&mut input, &mut feedback, &mut out, &config(200))
            .unwrap_err();
        publisher.join().unwrap();
        assert!(matches!(err, TransferError::Canceled));
        let fb = last_feedback(&mut observer);
        assert_eq!(fb.state, FeedbackState::Canceled);
        assert_eq!(fb.chunk_id, 0);
    }

    #[test]
    fn test_malformed_header_aborts() {
        let bus = MemoryBus::new();
        let traj = trajectory(2);
        let mut frame = chunk_frame(&traj, 0, 1);
        frame[0] ^= 0xFF;

        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("fb");
        let publisher = publish_when_ready(&bus, vec![frame]);
        let mut out = Trajectory::default();
        let err = receive_trajectory(&mut input, &mut feedback, &mut out, &config(200))
            .unwrap_err();
        publisher.join().unwrap();
        assert!(matches!(
            err,
            TransferError::Malformed(ProtocolError::InvalidHeader)
        ));
        assert_eq!(last_feedback(&mut observer).state, FeedbackState::Discontinuity);
    }

    #[test]
    fn test_single_chunk_reports_finished() {
        let bus = MemoryBus::new();
        let traj = trajectory(2);

        let mut input = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("fb");
        let publisher = publish_when_ready(&bus, vec![chunk_frame(&traj, 0, 1)]);
        let mut out = Trajectory::default();
        receive_trajectory(&mut input, &mut feedback, &mut out, &config(200)).unwrap();
        publisher.join().unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out.bitmap(), traj.bitmap());
        let fb = last_feedback(&mut observer);
        assert_eq!(fb.state, FeedbackState::Finished);
        assert_eq!(fb.chunk_id, 0);
        assert_eq!(fb.expected_size, 1);
    }
}
