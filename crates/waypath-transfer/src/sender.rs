//! 发送端

use crate::{TransferConfig, TransferError, chunk_count};
use tracing::{debug, error, info, trace, warn};
use waypath_channel::{BroadcastChannel, ChannelError, GetMode, Wait};
use waypath_protocol::{CHUNK_CAPACITY, Chunk, Feedback, FeedbackState, Trajectory};

/// 发送一条轨迹
///
/// 先等待接收方的 READ_READY，然后逐个发布 chunk，每个 chunk 都必须收到
/// 匹配的确认才继续。接收方始终未就绪时不会发布任何 chunk。
/// 最后一个 chunk 必须以 FINISHED 确认，否则整个传输失败。
pub fn send_trajectory<O, F>(
    output: &mut O,
    feedback: &mut F,
    trajectory: &Trajectory,
    config: &TransferConfig,
) -> Result<(), TransferError>
where
    O: BroadcastChannel + ?Sized,
    F: BroadcastChannel + ?Sized,
{
    wait_ready(feedback, config)?;

    let total = chunk_count(trajectory.len());
    let total_chunks = total as u32;
    info!(
        elements = trajectory.len(),
        total_chunks, "Sending trajectory"
    );

    let mut pieces = trajectory.elements().chunks(CHUNK_CAPACITY);
    for index in 0..total {
        let chunk_id = index as i32;
        let chunk = Chunk {
            params: trajectory.params().clone(),
            elements: pieces.next().map(<[_]>::to_vec).unwrap_or_default(),
            chunk_id,
            total_chunks,
        };
        output.publish(&chunk.encode()?)?;
        trace!(chunk_id, size = chunk.chunk_size(), "Chunk published");

        let ack = match feedback.get(Wait::For(config.max_wait), GetMode::Next) {
            Ok(received) => Feedback::decode(&received.frame)?,
            Err(ChannelError::Timeout) => {
                error!(chunk_id, "No feedback from receiver");
                return Err(TransferError::Timeout("feedback"));
            },
            Err(e) => return Err(e.into()),
        };

        if ack.chunk_id != chunk_id {
            error!(
                expected = chunk_id,
                received = ack.chunk_id,
                state = %ack.state,
                "Receiver acknowledged wrong chunk"
            );
            return Err(TransferError::SynchError {
                expected: chunk_id,
                received: ack.chunk_id,
            });
        }

        if ack.state == FeedbackState::Finished {
            if index + 1 != total {
                error!(chunk_id, total_chunks, "Receiver finished early");
                return Err(TransferError::EarlyFinish {
                    chunk_id,
                    total_chunks,
                });
            }
            info!(total_chunks, "Trajectory transfer finished");
            return Ok(());
        }

        if ack.state != FeedbackState::Listening {
            warn!(chunk_id, state = %ack.state, "Receiver stopped listening");
            return Err(TransferError::Interrupted(ack.state));
        }
        debug!(chunk_id, total_chunks, "Chunk acknowledged");
    }

    error!(total_chunks, "Receiver never reported FINISHED");
    Err(TransferError::Interrupted(FeedbackState::Listening))
}

/// 发布取消哨兵 chunk
pub fn cancel_transfer<O>(output: &mut O) -> Result<(), TransferError>
where
    O: BroadcastChannel + ?Sized,
{
    output.publish(&Chunk::cancel().encode()?)?;
    info!("Transfer cancel sentinel published");
    Ok(())
}

fn wait_ready<F>(feedback: &mut F, config: &TransferConfig) -> Result<(), TransferError>
where
    F: BroadcastChannel + ?Sized,
{
    for attempt in 1..=config.ready_attempts {
        match feedback.get(Wait::For(config.ready_poll), GetMode::Latest) {
            Ok(received) => match Feedback::decode(&received.frame) {
                Ok(fb) if fb.state == FeedbackState::ReadReady => {
                    debug!(attempt, "Receiver ready");
                    return Ok(());
                },
                Ok(fb) => trace!(attempt, state = %fb.state, "Waiting for READ_READY"),
                Err(e) => warn!(attempt, error = %e, "Ignoring malformed feedback"),
            },
            Err(ChannelError::Timeout) => trace!(attempt, "Receiver not ready yet"),
            Err(e) => return Err(e.into()),
        }
    }

    error!(
        attempts = config.ready_attempts,
        "Receiver never became ready"
    );
    Err(TransferError::NotReady {
        attempts: config.ready_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use waypath_channel::MemoryBus;
    use waypath_protocol::{InterpMode, JointBitmap, Params, PathElement};

    fn config() -> TransferConfig {
        TransferConfig {
            max_wait: Duration::from_millis(200),
            ready_attempts: 2,
            ready_poll: Duration::from_millis(20),
        }
    }

    fn trajectory(len: usize) -> Trajectory {
        let mut traj = Trajectory::new(Params::new(100.0, InterpMode::Raw, 0.0));
        traj.set_bitmap(JointBitmap::from_slots([0]).unwrap()).unwrap();
        for i in 0..len {
            traj.push(PathElement::new(vec![i as f64], 0)).unwrap();
        }
        traj
    }

    fn publish(ch: &mut impl BroadcastChannel, fb: Feedback) {
        ch.publish(&fb.encode()).unwrap();
    }

    #[test]
    fn test_not_ready_sends_nothing() {
        let bus = MemoryBus::new();
        let mut output = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut observer = bus.open("traj");

        let err = send_trajectory(&mut output, &mut feedback, &trajectory(3), &config())
            .unwrap_err();
        assert!(matches!(err, TransferError::NotReady { attempts: 2 }));
        assert!(observer.try_latest().unwrap().is_none());
    }

    #[test]
    fn test_wrong_ack_is_synch_error() {
        let bus = MemoryBus::new();
        let mut output = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut peer = bus.open("fb");

        publish(&mut peer, Feedback::new(FeedbackState::ReadReady, -1, 0));
        // 接收方"确认"了一个不存在的 chunk
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            publish(&mut peer, Feedback::new(FeedbackState::Listening, 5, 1));
        });
        let err = send_trajectory(&mut output, &mut feedback, &trajectory(3), &config())
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(
            err,
            TransferError::SynchError {
                expected: 0,
                received: 5
            }
        ));
    }

    #[test]
    fn test_missing_ack_times_out() {
        let bus = MemoryBus::new();
        let mut output = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut peer = bus.open("fb");
        publish(&mut peer, Feedback::new(FeedbackState::ReadReady, -1, 0));

        let err = send_trajectory(&mut output, &mut feedback, &trajectory(3), &config())
            .unwrap_err();
        assert!(matches!(err, TransferError::Timeout("feedback")));
    }

    #[test]
    fn test_last_chunk_must_be_finished() {
        let bus = MemoryBus::new();
        let mut output = bus.open("traj");
        let mut feedback = bus.open("fb");
        let mut peer_input = bus.open("traj");
        let mut peer = bus.open("fb");
        publish(&mut peer, Feedback::new(FeedbackState::ReadReady, -1, 0));

        // 对每个 chunk 都只回 LISTENING
        let handle = std::thread::spawn(move || {
            for _ in 0..2 {
                let frame = peer_input
                    .get(Wait::For(Duration::from_secs(1)), GetMode::Next)
                    .unwrap()
                    .frame;
                let chunk = Chunk::decode(&frame).unwrap();
                publish(
                    &mut peer,
                    Feedback::new(FeedbackState::Listening, chunk.chunk_id, chunk.total_chunks),
                );
            }
        });
        let err = send_trajectory(&mut output, &mut feedback, &trajectory(150), &config())
            .unwrap_err();
        handle.join().unwrap();

        assert!(matches!(
            err,
            TransferError::Interrupted(FeedbackState::Listening)
        ));
        assert_eq!(err.kind(), waypath_protocol::ErrorKind::Interrupted);
    }

    #[test]
    fn test_cancel_publishes_sentinel() {
        let bus = MemoryBus::new();
        let mut output = bus.open("traj");
        let mut observer = bus.open("traj");
        cancel_transfer(&mut output).unwrap();

        let frame = observer.try_latest().unwrap().unwrap().frame;
        assert!(Chunk::decode(&frame).unwrap().is_cancel());
    }
}
