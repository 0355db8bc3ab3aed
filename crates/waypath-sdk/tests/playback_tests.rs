//! Operator → Player 端到端测试
//!
//! Operator 在后台线程发送（会阻塞到传输完成），Player 在测试线程上用
//! 合成时钟逐周期推进。

mod common;

use common::{TickClock, description, player_config, transfer_config};
use std::thread;
use std::time::{Duration, Instant};
use waypath_sdk::control::mock::{Command, MockJointState, RecordingCommandSink};
use waypath_sdk::prelude::*;
use waypath_sdk::protocol::INSTRUCTION_CHANNEL;

type TestOperator = Operator<MemoryChannel, MockJointState>;
type TestPlayer = Player<MemoryChannel, MockJointState, RecordingCommandSink>;

fn operator(bus: &MemoryBus, state: MockJointState) -> TestOperator {
    Operator::new(description(), Channels::open(bus), state).with_transfer_config(transfer_config())
}

fn player(bus: &MemoryBus, state: MockJointState, sink: RecordingCommandSink) -> TestPlayer {
    Player::new(description(), Channels::open(bus), state, sink, player_config())
}

fn send_in_background(
    mut operator: TestOperator,
    instruction: Instruction,
) -> thread::JoinHandle<(TestOperator, Result<(), ControlError>)> {
    thread::spawn(move || {
        let result = operator.send_new_trajectory(instruction);
        (operator, result)
    })
}

/// 推进 Player 直到指令离开 Quit 或者 Operator 线程结束
fn tick_until_loaded(
    player: &mut TestPlayer,
    clock: &mut TickClock,
    sender: &thread::JoinHandle<(TestOperator, Result<(), ControlError>)>,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while player.current_instruction() == Instruction::Quit && !sender.is_finished() {
        assert!(player.step_at(clock.tick()));
        assert!(Instant::now() < deadline, "player never loaded");
        thread::sleep(Duration::from_millis(1));
    }
}

fn publish_instruction(bus: &MemoryBus, instruction: Instruction) {
    bus.open(INSTRUCTION_CHANNEL)
        .publish(&instruction.encode())
        .unwrap();
}

#[test]
fn test_operator_to_player_spline() {
    let bus = MemoryBus::new();
    // 理想跟踪：Player 下发的位置会写回测量值
    let robot = MockJointState::with_values([(0, 0.0), (2, 0.1), (3, -0.2)]);
    let sink = RecordingCommandSink::following(robot.clone());
    let mut player = player(&bus, robot.clone(), sink.clone());
    let mut clock = TickClock::new(200.0);

    let mut op = operator(&bus, robot.clone());
    op.set_joint_names(&["RSP", "REP"]).unwrap();
    op.add_waypoint(&[0.3, -0.5]).unwrap();
    op.add_waypoint(&[0.1, -0.9]).unwrap();

    let sender = send_in_background(op, Instruction::Run);
    tick_until_loaded(&mut player, &mut clock, &sender);
    let (_, result) = sender.join().unwrap();
    result.unwrap();

    assert_eq!(player.current_instruction(), Instruction::Run);
    assert_eq!(player.trajectory().interp_mode(), InterpMode::Raw);
    assert_eq!(sink.claimed(), vec![0, 3]);

    // 第 0 帧就是测量值
    let first = player.trajectory().element(0).unwrap();
    assert_eq!(first.values, vec![0.0, -0.2]);

    let len = player.trajectory().len();
    for _ in 0..len + 10 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.index(), len - 1);

    assert!((sink.last_position(0).unwrap() - 0.1).abs() < 1e-9);
    assert!((sink.last_position(3).unwrap() + 0.9).abs() < 1e-9);
    // 不在轨迹中的关节从未被命令
    assert!(sink.last_position(2).is_none());
    assert!((robot.get(3).unwrap() + 0.9).abs() < 1e-9);
}

#[test]
fn test_operator_to_player_optimal() {
    let bus = MemoryBus::new();
    let robot = MockJointState::with_values([(0, 0.0), (2, 0.0), (3, 0.0)]);
    let sink = RecordingCommandSink::following(robot.clone());
    let mut player = player(&bus, robot.clone(), sink.clone());
    let mut clock = TickClock::new(200.0);

    let mut op = operator(&bus, robot.clone());
    op.set_joint_indices(&[0, 2]).unwrap();
    op.set_interp_mode(InterpMode::Optimal);
    op.set_tolerance(0.01);
    op.add_waypoints(&[[0.4, 0.0], [0.4, 0.4], [0.0, 0.4]])
        .unwrap();

    let sender = send_in_background(op, Instruction::LoadAndGo);
    tick_until_loaded(&mut player, &mut clock, &sender);
    sender.join().unwrap().1.unwrap();

    let traj = player.trajectory().clone();
    assert!(traj.len() > 2);
    assert!(traj.check_limits(&description()));
    assert_eq!(traj.path_segment_index(0), Some(0));

    while player.index() + 1 < traj.len() {
        assert!(player.step_at(clock.tick()));
    }
    assert!(robot.get(0).unwrap().abs() < 1e-9);
    assert!((robot.get(2).unwrap() - 0.4).abs() < 1e-9);
}

#[test]
fn test_index_clamps_at_both_ends() {
    let bus = MemoryBus::new();
    let robot = MockJointState::with_values([(0, 0.0)]);
    let sink = RecordingCommandSink::new();
    let mut player = player(&bus, robot.clone(), sink.clone());
    let mut clock = TickClock::new(200.0);

    // Raw：第 0 帧 + 4 个路径点 = 5 个采样
    let mut op = operator(&bus, robot.clone());
    op.set_joint_indices(&[0]).unwrap();
    op.set_interp_mode(InterpMode::Raw);
    op.add_waypoints(&[[0.001], [0.002], [0.003], [0.004]])
        .unwrap();

    let sender = send_in_background(op, Instruction::Run);
    tick_until_loaded(&mut player, &mut clock, &sender);
    sender.join().unwrap().1.unwrap();
    assert_eq!(player.trajectory().len(), 5);
    assert_eq!(player.index(), 0);

    for _ in 0..10 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.index(), 4);
    assert_eq!(sink.last_position(0), Some(0.004));

    publish_instruction(&bus, Instruction::Reverse);
    for _ in 0..10 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.current_instruction(), Instruction::Reverse);
    assert_eq!(player.index(), 0);
    assert_eq!(sink.last_position(0), Some(0.0));

    publish_instruction(&bus, Instruction::Pause);
    for _ in 0..3 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.current_instruction(), Instruction::Pause);
    assert_eq!(player.index(), 0);
}

#[test]
fn test_discontinuous_start_is_rejected() {
    let bus = MemoryBus::new();
    // Player 看到的关节 2 在 0.10，Operator 以为它在 0.20
    let measured = MockJointState::with_values([(0, 0.0), (2, 0.10), (3, 0.0)]);
    let stale = MockJointState::with_values([(0, 0.0), (2, 0.20), (3, 0.0)]);
    let sink = RecordingCommandSink::new();
    let mut player = player(&bus, measured, sink.clone());
    let mut clock = TickClock::new(200.0);

    let mut op = operator(&bus, stale);
    op.set_joint_indices(&[0, 2]).unwrap();
    op.add_waypoint(&[0.2, 0.3]).unwrap();

    let sender = send_in_background(op, Instruction::Run);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !sender.is_finished() {
        assert!(player.step_at(clock.tick()));
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
    // 传输本身成功，拒绝发生在接收之后
    sender.join().unwrap().1.unwrap();
    assert!(player.step_at(clock.tick()));

    assert_eq!(player.current_instruction(), Instruction::Quit);
    assert_eq!(player.incoming_instruction(), Instruction::Quit);
    assert!(!player.is_loaded());
    assert!(sink.claimed().is_empty());
    assert!(
        !sink
            .commands()
            .iter()
            .any(|c| matches!(c, Command::Position(..)))
    );
}

#[test]
fn test_quit_releases_joints() {
    let bus = MemoryBus::new();
    let robot = MockJointState::with_values([(0, 0.0), (3, 0.0)]);
    let sink = RecordingCommandSink::following(robot.clone());
    let mut player = player(&bus, robot.clone(), sink.clone());
    let mut clock = TickClock::new(200.0);

    let mut op = operator(&bus, robot.clone());
    op.set_joint_indices(&[0, 3]).unwrap();
    op.add_waypoint(&[0.2, -0.2]).unwrap();

    let sender = send_in_background(op, Instruction::Pause);
    tick_until_loaded(&mut player, &mut clock, &sender);
    let (mut op, result) = sender.join().unwrap();
    result.unwrap();

    // Load：停在第 0 帧
    assert_eq!(player.current_instruction(), Instruction::Pause);
    for _ in 0..5 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.index(), 0);

    op.send_instruction(Instruction::Run).unwrap();
    for _ in 0..5 {
        assert!(player.step_at(clock.tick()));
    }
    assert_eq!(player.current_instruction(), Instruction::Run);
    assert_eq!(player.index(), 5);

    op.send_instruction(Instruction::Quit).unwrap();
    assert!(player.step_at(clock.tick()));
    assert_eq!(player.current_instruction(), Instruction::Quit);
    assert!(!player.is_loaded());
    assert!(sink.claimed().is_empty());

    // Quit 之后保持空闲
    sink.clear();
    for _ in 0..5 {
        assert!(player.step_at(clock.tick()));
    }
    assert!(sink.commands().is_empty());
}

#[test]
fn test_reload_releases_unused_joints() {
    let bus = MemoryBus::new();
    let robot = MockJointState::with_values([(0, 0.0), (2, 0.0), (3, 0.0)]);
    let sink = RecordingCommandSink::following(robot.clone());
    let mut player = player(&bus, robot.clone(), sink.clone());
    let mut clock = TickClock::new(200.0);

    let mut op = operator(&bus, robot.clone());
    op.set_joint_indices(&[0, 2]).unwrap();
    op.add_waypoint(&[0.1, 0.1]).unwrap();
    let sender = send_in_background(op, Instruction::Run);
    tick_until_loaded(&mut player, &mut clock, &sender);
    let (mut op, result) = sender.join().unwrap();
    result.unwrap();
    assert_eq!(sink.claimed(), vec![0, 2]);

    // 播放到末尾，测量值停在最后一帧
    let len = player.trajectory().len();
    while player.index() + 1 < len {
        assert!(player.step_at(clock.tick()));
    }

    // 第二条轨迹从当前测量值开始，只用关节 0 / 3
    op.set_joint_indices(&[0, 3]).unwrap();
    op.clear_waypoints();
    op.add_waypoint(&[-0.1, -0.1]).unwrap();
    let sender = send_in_background(op, Instruction::Load);
    let deadline = Instant::now() + Duration::from_secs(5);
    while player.current_instruction() != Instruction::Pause {
        assert!(player.step_at(clock.tick()));
        assert!(Instant::now() < deadline, "second trajectory never loaded");
        thread::sleep(Duration::from_millis(1));
    }
    sender.join().unwrap().1.unwrap();

    assert_eq!(sink.claimed(), vec![0, 3]);
    assert!(sink.commands().contains(&Command::Release(2)));
    assert_eq!(player.index(), 0);
}
