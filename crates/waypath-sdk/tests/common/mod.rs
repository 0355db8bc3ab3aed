//! 集成测试共用的描述、配置和时钟

#![allow(dead_code)]

use std::time::{Duration, Instant};
use waypath_sdk::prelude::*;

/// 三个关节（槽位 0 / 2 / 3），200 Hz
pub const DESCRIPTION: &str = r#"
frequency = 200.0

[[joints]]
name = "RSP"
index = 0
min_position = -2.0
max_position = 2.0
nominal_speed = 1.0
max_speed = 2.0
nominal_accel = 0.8
max_accel = 4.0

[[joints]]
name = "RSR"
index = 2
min_position = -1.5
max_position = 1.5
nominal_speed = 1.0
max_speed = 2.0
nominal_accel = 0.8
max_accel = 4.0

[[joints]]
name = "REP"
index = 3
min_position = -2.5
max_position = 0.5
nominal_speed = 1.2
max_speed = 2.5
nominal_accel = 1.0
max_accel = 5.0
"#;

pub fn description() -> RobotDescription {
    RobotDescription::from_toml_str(DESCRIPTION).unwrap()
}

pub fn transfer_config() -> TransferConfig {
    TransferConfig {
        max_wait: Duration::from_secs(2),
        ready_attempts: 40,
        ready_poll: Duration::from_millis(50),
    }
}

pub fn player_config() -> PlayerConfig {
    PlayerConfig {
        transfer: transfer_config(),
        ..PlayerConfig::default()
    }
}

/// 每次 `tick()` 前进一个控制周期的合成时钟
pub struct TickClock {
    now: Instant,
    period: Duration,
}

impl TickClock {
    pub fn new(frequency: f64) -> Self {
        Self {
            now: Instant::now(),
            period: Duration::from_secs_f64(1.0 / frequency),
        }
    }

    pub fn tick(&mut self) -> Instant {
        self.now += self.period;
        self.now
    }
}
