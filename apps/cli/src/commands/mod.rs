//! 命令定义和实现

pub mod check;
pub mod config;
pub mod demo;
pub mod interpolate;

pub use check::CheckCommand;
pub use config::ConfigCommand;
pub use demo::DemoCommand;
pub use interpolate::InterpolateCommand;
