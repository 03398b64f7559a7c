//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **CooperativeIdleScheduler** / **DelayIdleScheduler**: IdleScheduler
//! - **NoAccelerator** / **KernelAccelerator**: Accelerator

pub mod accelerator;
pub mod idle;

pub use self::accelerator::{KernelAccelerator, NoAccelerator};
pub use self::idle::{CooperativeIdleScheduler, DelayIdleScheduler};
