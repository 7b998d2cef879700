//! Role-gated producer/consumer channel and a timer-driven sampling device
//! that drains into FIFO consumer queues.

pub mod channel;
pub mod config;
pub mod drain;
pub mod error;
pub mod gate;
pub mod logger;
pub mod modtimer;
pub mod producer;
pub mod queue;
pub mod ring;
pub mod sync;
pub mod timer;
pub mod workqueue;

pub use channel::{BoundedChannel, ChannelSession};
pub use config::{ConfigField, Limits, ModuleConfig, SharedConfig, TimerSettings, Variant};
pub use error::{Error, Result};
pub use gate::Role;
pub use modtimer::{TimerModule, TimerSession};
pub use sync::Interrupt;
