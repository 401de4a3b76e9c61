//! Timed on/off cycles with per-device queueing

pub mod scheduler;

pub use self::scheduler::{
    CycleEvent, CycleOutcome, CycleScheduler, CycleStatus, SchedulerConfig, StopOutcome,
};
