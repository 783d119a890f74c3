pub mod interval;

pub use interval::{
    timestamp_now, CloseReason, Interruption, InterruptionKind, Interval, IntervalStatus,
    TabContext,
};
