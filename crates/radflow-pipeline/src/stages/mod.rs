//! Built-in stage transforms.

pub mod raw;
pub mod time_avg;

pub use raw::RawStage;
pub use time_avg::TimeAvgStage;
