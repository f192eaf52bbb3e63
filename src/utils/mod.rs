pub mod progress;

pub use progress::{
    SpeedEstimator,
    display_percent,
    format_bytes,
    format_speed,
    ZERO_SPEED,
};
