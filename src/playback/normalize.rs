//! Contrast stretch for amplitude values before display.

/// Default lower threshold: anything quieter shows as empty.
pub const DEFAULT_LOW: f64 = 0.1;
/// Default upper threshold: anything louder shows as full.
pub const DEFAULT_HIGH: f64 = 0.8;

/// Maps `value` linearly from `[low, high]` onto `[0, 1]`, clamping outside.
pub fn normalize(value: f64, low: f64, high: f64) -> f64 {
    if value <= low {
        0.0
    } else if value >= high {
        1.0
    } else {
        (value - low) / (high - low)
    }
}
