//! Terminal renderings of the loudness value produced each playback tick.
//!
//! `bar` draws a single mirrored line in place on stdout; `meter` takes over
//! the screen with a scrolling history.

pub mod bar;
pub mod meter;

pub use bar::BarPrinter;
pub use meter::{MeterCommand, MeterTui};
