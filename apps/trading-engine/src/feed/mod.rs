//! Market data feed plumbing: tick-to-bar conversion.

mod bar_detector;

pub use bar_detector::BarDetector;
