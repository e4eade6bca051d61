//! Scan planning and stream post-processing

pub mod plan;
pub mod shuffle;

pub use plan::{plan, ColorMode, RectMm, ScanParameters, ScanRequest, Source};
pub use shuffle::{swap_red_blue, ColorShuffle, LineAssembler};
