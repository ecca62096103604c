//! Well-known attribute names for IMF documents.
//!
//! These constants define the standard attribute names used throughout the
//! format for page image geometry and text stream typing.

// Page image geometry attributes (values are decimal u16)
/// Width of the originally scanned bitmap, in pixels
pub const ORIGINAL_WIDTH: &str = "originalWidth";
/// Height of the originally scanned bitmap, in pixels
pub const ORIGINAL_HEIGHT: &str = "originalHeight";
/// Resolution of the originally scanned bitmap
pub const ORIGINAL_DPI: &str = "originalDpi";
/// Resolution of the stored bitmap after any rescaling
pub const CURRENT_DPI: &str = "currentDpi";

// Crop edges, in pixels of the current bitmap
/// Pixels cropped off the left edge
pub const LEFT_EDGE: &str = "leftEdge";
/// Pixels cropped off the right edge
pub const RIGHT_EDGE: &str = "rightEdge";
/// Pixels cropped off the top edge
pub const TOP_EDGE: &str = "topEdge";
/// Pixels cropped off the bottom edge
pub const BOTTOM_EDGE: &str = "bottomEdge";

/// Text stream type of word chains that never got an explicit tag
pub const DEFAULT_TEXT_STREAM: &str = "mainText";
