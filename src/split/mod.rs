//! Track boundary detection: window geometry, silence search and Ogg pages.

pub mod finder;
pub mod geometry;
pub mod ogg;

pub use finder::{find_split, SplitPoint, VolumeSample};
pub use geometry::SplitGeometry;
pub use ogg::{OggComments, OggScanner, PageFlags};
