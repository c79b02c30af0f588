//! Stream metadata: charset decoding, rule-based parsing and the
//! per-interval [`TrackInfo`].

pub mod codeset;
pub mod rules;
pub mod track;

pub use codeset::Codeset;
pub use rules::{ParsedMetadata, RuleSet};
pub use track::{compose_icy_block, parse_icy_payload, stream_title_bytes, TrackInfo};
