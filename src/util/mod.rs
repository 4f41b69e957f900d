//! Text helpers.
//!
//! - **Extraction**: plain text out of HTML feed descriptions
//! - **Terminal safety**: strip control characters and escape sequences from
//!   feed-supplied text, truncate by display width

mod text;

pub use text::{extract_text, strip_control_chars, truncate_to_width};
