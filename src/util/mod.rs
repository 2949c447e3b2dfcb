//! Text helpers shared by categories and remote sources.

mod text;

pub use text::{clean_label, strip_control_chars};
