//! Value types for light control parameters.

mod hsbk;
mod power;

pub use hsbk::Hsbk;
pub use power::PowerMode;
