pub mod window;

pub use window::{resolve_reference_date, TimeWindow};
