pub mod contract;
pub mod persona;
pub mod recommendation;
pub mod records;
pub mod signals;
