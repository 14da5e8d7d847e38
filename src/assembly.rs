pub mod global;
pub mod local;
