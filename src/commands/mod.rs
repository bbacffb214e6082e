pub mod map;
pub mod status;
