pub mod engine;
pub mod field_map;
pub mod runner;
pub mod signature;
