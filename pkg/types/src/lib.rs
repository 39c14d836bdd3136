pub mod config;
pub mod meta;
pub mod pod;
pub mod revision;
pub mod statefulset;
pub mod volume;
