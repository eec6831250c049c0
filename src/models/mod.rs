pub mod conversation;
pub mod job;
pub mod render;
pub mod segment;
