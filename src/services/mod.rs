pub mod ffmpeg;
pub mod heygen;
pub mod lock;
