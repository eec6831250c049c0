//! Podcast video pipeline
//!
//! Turns a podcast job's audio and configuration into a finished video:
//! conversation audio is mixed with overlapping interjections, segments are
//! composed with ffmpeg (or rendered by an external avatar service) and the
//! final assembler joins them with crossfades. A periodic scanner drives
//! unfinished jobs through these stages with bounded retries.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
