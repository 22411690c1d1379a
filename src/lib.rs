//! seq-llm - Supervise local inference servers and stream chat replies.

pub mod chat;
pub mod commands;
pub mod config;
pub mod display;
pub mod supervisor;
