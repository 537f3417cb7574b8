pub mod config;
pub mod logging;

pub mod control;
pub mod download;
pub mod engine;
pub mod janitor;
pub mod job;
pub mod playlist;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod upstream;
pub mod user_error;
