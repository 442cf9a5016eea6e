pub mod archive;
pub mod atomic;
pub mod config;
pub mod health;
pub mod logger;
pub mod parse;
pub mod repo_status;
pub mod runner;
pub mod settings;
pub mod staleness;
pub mod walk;
