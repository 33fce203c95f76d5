pub mod api;
pub mod codename;
pub mod config;
pub mod connections;
pub mod jobs;
pub mod media;
pub mod protocol;
pub mod state_store;
pub mod storage;
