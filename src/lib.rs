pub mod analytics;
pub mod api;
pub mod auth;
pub mod classifier;
pub mod cloak;
pub mod config;
pub mod models;
pub mod recorder;
pub mod redirect;
pub mod resolver;
pub mod rotation;
pub mod storage;
