pub mod cache;
pub mod config;
pub mod error;
pub mod git;
pub mod lifecycle;
pub mod monitor;
pub mod notify;
pub mod remote;
pub mod repos;
pub mod services;
pub mod store;
pub mod terminal;
pub mod tracker;
