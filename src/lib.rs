pub mod access;
pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod retry;
pub mod sanitize;
pub mod services;
pub mod testing;
pub mod types;
