pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod output;
pub mod types;
