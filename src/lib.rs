extern crate diesel;

// Provider account management
pub mod admin;
// Chain access and router bindings
pub mod chain;
// Configuration
pub mod config;
// Constants and metrics
pub mod constants;
// DEX price aggregation
pub mod dex;
// Endpoint grammar
pub mod endpoint;
// Error handling
pub mod error;
// Event ingestion
pub mod indexing;
// Database models
pub mod models;
// Price resolution and job scheduling
pub mod processing;
// Database schema
pub mod schema;
// Admin and metrics server
pub mod server;
// Persistence
pub mod store;
// Transaction submission
pub mod submitter;
// Types
pub mod types;
// Utils
pub mod utils;

#[cfg(test)]
mod tests;
