pub mod app;
pub mod assistant;
pub mod auth;
pub mod channels;
pub mod config;
pub mod contexts;
pub mod error;
pub mod handlers;
pub mod insights;
pub mod invite;
pub mod llm;
pub mod mention;
pub mod notify;
pub mod policy;
pub mod prompting;
pub mod realtime;
pub mod store;
pub mod tasks;
pub mod types;
pub mod ws;
