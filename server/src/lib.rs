//! Team task tracker server library: realtime channel, team chat and task routes.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod db;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod teams;
pub mod ws;
