//! Internship portal API: submission workflow, task administration, account
//! recovery and the listing engine that the portal views are built on.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod listing;
pub mod models;
pub mod routes;
pub mod state;
pub mod storage;
pub mod store;
pub mod workflow;
