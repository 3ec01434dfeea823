// Library root for the Aegis GRC service

pub mod api;
pub mod auth;
pub mod config;
pub mod core;
pub mod db;
pub mod domain;
pub mod iam;
pub mod loader;
pub mod reporting;
pub mod store;
