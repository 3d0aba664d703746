//! Canvas generation dispatch
//!
//! This library provides the job queue shared by the canvas API server and
//! its GPU workers (atomic claims, priority order, stale-claim reclamation,
//! bounded retries) together with the liveness supervisor that keeps the
//! compute server and its public relay running.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod supervisor;
