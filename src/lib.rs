//! Market predictor: an autonomous forecasting agent for a prediction-market
//! platform.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod gateway;
pub mod sentiment;
pub mod strategy;
pub mod engine;
pub mod scoring;
pub mod storage;
pub mod dashboard;
