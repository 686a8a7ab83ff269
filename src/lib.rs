//! Unified front door for multiple LLM providers: routing, provider
//! adapters, request orchestration, conversation context persistence,
//! resilience, auth, and audit.

pub mod adapters;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod resilience;
pub mod routes;
pub mod routing;
pub mod security;
pub mod state;
pub mod storage;
pub mod telemetry;
