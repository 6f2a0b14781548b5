//! HTTP handlers for account-service.

pub mod auth;
pub mod group;
pub mod metrics;
pub mod permission;
pub mod social;
pub mod user;
