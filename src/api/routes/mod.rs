//! Route handlers grouped by resource

pub mod health;
pub mod monitoring;
pub mod query;
pub mod servers;
