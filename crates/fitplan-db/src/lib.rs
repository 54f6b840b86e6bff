//! PostgreSQL persistence for owned plan records and the user's active-plan
//! pointers.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
