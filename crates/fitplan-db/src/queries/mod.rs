//! Query modules, one per table.

pub mod plans;
pub mod users;
