//! CLI commands module

pub mod ask;
pub mod context;
pub mod evaluate;
pub mod grammar;
pub mod services;
