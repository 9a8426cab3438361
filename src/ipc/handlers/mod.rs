pub mod calculator;
pub mod core;
pub mod datewise;
pub mod plan;
pub mod session;
pub mod setup;
