pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod service;
pub mod sql;
pub mod time;
pub mod validate;
pub mod wal;
pub mod wire;
