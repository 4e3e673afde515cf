// Library for tests and demos to access modules

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod maintenance_worker;
pub mod models;
pub mod scheduler;
pub mod store;
