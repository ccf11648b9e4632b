pub mod config;
pub mod dto;
pub mod engine;
pub mod http;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod reaper;
pub mod wal;
