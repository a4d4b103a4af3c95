pub mod attachment;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod inbox;
pub mod ledger;
pub mod message;
pub mod messaging;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod retry;
pub mod rubric;
pub mod tracking;
