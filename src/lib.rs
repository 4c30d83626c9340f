pub mod aggregation;
pub mod config;
pub mod dataset;
pub mod elo;
pub mod error;
pub mod export;
pub mod features;
pub mod filters;
pub mod games;
pub mod logging;
pub mod pipeline;
pub mod roster;
pub mod table;
