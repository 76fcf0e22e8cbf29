//! Lead marketplace engine: geographic partner matching, tier-priority
//! lead assignment with weekly load balancing, and invoice/income
//! aggregation over frozen assignment prices.

pub mod assignment;
pub mod audit;
pub mod billing;
pub mod config;
pub mod db;
pub mod eligibility;
pub mod errors;
pub mod geo;
pub mod handlers;
pub mod income;
pub mod matching;
pub mod models;
pub mod notifier;
pub mod settings;
