#![doc = "mendeley-uploader-core: core logic library for mendeley-uploader."]

//! Everything here is independent of the HTTP stack: the contract traits the pipeline
//! talks through, the PDF scanner, the outcome ledger, retry policy, run monitor and
//! the batch orchestration itself.
//!
//! # Usage
//! Implement [`contract::TokenSource`] and [`contract::Library`] for a real backend,
//! claim a [`monitor::RunGuard`], and hand both to [`batch::upload_batch`].

pub mod batch;
pub mod config;
pub mod contract;
pub mod ledger;
pub mod monitor;
pub mod retry;
pub mod scan;
