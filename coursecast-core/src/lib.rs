#![doc = "coursecast-core: core logic library for coursecast."]

//! This crate contains the scanning, packaging, splitting and delivery logic for
//! coursecast. Network transports live in the binary crate and plug in through
//! [`contract::Transport`].
//!
//! # Usage
//! Scan a course folder with [`scanner::Scanner`], open a
//! [`ledger::ProgressLedger`] for it, then hand everything to
//! [`pipeline::Pipeline::run`].

pub mod captions;
pub mod chunker;
pub mod config;
pub mod contract;
pub mod error;
pub mod ledger;
pub mod media;
pub mod model;
pub mod natural_sort;
pub mod orchestrator;
pub mod packager;
pub mod pipeline;
pub mod scanner;
pub mod segmenter;

pub use config::{PipelineConfig, RetryPolicy};
pub use error::PipelineError;
pub use ledger::ProgressLedger;
pub use model::{Course, Module, Video};
pub use pipeline::{DeliveryReport, Pipeline};
pub use scanner::Scanner;
