//! # Specimen Tracker
//!
//! Tracks projects, samples, processing methods, the append-only stage log
//! of each sample and the files uploaded against each stage, from upload
//! through archival to cleanup.

pub mod allocator;
pub mod checksum;
pub mod lifecycle;
pub mod resolver;
pub mod sequencer;
pub mod store;
pub mod sweepers;
pub mod tracker;
pub mod tx;

pub use lifecycle::FileLifecycle;
pub use resolver::SampleResolver;
pub use sequencer::{NewStage, StageListing};
pub use store::{FileFilter, Lookup, Store};
pub use sweepers::{make_sweeper, SweepReport, Sweeper};
pub use tracker::Tracker;
