pub mod client;

pub use client::{file_matches, TransferEngine, TransferProgress, TransferSink};
