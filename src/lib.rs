//! A network bandwidth measurement engine.
//!
//! A run picks a measurement host (discovery plus latency ranking), measures
//! round-trip latency to it, then times a large download and a large upload
//! to estimate throughput. Progress and results are published on a typed
//! event channel; only one run can be active per [`orchestrator::SpeedTest`].
//!
//! # Quick start
//!
//! ```no_run
//! use speedprobe::event::TestEvent;
//! use speedprobe::orchestrator::SpeedTest;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let speedtest = SpeedTest::builder("my-app", "0.1.0").build()?;
//! let mut run = speedtest.start()?;
//!
//! while let Ok(event) = run.events.recv().await {
//!     if let TestEvent::DownloadProgress { sample } = event {
//!         println!("{}", sample.average);
//!     }
//! }
//! if let Some(outcome) = run.wait().await {
//!     println!("{:?}", outcome?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod download;
pub mod emitter;
pub mod error;
pub mod event;
pub mod host;
pub mod latency;
pub mod locate;
pub mod measurement;
pub mod network;
pub mod orchestrator;
pub mod params;
pub mod response;
pub mod summary;
pub mod transfer;
pub mod transport;
pub mod upload;
