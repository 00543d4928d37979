//! Output formatting for run events.
//!
//! The [`Emitter`] trait consumes the events of a run. Two implementations
//! are provided:
//! - [`HumanReadableEmitter`]: live progress and a formatted summary on a terminal.
//! - [`JsonEmitter`]: one JSON object per line, suitable for machine consumption.

use std::io::{self, Write};

use crate::event::{Phase, TestEvent};
use crate::summary::Summary;

/// Consumer of run events.
pub trait Emitter {
    /// Called for every event, in order.
    fn on_event(&mut self, event: &TestEvent) -> io::Result<()>;
    /// Called when the event stream dropped `skipped` events because the
    /// emitter fell behind.
    fn on_lagged(&mut self, skipped: u64) -> io::Result<()>;
}

/// Emits human-readable progress and results to a writer.
pub struct HumanReadableEmitter<W: Write> {
    out: W,
    quiet: bool,
}

impl<W: Write> HumanReadableEmitter<W> {
    /// Create a new emitter writing to `out`.
    pub fn new(out: W) -> Self {
        HumanReadableEmitter { out, quiet: false }
    }

    /// Only print the summary and errors.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn summary(&mut self, s: &Summary) -> io::Result<()> {
        writeln!(self.out, "\nTest results\n")?;
        writeln!(
            self.out,
            "{:>10}: {} ({}, {})",
            "Server", s.host.name, s.host.sponsor, s.host.country
        )?;
        writeln!(self.out, "{:>10}: {}", "Network", s.network.describe())?;
        writeln!(self.out, "{:>10}: {} ms", "Latency", s.latency_ms)?;
        let na = "n/a".to_string();
        writeln!(
            self.out,
            "{:>10}: {}",
            "Download",
            s.download.as_ref().map_or(&na, |d| &d.display)
        )?;
        writeln!(
            self.out,
            "{:>10}: {}",
            "Upload",
            s.upload.as_ref().map_or(&na, |u| &u.display)
        )?;
        Ok(())
    }
}

impl<W: Write> Emitter for HumanReadableEmitter<W> {
    fn on_event(&mut self, event: &TestEvent) -> io::Result<()> {
        match event {
            TestEvent::Completed { summary } => return self.summary(summary),
            TestEvent::Failed { error } => {
                writeln!(self.out, "\ntest failed: {error}")?;
                return Ok(());
            }
            _ if self.quiet => return Ok(()),
            TestEvent::PhaseChanged { phase } => match phase {
                Phase::FindingHost => write!(self.out, "\rfinding host")?,
                Phase::TestingDownload => write!(self.out, "\rstarting download")?,
                Phase::TestingUpload => write!(self.out, "\rstarting upload")?,
                _ => {}
            },
            TestEvent::HostSelected { host } => {
                writeln!(
                    self.out,
                    "\rhosted by {} ({}) [{}]",
                    host.sponsor, host.name, host.address
                )?;
            }
            TestEvent::LatencyMeasured { latency_ms } => {
                writeln!(self.out, "latency: {latency_ms} ms")?;
            }
            TestEvent::DownloadProgress { sample } | TestEvent::UploadProgress { sample } => {
                write!(
                    self.out,
                    "\r{:>12} (avg. {:>12})",
                    sample.instantaneous.to_string(),
                    sample.average.to_string()
                )?;
            }
            TestEvent::DownloadFinished { result } => {
                writeln!(self.out, "\rdownload: {:<30}", result.to_string())?;
            }
            TestEvent::UploadFinished { result } => {
                writeln!(self.out, "\rupload: {:<30}", result.to_string())?;
            }
        }
        self.out.flush()
    }

    fn on_lagged(&mut self, _skipped: u64) -> io::Result<()> {
        Ok(())
    }
}

/// Emits one JSON object per line for each event.
pub struct JsonEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Create a new JSON emitter writing to `out`.
    pub fn new(out: W) -> Self {
        JsonEmitter { out }
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn on_event(&mut self, event: &TestEvent) -> io::Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.out, "{}", json)
    }

    fn on_lagged(&mut self, skipped: u64) -> io::Result<()> {
        let json = serde_json::json!({ "type": "lagged", "skipped": skipped });
        writeln!(self.out, "{}", json)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Error;
    use crate::host::Host;
    use crate::measurement::{BandwidthMeasurement, Unit};
    use crate::network::NetworkInfo;
    use crate::summary::SubtestSummary;
    use crate::transfer::TransferSample;

    fn summary() -> Summary {
        Summary {
            host: Host::fallback(),
            latency_ms: 42,
            download: Some(SubtestSummary::from(&BandwidthMeasurement::new(
                320.0,
                Unit::MegabitsPerSecond,
            ))),
            upload: None,
            network: NetworkInfo::cellular("Telia", "LTE"),
        }
    }

    #[test]
    fn human_readable_progress() {
        let mut buf = Vec::new();
        let mut emitter = HumanReadableEmitter::new(&mut buf);

        let sample = TransferSample {
            instantaneous: BandwidthMeasurement::new(8_000_000.0, Unit::BitsPerSecond),
            average: BandwidthMeasurement::new(4_500.0, Unit::KilobitsPerSecond),
            bytes_delta: 1_000_000,
            total_bytes: 9_000_000,
            elapsed: Duration::from_secs(2),
        };
        emitter.on_event(&TestEvent::DownloadProgress { sample }).unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("8.0 Mbps"));
        assert!(out.contains("4.5 Mbps"));
    }

    #[test]
    fn human_readable_summary() {
        let mut buf = Vec::new();
        let mut emitter = HumanReadableEmitter::new(&mut buf).quiet(true);

        emitter.on_event(&TestEvent::LatencyMeasured { latency_ms: 7 }).unwrap();
        emitter.on_event(&TestEvent::Completed { summary: summary() }).unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert!(!out.contains("latency: 7"));
        assert!(out.contains("320.0 Mbps"));
        assert!(out.contains("Upload: n/a"));
        assert!(out.contains("cellular (Telia, LTE)"));
    }

    #[test]
    fn human_readable_failure() {
        let mut buf = Vec::new();
        let mut emitter = HumanReadableEmitter::new(&mut buf);
        emitter
            .on_event(&TestEvent::Failed { error: Error::Timeout })
            .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("test failed: timeout occured"));
    }

    #[test]
    fn json_emitter_valid() {
        let mut buf = Vec::new();
        let mut emitter = JsonEmitter::new(&mut buf);

        emitter
            .on_event(&TestEvent::PhaseChanged {
                phase: Phase::TestingUpload,
            })
            .unwrap();
        emitter.on_lagged(3).unwrap();

        let out = String::from_utf8(buf).unwrap();
        let mut lines = out.lines();

        let res = serde_json::from_str::<serde_json::Value>(lines.next().unwrap()).unwrap();
        assert_eq!(res["type"], "phase_changed");
        assert_eq!(res["phase"]["state"], "testing_upload");

        let res = serde_json::from_str::<serde_json::Value>(lines.next().unwrap()).unwrap();
        assert_eq!(res["type"], "lagged");
        assert_eq!(res["skipped"], 3);
    }
}
