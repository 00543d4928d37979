//! End-to-end runs of the measurement pipeline against scripted
//! collaborators. Time is paused, so every run finishes instantly and
//! the measured rates are exact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::time::Instant;
use url::Url;

use speedprobe::error::{Error, Result};
use speedprobe::event::{Phase, TestEvent};
use speedprobe::host::Host;
use speedprobe::latency::LatencyProber;
use speedprobe::locate::HostProvider;
use speedprobe::network::{NetworkInfo, StaticNetwork};
use speedprobe::orchestrator::{SpeedTest, SpeedTestBuilder};
use speedprobe::transport::{ChunkStream, Transport};

/// (bytes, delay in ms before the chunk)
type Script = std::result::Result<Vec<(u64, u64)>, Error>;

fn paced(script: &Script) -> Result<ChunkStream> {
    let chunks = script.clone()?;
    Ok(stream::iter(chunks)
        .then(|(bytes, delay)| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(bytes)
        })
        .boxed())
}

struct ScriptedTransport {
    download: Script,
    upload: Script,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn download(&self, _url: Url, _timeout: Duration) -> Result<ChunkStream> {
        paced(&self.download)
    }

    async fn upload(&self, _url: Url, _size: u64, _timeout: Duration) -> Result<ChunkStream> {
        paced(&self.upload)
    }
}

/// Answers after the configured latency; unknown hosts fail.
struct ScriptedProber(HashMap<String, u64>);

#[async_trait]
impl LatencyProber for ScriptedProber {
    async fn measure_latency(&self, host: &Host, _timeout: Duration) -> Result<u64> {
        let ms = *self
            .0
            .get(&host.address)
            .ok_or_else(|| Error::RequestFailed(format!("{} unreachable", host.address)))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ms)
    }
}

struct ScriptedHosts(std::result::Result<Vec<Host>, Error>);

/// Never answers within the discovery deadline.
struct StalledHosts;

#[async_trait]
impl HostProvider for StalledHosts {
    async fn fetch_hosts(&self, _timeout: Duration) -> Result<Vec<Host>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![host("late.example:8080")])
    }
}

#[async_trait]
impl HostProvider for ScriptedHosts {
    async fn fetch_hosts(&self, _timeout: Duration) -> Result<Vec<Host>> {
        self.0.clone()
    }
}

fn host(address: &str) -> Host {
    Host {
        id: address.into(),
        url: format!("http://{address}/speedtest/upload.php"),
        name: address.into(),
        country: "Sweden".into(),
        country_code: "SE".into(),
        address: address.into(),
        sponsor: "Test".into(),
        distance_km: 1.0,
    }
}

fn prober(latencies: &[(&str, u64)]) -> Arc<ScriptedProber> {
    Arc::new(ScriptedProber(
        latencies.iter().map(|(a, ms)| (a.to_string(), *ms)).collect(),
    ))
}

/// 80 MB in 2 s after a 100 ms connect.
fn download_script() -> Script {
    Ok(vec![
        (16_000_000, 100),
        (16_000_000, 500),
        (16_000_000, 500),
        (16_000_000, 500),
        (16_000_000, 500),
    ])
}

/// 80 MB in 4 s.
fn upload_script() -> Script {
    Ok(vec![
        (16_000_000, 0),
        (16_000_000, 1000),
        (16_000_000, 1000),
        (16_000_000, 1000),
        (16_000_000, 1000),
    ])
}

fn builder(download: Script, upload: Script) -> SpeedTestBuilder {
    let fallback = Host::fallback().address;
    SpeedTest::builder("pipeline-test", "1.0")
        .latency_prober(prober(&[(fallback.as_str(), 42)]))
        .transport(Arc::new(ScriptedTransport { download, upload }))
}

async fn collect(rx: &mut Receiver<TestEvent>) -> Vec<(Instant, TestEvent)> {
    let mut events = Vec::new();
    loop {
        match rx.recv().await {
            Ok(event) => events.push((Instant::now(), event)),
            Err(RecvError::Closed) => return events,
            Err(RecvError::Lagged(n)) => panic!("lagged by {n}"),
        }
    }
}

fn phases(events: &[(Instant, TestEvent)]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|(_, e)| match e {
            TestEvent::PhaseChanged { phase } => Some(phase.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn full_run_against_fallback_host() {
    let speedtest = builder(download_script(), upload_script())
        .network_info(Arc::new(StaticNetwork(NetworkInfo::cellular("Telia", "LTE"))))
        .build()
        .unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;
    let summary = run.wait().await.unwrap().unwrap();

    assert_eq!(
        phases(&events),
        vec![
            Phase::FindingHost,
            Phase::MeasuringLatency,
            Phase::TestingDownload,
            Phase::TestingUpload,
            Phase::Completed,
        ]
    );

    let selected = events.iter().find_map(|(_, e)| match e {
        TestEvent::HostSelected { host } => Some(host.clone()),
        _ => None,
    });
    assert_eq!(selected, Some(Host::fallback()));
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::LatencyMeasured { latency_ms: 42 })));

    let downloads = events
        .iter()
        .filter(|(_, e)| matches!(e, TestEvent::DownloadProgress { .. }))
        .count();
    let uploads = events
        .iter()
        .filter(|(_, e)| matches!(e, TestEvent::UploadProgress { .. }))
        .count();
    assert_eq!(downloads, 4);
    assert_eq!(uploads, 4);

    let download_done = events
        .iter()
        .find_map(|(at, e)| match e {
            TestEvent::DownloadFinished { result } => Some((*at, result.to_string())),
            _ => None,
        })
        .unwrap();
    assert_eq!(download_done.1, "320.0 Mbps");
    let upload_started = events
        .iter()
        .find_map(|(at, e)| match e {
            TestEvent::PhaseChanged {
                phase: Phase::TestingUpload,
            } => Some(*at),
            _ => None,
        })
        .unwrap();
    assert!(upload_started - download_done.0 >= Duration::from_millis(450));

    assert!(matches!(events.last(), Some((_, TestEvent::Completed { .. }))));
    assert_eq!(summary.latency_ms, 42);
    assert_eq!(summary.download.unwrap().display, "320.0 Mbps");
    assert_eq!(summary.upload.unwrap().display, "160.0 Mbps");
    assert_eq!(summary.network.describe(), "cellular (Telia, LTE)");

    let record = speedtest.snapshot();
    assert_eq!(record.phase, Phase::Completed);
    assert_eq!(record.upload.unwrap().to_string(), "160.0 Mbps");
    assert!(!speedtest.is_running());
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_while_running() {
    let speedtest = builder(download_script(), upload_script()).build().unwrap();

    let mut run = speedtest.start().unwrap();
    assert_eq!(speedtest.start().err(), Some(Error::TestInProgress));
    assert!(speedtest.is_running());

    let events = collect(&mut run.events).await;
    assert_eq!(phases(&events).last(), Some(&Phase::Completed));
    assert!(run.wait().await.unwrap().is_ok());

    // a finished run frees the engine
    let mut again = speedtest.start().unwrap();
    collect(&mut again.events).await;
    assert!(again.wait().await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn latency_timeout_fails_the_run() {
    let fallback = Host::fallback().address;
    let speedtest = builder(download_script(), upload_script())
        .latency_prober(prober(&[(fallback.as_str(), 60_000)]))
        .build()
        .unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;

    assert_eq!(
        phases(&events),
        vec![
            Phase::FindingHost,
            Phase::MeasuringLatency,
            Phase::Failed(Error::Timeout),
        ]
    );
    assert!(matches!(
        events.last(),
        Some((_, TestEvent::Failed { error: Error::Timeout }))
    ));
    match run.wait().await {
        Some(Err(error)) => assert_eq!(error, Error::Timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(speedtest.snapshot().phase, Phase::Failed(Error::Timeout));
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_download_returns_to_idle() {
    let slow = Ok((0..100).map(|_| (1_000_000, 100)).collect());
    let speedtest = builder(slow, upload_script()).build().unwrap();

    let mut run = speedtest.start().unwrap();
    loop {
        match run.events.recv().await.unwrap() {
            TestEvent::DownloadProgress { .. } => break,
            _ => continue,
        }
    }
    assert!(speedtest.cancel());
    assert!(!speedtest.cancel());

    assert_eq!(run.events.recv().await.unwrap_err(), RecvError::Closed);
    assert!(run.wait().await.is_none());

    let record = speedtest.snapshot();
    assert_eq!(record.phase, Phase::Idle);
    assert!(record.download.is_none());

    // nothing from the cancelled run leaks into the state later on
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(speedtest.snapshot().phase, Phase::Idle);
    assert!(speedtest.subscribe().is_none());
    assert!(speedtest.start().is_ok());
}

#[tokio::test(start_paused = true)]
async fn spiking_instantaneous_rate_is_not_published() {
    // the third chunk moves 70 MB in 100 ms: 5.6 Gbit/s instantaneous while
    // the average stays near 524 Mbit/s
    let spiky = Ok(vec![
        (1_000_000, 0),
        (1_000_000, 1_000),
        (70_000_000, 100),
        (1_000_000, 1_000),
    ]);
    let speedtest = builder(spiky, upload_script()).build().unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;

    let samples: Vec<_> = events
        .iter()
        .filter_map(|(_, e)| match e {
            TestEvent::DownloadProgress { sample } => Some(*sample),
            _ => None,
        })
        .collect();
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|s| {
        s.instantaneous.megabits_per_second() <= 5000.0 && s.average.megabits_per_second() <= 5000.0
    }));
    assert_eq!(samples[1].total_bytes, 73_000_000);
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::DownloadFinished { .. })));
    assert_eq!(phases(&events).last(), Some(&Phase::Completed));
}

#[tokio::test(start_paused = true)]
async fn transfer_without_duration_fails() {
    // everything arrives in one chunk, so no time passes after the first byte
    let burst = Ok(vec![(80_000_000, 100)]);
    let speedtest = builder(burst, upload_script()).build().unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;

    assert_eq!(
        phases(&events).last(),
        Some(&Phase::Failed(Error::UnknownError))
    );
    assert!(!events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::DownloadFinished { .. })));
    assert!(speedtest.snapshot().download.is_none());
}

#[tokio::test(start_paused = true)]
async fn implausible_final_result_is_withheld() {
    let burst = Ok(vec![(1_000, 0), (6_250_000, 1)]);
    let speedtest = builder(burst, upload_script()).build().unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;
    let summary = run.wait().await.unwrap().unwrap();

    assert!(!events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::DownloadFinished { .. })));
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::UploadFinished { .. })));
    assert!(summary.download.is_none());
    assert_eq!(summary.upload.unwrap().display, "160.0 Mbps");

    // the raw value is still on record
    let raw = speedtest.snapshot().download.unwrap();
    assert!(raw.megabits_per_second() > 5000.0);
}

#[tokio::test(start_paused = true)]
async fn upload_failure_keeps_download_result() {
    let broken = Err(Error::RequestFailed("connection reset".into()));
    let speedtest = builder(download_script(), broken).build().unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;

    let failed = Phase::Failed(Error::RequestFailed("connection reset".into()));
    assert_eq!(phases(&events).last(), Some(&failed));
    assert!(matches!(
        events.last(),
        Some((_, TestEvent::Failed { error: Error::RequestFailed(_) }))
    ));

    let record = speedtest.snapshot();
    assert_eq!(record.phase, failed);
    assert_eq!(record.latency_ms, Some(42));
    assert_eq!(record.download.unwrap().to_string(), "320.0 Mbps");
    assert!(record.upload.is_none());
}

#[tokio::test(start_paused = true)]
async fn discovered_hosts_are_ranked_by_latency() {
    let hosts = vec![host("a.example:8080"), host("b.example:8080"), host("c.example:8080")];
    let speedtest = builder(download_script(), upload_script())
        .host_provider(Arc::new(ScriptedHosts(Ok(hosts))))
        .latency_prober(prober(&[("a.example:8080", 50), ("b.example:8080", 30)]))
        .build()
        .unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;
    let summary = run.wait().await.unwrap().unwrap();

    assert_eq!(summary.host.address, "b.example:8080");
    assert_eq!(summary.latency_ms, 30);
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, TestEvent::LatencyMeasured { latency_ms: 30 })));
}

async fn selected_host(speedtest: &SpeedTest) -> (Host, Phase) {
    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;
    let host = events
        .iter()
        .find_map(|(_, e)| match e {
            TestEvent::HostSelected { host } => Some(host.clone()),
            _ => None,
        })
        .unwrap();
    (host, phases(&events).pop().unwrap())
}

#[tokio::test(start_paused = true)]
async fn empty_discovery_uses_fallback_host() {
    let speedtest = builder(download_script(), upload_script())
        .host_provider(Arc::new(ScriptedHosts(Ok(vec![]))))
        .build()
        .unwrap();

    let (host, last) = selected_host(&speedtest).await;
    assert_eq!(host, Host::fallback());
    assert_eq!(last, Phase::Completed);
}

#[tokio::test(start_paused = true)]
async fn stalled_discovery_uses_fallback_host() {
    let speedtest = builder(download_script(), upload_script())
        .host_provider(Arc::new(StalledHosts))
        .build()
        .unwrap();

    let started = Instant::now();
    let (host, last) = selected_host(&speedtest).await;
    assert_eq!(host, Host::fallback());
    assert_eq!(last, Phase::Completed);
    // gave up at the 30 s discovery deadline, not the provider's hour
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(30));
    assert!(waited < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn no_reachable_host_fails_the_run() {
    let hosts = vec![host("a.example:8080"), host("b.example:8080")];
    let speedtest = builder(download_script(), upload_script())
        .host_provider(Arc::new(ScriptedHosts(Ok(hosts))))
        .latency_prober(prober(&[]))
        .build()
        .unwrap();

    let mut run = speedtest.start().unwrap();
    let events = collect(&mut run.events).await;

    assert_eq!(
        phases(&events),
        vec![Phase::FindingHost, Phase::Failed(Error::HostNotFound)]
    );
}

#[tokio::test(start_paused = true)]
async fn find_host_and_check_ping_callbacks() {
    let speedtest = builder(download_script(), upload_script())
        .host_provider(Arc::new(ScriptedHosts(Err(Error::InvalidJson("eof".into())))))
        .build()
        .unwrap();

    let (tx, rx) = oneshot::channel();
    speedtest.check_ping_with(move |r| {
        let _ = tx.send(r);
    });
    assert_eq!(rx.await.unwrap(), Err(Error::HostNotFound));

    // broken discovery falls back to the well-known host
    let (tx, rx) = oneshot::channel();
    speedtest.find_host_with(move |r| {
        let _ = tx.send(r);
    });
    let (found, latency_ms) = rx.await.unwrap().unwrap();
    assert_eq!(found, Host::fallback());
    assert_eq!(latency_ms, 42);

    let (tx, rx) = oneshot::channel();
    speedtest.check_ping_with(move |r| {
        let _ = tx.send(r);
    });
    assert_eq!(rx.await.unwrap(), Ok(42));
    assert_eq!(speedtest.snapshot().phase, Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn find_host_after_run_starts_a_fresh_record() {
    let speedtest = builder(download_script(), upload_script()).build().unwrap();
    let mut run = speedtest.start().unwrap();
    collect(&mut run.events).await;
    assert!(speedtest.snapshot().download.is_some());

    let (found, latency_ms) = speedtest.find_host().await.unwrap();
    assert_eq!(found, Host::fallback());

    let record = speedtest.snapshot();
    assert_eq!(record.phase, Phase::Idle);
    assert_eq!(record.host, Some(found));
    assert_eq!(record.latency_ms, Some(latency_ms));
    assert!(record.download.is_none());
    assert!(record.upload.is_none());
}

#[test]
fn start_outside_runtime_leaves_engine_idle() {
    let speedtest = builder(download_script(), upload_script()).build().unwrap();

    assert_eq!(speedtest.start().err(), Some(Error::UnknownError));
    assert!(!speedtest.is_running());
    assert_eq!(speedtest.snapshot().phase, Phase::Idle);
}
