//! The measurement pipeline.
//!
//! A [`SpeedTest`] runs discovery, latency, download, a short cooldown and
//! upload in that order, one run at a time. Progress is published on a
//! per-run broadcast channel that closes when the run ends or is cancelled.
//!
//! All run state sits behind one mutex. Every write made on behalf of a run
//! is tagged with that run's generation; `cancel` bumps the generation, so
//! anything a cancelled run still tries to publish is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::download::DownloadTester;
use crate::error::{Error, Result};
use crate::event::{Phase, TestEvent, TestRun};
use crate::host::Host;
use crate::latency::{self, HttpLatencyProber, LatencyProber};
use crate::locate::{FallbackHostProvider, HostProvider};
use crate::measurement::{BandwidthMeasurement, SanityFilter};
use crate::network::{NetworkInfoSource, UnknownNetwork};
use crate::params;
use crate::summary::Summary;
use crate::transfer::{Direction, TransferSample};
use crate::transport::{HttpTransport, Transport};
use crate::upload::UploadTester;

/// Builds a [`SpeedTest`] from its collaborators.
///
/// Anything not supplied gets the HTTP implementation; host discovery
/// defaults to the fixed fallback host.
pub struct SpeedTestBuilder {
    client_name: String,
    client_version: String,
    config: EngineConfig,
    hosts: Option<Arc<dyn HostProvider>>,
    prober: Option<Arc<dyn LatencyProber>>,
    transport: Option<Arc<dyn Transport>>,
    network: Arc<dyn NetworkInfoSource>,
}

impl SpeedTestBuilder {
    /// Start a builder; `client_name`/`client_version` prefix the user agent.
    pub fn new(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        SpeedTestBuilder {
            client_name: client_name.into(),
            client_version: client_version.into(),
            config: EngineConfig::default(),
            hosts: None,
            prober: None,
            transport: None,
            network: Arc::new(UnknownNetwork),
        }
    }

    /// Replace the default [`EngineConfig`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Discover hosts with `hosts` instead of using the fallback host.
    pub fn host_provider(mut self, hosts: Arc<dyn HostProvider>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Probe latency with `prober`.
    pub fn latency_prober(mut self, prober: Arc<dyn LatencyProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Move transfer payloads with `transport`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Source of the network details attached to the summary.
    pub fn network_info(mut self, network: Arc<dyn NetworkInfoSource>) -> Self {
        self.network = network;
        self
    }

    /// User agent sent by the default HTTP collaborators.
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} {}/{}",
            &self.client_name,
            &self.client_version,
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Build the engine, creating HTTP clients for anything not supplied.
    pub fn build(self) -> Result<SpeedTest> {
        let user_agent = self.user_agent();
        let hosts: Arc<dyn HostProvider> = match self.hosts {
            Some(h) => h,
            None => Arc::new(FallbackHostProvider),
        };
        let prober: Arc<dyn LatencyProber> = match self.prober {
            Some(p) => p,
            None => Arc::new(HttpLatencyProber::new(&user_agent)?),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&user_agent)?),
        };

        let engine = Engine {
            filter: self.config.sanity_filter(),
            download: DownloadTester::new(transport.clone()).with_port(self.config.download_port),
            upload: UploadTester::new(transport),
            config: self.config,
            hosts,
            prober,
            network: self.network,
            state: Mutex::new(State::default()),
        };
        Ok(SpeedTest {
            engine: Arc::new(engine),
        })
    }
}

/// A bandwidth measurement engine. Cloning yields another handle to the
/// same engine.
#[derive(Clone)]
pub struct SpeedTest {
    engine: Arc<Engine>,
}

struct Engine {
    config: EngineConfig,
    filter: SanityFilter,
    hosts: Arc<dyn HostProvider>,
    prober: Arc<dyn LatencyProber>,
    download: DownloadTester,
    upload: UploadTester,
    network: Arc<dyn NetworkInfoSource>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    run: TestRun,
    generation: u64,
    events: Option<broadcast::Sender<TestEvent>>,
    cancel: Option<CancellationToken>,
}

impl State {
    fn publish(&self, event: TestEvent) {
        if let Some(tx) = &self.events {
            // no subscribers is fine
            let _ = tx.send(event);
        }
    }
}

/// A started run.
pub struct RunHandle {
    /// Events of this run, starting with `PhaseChanged(FindingHost)`. The
    /// channel closes when the run ends or is cancelled.
    pub events: broadcast::Receiver<TestEvent>,
    task: JoinHandle<Option<Result<Summary>>>,
}

impl RunHandle {
    /// Wait for the run to end.
    ///
    /// `None` means the run was cancelled.
    pub async fn wait(self) -> Option<Result<Summary>> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "test run task failed");
                Some(Err(Error::UnknownError))
            }
        }
    }
}

impl SpeedTest {
    /// Shorthand for [`SpeedTestBuilder::new`].
    pub fn builder(
        client_name: impl Into<String>,
        client_version: impl Into<String>,
    ) -> SpeedTestBuilder {
        SpeedTestBuilder::new(client_name, client_version)
    }

    /// Start a new run on the current tokio runtime.
    ///
    /// Fails with [`Error::TestInProgress`] while another run is active; the
    /// active run is left untouched. Called outside a tokio runtime it fails
    /// with [`Error::UnknownError`] and leaves the engine idle.
    pub fn start(&self) -> Result<RunHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            warn!(error = %e, "cannot start a test run outside a tokio runtime");
            Error::UnknownError
        })?;
        let mut state = self.engine.lock();
        if state.run.in_progress() {
            debug!(phase = ?state.run.phase, "rejecting start while a run is active");
            return Err(Error::TestInProgress);
        }

        state.generation += 1;
        let generation = state.generation;
        let (tx, events) = broadcast::channel(params::EVENT_CHANNEL_CAPACITY);
        let token = CancellationToken::new();

        state.run = TestRun {
            phase: Phase::FindingHost,
            ..Default::default()
        };
        state.events = Some(tx);
        state.cancel = Some(token.clone());
        state.publish(TestEvent::PhaseChanged {
            phase: Phase::FindingHost,
        });
        drop(state);

        info!(generation, "test run started");
        let run = RunContext {
            engine: self.engine.clone(),
            generation,
        };
        let task = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                outcome = run.pipeline() => Some(outcome),
            }
        });

        Ok(RunHandle { events, task })
    }

    /// Cancel the active run, returning it to [`Phase::Idle`].
    ///
    /// The in-flight network operation is aborted and the run's event
    /// channel closes without a `Completed` event. Returns `false` when no
    /// run was active.
    pub fn cancel(&self) -> bool {
        let mut state = self.engine.lock();
        if !state.run.in_progress() {
            return false;
        }
        state.generation += 1;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.events = None;
        info!(phase = ?state.run.phase, "test run cancelled");
        state.run.phase = Phase::Idle;
        true
    }

    /// Subscribe to the active run's events, if a run is active.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<TestEvent>> {
        self.engine.lock().events.as_ref().map(|tx| tx.subscribe())
    }

    /// Copy of the current (or last) run record.
    pub fn snapshot(&self) -> TestRun {
        self.engine.lock().run.clone()
    }

    /// True while a run is between `start` and a terminal phase.
    pub fn is_running(&self) -> bool {
        self.engine.lock().run.in_progress()
    }

    /// Discover hosts and pick the one with the lowest latency.
    ///
    /// When no run is active the selection replaces the run record, leaving
    /// it [`Phase::Idle`] with only the host and latency set; this is the
    /// host [`SpeedTest::check_ping`] uses.
    pub async fn find_host(&self) -> Result<(Host, u64)> {
        let (host, ranked) = self.engine.locate().await?;
        let latency_ms = match ranked {
            Some(ms) => ms,
            None => self.engine.probe(&host).await?,
        };

        let mut state = self.engine.lock();
        if !state.run.in_progress() {
            state.run = TestRun {
                host: Some(host.clone()),
                latency_ms: Some(latency_ms),
                ..Default::default()
            };
        }
        Ok((host, latency_ms))
    }

    /// Probe the current host once more.
    ///
    /// Fails with [`Error::HostNotFound`] when no host has been selected.
    pub async fn check_ping(&self) -> Result<u64> {
        let host = self
            .engine
            .lock()
            .run
            .host
            .clone()
            .ok_or(Error::HostNotFound)?;
        self.engine.probe(&host).await
    }

    /// Callback form of [`SpeedTest::find_host`].
    pub fn find_host_with<F>(&self, completion: F)
    where
        F: FnOnce(Result<(Host, u64)>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { completion(this.find_host().await) });
    }

    /// Callback form of [`SpeedTest::check_ping`].
    pub fn check_ping_with<F>(&self, completion: F)
    where
        F: FnOnce(Result<u64>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { completion(this.check_ping().await) });
    }
}

impl Engine {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Candidate discovery. A single candidate is returned without a
    /// latency; several are ranked by latency.
    ///
    /// Discovery problems never fail the step: the fallback host is used
    /// instead.
    async fn locate(&self) -> Result<(Host, Option<u64>)> {
        let timeout = self.config.discovery_timeout;
        let discovered = tokio::time::timeout(
            timeout,
            self.hosts.fetch_hosts_limited(self.config.max_hosts, timeout),
        )
        .await
        .map_err(Error::from)
        .and_then(|r| r);

        let hosts = match discovered {
            Ok(hosts) if !hosts.is_empty() => hosts,
            Ok(_) => {
                warn!("discovery returned no hosts, using fallback host");
                vec![Host::fallback()]
            }
            Err(err) => {
                warn!(%err, "discovery failed, using fallback host");
                vec![Host::fallback()]
            }
        };

        if let [only] = hosts.as_slice() {
            return Ok((only.clone(), None));
        }
        let (host, ms) =
            latency::rank_hosts(self.prober.as_ref(), hosts, self.config.latency_timeout).await?;
        Ok((host, Some(ms)))
    }

    async fn probe(&self, host: &Host) -> Result<u64> {
        let timeout = self.config.latency_timeout;
        tokio::time::timeout(timeout, self.prober.measure_latency(host, timeout))
            .await
            .map_err(Error::from)
            .and_then(|r| r)
    }
}

/// The pipeline of one run, bound to that run's generation.
struct RunContext {
    engine: Arc<Engine>,
    generation: u64,
}

impl RunContext {
    async fn pipeline(&self) -> Result<Summary> {
        match self.phases().await {
            Ok(summary) => {
                info!(generation = self.generation, "test run completed");
                self.finish(
                    Phase::Completed,
                    TestEvent::Completed {
                        summary: summary.clone(),
                    },
                );
                Ok(summary)
            }
            Err(error) => {
                warn!(generation = self.generation, %error, "test run failed");
                self.finish(
                    Phase::Failed(error.clone()),
                    TestEvent::Failed {
                        error: error.clone(),
                    },
                );
                Err(error)
            }
        }
    }

    async fn phases(&self) -> Result<Summary> {
        let engine = &self.engine;
        let config = &engine.config;

        let (host, ranked) = engine.locate().await?;
        info!(host = %host.address, sponsor = %host.sponsor, "host selected");
        self.update(
            |run| run.host = Some(host.clone()),
            TestEvent::HostSelected { host: host.clone() },
        );

        self.transition(Phase::MeasuringLatency);
        let latency_ms = match ranked {
            Some(ms) => ms,
            None => engine.probe(&host).await?,
        };
        info!(latency_ms, "latency measured");
        self.update(
            |run| run.latency_ms = Some(latency_ms),
            TestEvent::LatencyMeasured { latency_ms },
        );

        self.transition(Phase::TestingDownload);
        let download = engine
            .download
            .perform_test(
                &host.upload_url()?,
                config.download_size,
                config.transfer_timeout,
                |sample| self.progress(Direction::Download, sample),
            )
            .await?;
        self.finished(Direction::Download, download);

        tokio::time::sleep(config.cooldown).await;

        self.transition(Phase::TestingUpload);
        let upload = engine
            .upload
            .perform_test(
                &host.upload_url()?,
                config.upload_size,
                config.transfer_timeout,
                |sample| self.progress(Direction::Upload, sample),
            )
            .await?;
        self.finished(Direction::Upload, upload);

        let run = self.engine.lock().run.clone();
        Summary::from_run(&run, &engine.filter, engine.network.current()).ok_or(Error::UnknownError)
    }

    /// Apply `f` and publish `event`, unless this run has been superseded.
    fn update(&self, f: impl FnOnce(&mut TestRun), event: TestEvent) {
        let mut state = self.engine.lock();
        if state.generation != self.generation {
            return;
        }
        f(&mut state.run);
        state.publish(event);
    }

    fn transition(&self, phase: Phase) {
        debug!(?phase, "phase transition");
        self.update(
            |run| run.phase = phase.clone(),
            TestEvent::PhaseChanged { phase: phase.clone() },
        );
    }

    /// Publish a sample unless either of its rates is implausible.
    fn progress(&self, direction: Direction, sample: TransferSample) {
        let filter = &self.engine.filter;
        if !filter.accepts(&sample.instantaneous) || !filter.accepts(&sample.average) {
            debug!(
                ?direction,
                instantaneous = %sample.instantaneous,
                average = %sample.average,
                "dropping implausible sample"
            );
            return;
        }
        let event = match direction {
            Direction::Download => TestEvent::DownloadProgress { sample },
            Direction::Upload => TestEvent::UploadProgress { sample },
        };
        self.update(|_| {}, event);
    }

    /// Store a final result; publish it only if it passes the sanity filter.
    fn finished(&self, direction: Direction, result: BandwidthMeasurement) {
        let mut state = self.engine.lock();
        if state.generation != self.generation {
            return;
        }
        match direction {
            Direction::Download => state.run.download = Some(result),
            Direction::Upload => state.run.upload = Some(result),
        }
        if !self.engine.filter.accepts(&result) {
            warn!(?direction, %result, "final result above sanity ceiling, not published");
            return;
        }
        state.publish(match direction {
            Direction::Download => TestEvent::DownloadFinished { result },
            Direction::Upload => TestEvent::UploadFinished { result },
        });
    }

    /// Enter a terminal phase and close the event channel.
    fn finish(&self, phase: Phase, event: TestEvent) {
        let mut state = self.engine.lock();
        if state.generation != self.generation {
            return;
        }
        state.run.phase = phase.clone();
        state.publish(TestEvent::PhaseChanged { phase });
        state.publish(event);
        state.events = None;
        state.cancel = None;
    }
}
