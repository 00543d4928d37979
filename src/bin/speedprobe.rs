use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use speedprobe::config::EngineConfig;
use speedprobe::emitter::{Emitter, HumanReadableEmitter, JsonEmitter};
use speedprobe::locate::HttpHostProvider;
use speedprobe::network::{ConnectionKind, NetworkInfo, StaticNetwork};
use speedprobe::orchestrator::SpeedTest;
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone, Debug, clap::ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum Link {
    Wifi,
    Cellular,
    Wired,
}

#[derive(Parser, Debug)]
#[command(version, about = "Measure latency, download and upload throughput")]
struct Cli {
    /// Discovery endpoint returning a JSON list of hosts. Without it the built-in fallback host is used.
    #[arg(long)]
    discovery_url: Option<String>,
    /// Output format to use: 'human' or 'json' for batch processing
    #[arg(long, default_value = "human")]
    format: Format,
    /// Bytes requested by the download test
    #[arg(long, default_value_t = speedprobe::params::DEFAULT_DATA_SIZE)]
    download_size: u64,
    /// Bytes sent by the upload test
    #[arg(long, default_value_t = speedprobe::params::DEFAULT_DATA_SIZE)]
    upload_size: u64,
    /// Per-transfer timeout in seconds
    #[arg(long, default_value_t = speedprobe::params::TRANSFER_TIMEOUT.as_secs())]
    transfer_timeout: u64,
    /// Throughput above this many Mbit/s is treated as a measurement artifact
    #[arg(long, default_value_t = speedprobe::params::SANITY_CEILING_MBPS)]
    ceiling_mbps: f64,
    /// Link type reported in the summary
    #[arg(long)]
    link: Option<Link>,
    /// Mobile carrier reported in the summary (cellular links)
    #[arg(long)]
    carrier: Option<String>,
    /// Emit summary and errors only
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if cli.download_size == 0 || cli.upload_size == 0 {
        eprintln!("error: transfer sizes must be greater than zero");
        std::process::exit(1);
    }

    let mut emitter: Box<dyn Emitter> = match cli.format {
        Format::Human => Box::new(HumanReadableEmitter::new(std::io::stdout()).quiet(cli.quiet)),
        Format::Json => Box::new(JsonEmitter::new(std::io::stdout())),
    };

    let config = EngineConfig {
        download_size: cli.download_size,
        upload_size: cli.upload_size,
        transfer_timeout: Duration::from_secs(cli.transfer_timeout),
        sanity_ceiling_mbps: cli.ceiling_mbps,
        ..EngineConfig::default()
    };

    let mut builder = SpeedTest::builder("speedprobe", env!("CARGO_PKG_VERSION")).config(config);
    if let Some(url) = &cli.discovery_url {
        let provider = HttpHostProvider::new(url.as_str(), &builder.user_agent())?;
        builder = builder.host_provider(Arc::new(provider));
    }
    if let Some(link) = cli.link {
        let kind = match link {
            Link::Wifi => ConnectionKind::Wifi,
            Link::Cellular => ConnectionKind::Cellular,
            Link::Wired => ConnectionKind::Wired,
        };
        builder = builder.network_info(Arc::new(StaticNetwork(NetworkInfo {
            kind,
            carrier: cli.carrier.clone(),
            radio_technology: None,
        })));
    }
    let speedtest = builder.build()?;

    let mut run = speedtest.start()?;
    loop {
        match run.events.recv().await {
            Ok(event) => emitter.on_event(&event)?,
            Err(RecvError::Lagged(skipped)) => emitter.on_lagged(skipped)?,
            Err(RecvError::Closed) => break,
        }
    }

    match run.wait().await {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(e.into()),
        None => Ok(()),
    }
}
