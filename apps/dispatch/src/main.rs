use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    HttpBackend, LatLng, PollLoop, RecordingSurface, ReliefEngine, SortDirection, ViewFilter,
};
use shared::{
    domain::{CampIndex, DeviceId, Emergency, Gender},
    protocol::{EmergencyReport, ReportStatus},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod presenter;

use config::{load_settings, CliOverrides, Settings};

#[derive(Parser, Debug)]
#[command(about = "Console dispatcher for the relief map backend")]
struct Cli {
    #[arg(long, default_value = "dispatch.toml")]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    poll_ms: Option<u64>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the backend and print the filtered emergency list.
    Watch {
        /// Track a single device.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        gender: Option<Gender>,
        #[arg(long)]
        min_age: Option<u32>,
        #[arg(long)]
        max_age: Option<u32>,
        #[arg(long)]
        sort: Option<SortDirection>,
        #[arg(long, requires = "ref_lng")]
        ref_lat: Option<f64>,
        #[arg(long, requires = "ref_lat")]
        ref_lng: Option<f64>,
        #[arg(long)]
        with_camps: bool,
        /// Refresh once and exit.
        #[arg(long)]
        once: bool,
    },
    AddCamp {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lng: f64,
        name: Option<String>,
    },
    RemoveCamp {
        index: usize,
    },
    RemoveSos {
        device_id: String,
    },
    /// Send a report as a device would.
    Report {
        device_id: String,
        #[arg(long, value_enum, default_value_t = StatusArg::Sos)]
        status: StatusArg,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "unspecified")]
        gender: Gender,
        #[arg(long, default_value_t = 0)]
        age: u32,
        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        lon: f64,
        #[arg(long, default_value_t = 0.0)]
        accuracy: f64,
        #[arg(long)]
        manual: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StatusArg {
    Sos,
    Update,
    Clear,
}

impl From<StatusArg> for ReportStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Sos => Self::Sos,
            StatusArg::Update => Self::Update,
            StatusArg::Clear => Self::Clear,
        }
    }
}

fn build_engine(settings: &Settings) -> Result<Arc<ReliefEngine>> {
    let backend = HttpBackend::new(settings.server_url.clone(), settings.http_timeout)
        .context("failed to build http client")?;
    Ok(ReliefEngine::new(
        Arc::new(backend),
        Arc::new(RecordingSurface::new()),
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings(
        &cli.config,
        CliOverrides {
            server_url: cli.server_url,
            poll_ms: cli.poll_ms,
            http_timeout_ms: cli.timeout_ms,
        },
    )?;
    info!(server_url = %settings.server_url, "using relief backend");
    let engine = build_engine(&settings)?;

    match cli.command {
        Command::Watch {
            id,
            gender,
            min_age,
            max_age,
            sort,
            ref_lat,
            ref_lng,
            with_camps,
            once,
        } => {
            let filter = ViewFilter {
                gender,
                min_age,
                max_age,
                distance_sort: sort,
                identity: id.map(DeviceId::new),
            };
            let reference = ref_lat.zip(ref_lng).map(|(lat, lng)| LatLng::new(lat, lng));
            watch(engine, &settings, filter, reference, with_camps, once).await?;
        }
        Command::AddCamp { lat, lng, name } => {
            engine.add_relief_camp(lat, lng, name.as_deref()).await?;
            println!("{}", presenter::format_camps(&engine.camps().await));
        }
        Command::RemoveCamp { index } => {
            engine.refresh_camps().await?;
            engine.remove_camp(CampIndex(index)).await?;
            println!("{}", presenter::format_camps(&engine.camps().await));
        }
        Command::RemoveSos { device_id } => {
            engine.remove_emergency(&DeviceId::new(device_id)).await?;
            println!("removed; {} emergencies remain", engine.emergencies().await.len());
        }
        Command::Report {
            device_id,
            status,
            name,
            gender,
            age,
            lat,
            lon,
            accuracy,
            manual,
        } => {
            let report = EmergencyReport {
                status: status.into(),
                emergency: Emergency {
                    device_id: DeviceId::new(device_id),
                    name,
                    gender,
                    age,
                    lat,
                    lon,
                    accuracy,
                    is_manual: manual,
                    timestamp: Utc::now(),
                },
            };
            engine.submit_emergency(&report).await?;
            println!("report sent ({:?})", report.status);
        }
    }

    Ok(())
}

async fn watch(
    engine: Arc<ReliefEngine>,
    settings: &Settings,
    filter: ViewFilter,
    reference: Option<LatLng>,
    with_camps: bool,
    once: bool,
) -> Result<()> {
    let printer = tokio::spawn(presenter::print_events(engine.subscribe_events()));

    engine.set_filter(filter).await?;
    engine.set_reference_point(reference).await?;

    if once {
        if with_camps {
            engine.refresh_camps().await?;
        }
        engine.refresh().await?;
        // Last sender goes away here, so the printer drains and exits.
        drop(engine);
        printer.await.context("event printer panicked")?;
        return Ok(());
    }

    let poller = PollLoop::new(engine.clone())
        .with_period(settings.poll_interval)
        .with_camps(with_camps)
        .spawn();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("stopping");
    poller.abort();
    printer.abort();
    Ok(())
}
