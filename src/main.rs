//! Warden CLI - supervise container filesystems and restore them on drift

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use warden::bootstrap::{Bootstrap, BootstrapOutcome, SystemHost};
use warden::cli::{Args, SubCommand};
use warden::coordinator::catalog::parse_snapshot_pair;
use warden::coordinator::{ChainedCatalog, Coordinator, ExplicitSnapshots, Selection, SnapshotCatalog, SnapshotDir};
use warden::platform::{detect_host_identity, resolve_detailed, HostIdentity};
use warden::recovery::{check_artifact, SnapshotArtifact};
use warden::runtime::{DockerCli, Runtime};
use warden::supervisor::{EventSink, LoopExit};
use warden::{format_output, FingerprintEngine, OutputFormat, Report, Settings};

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let directive = if args.verbose { "debug" } else { args.log.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = Settings::load_or_default(args.config.as_deref())
        .context("loading configuration")?;
    if let Some(ref runtime) = args.runtime {
        settings.runtime = runtime.clone();
    }
    let format = OutputFormat::from_json_flag(args.json);

    if let SubCommand::Resolve { family, version } = &args.command {
        let host = match family {
            Some(family) => HostIdentity::new(family.as_str(), version.clone().unwrap_or_default()),
            None => detect_host_identity(),
        };
        let resolution = resolve_detailed(&host.family, &host.version);
        println!(
            "{}",
            format_output(&Report::Resolution { host: &host, resolution: &resolution }, &format)
        );
        return Ok(());
    }

    let host = detect_host_identity();
    info!(host = %host, runtime = %settings.runtime, "starting");

    let bootstrap_only = matches!(args.command, SubCommand::Bootstrap);
    if bootstrap_only || (args.command.needs_runtime() && !args.skip_bootstrap) {
        ensure_runtime_access(&settings, &host, args.post_reexec, bootstrap_only.then_some(format))?;
        if bootstrap_only {
            return Ok(());
        }
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    rt.block_on(execute(args.command, settings, host, format))
}

/// Run the privilege bootstrap, re-executing this process if it asks to
fn ensure_runtime_access(
    settings: &Settings,
    host: &HostIdentity,
    post_reexec: bool,
    report: Option<OutputFormat>,
) -> anyhow::Result<()> {
    let system = SystemHost::new(&settings.runtime, &settings.runtime_group, host.clone());
    let mut bootstrap = Bootstrap::new(post_reexec);
    let outcome = bootstrap.run(&system)?;

    if let Some(format) = report {
        println!(
            "{}",
            format_output(
                &Report::Bootstrap { outcome, history: bootstrap.history() },
                &format
            )
        );
    }

    match outcome {
        BootstrapOutcome::Ready => Ok(()),
        BootstrapOutcome::ReExec => {
            let args: Vec<String> = std::env::args().skip(1).collect();
            match system.reexec(&args) {
                Ok(never) => match never {},
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn execute(
    command: SubCommand,
    mut settings: Settings,
    host: HostIdentity,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let runtime: Arc<dyn Runtime> = Arc::new(DockerCli::new(settings.runtime.as_str()));

    match command {
        SubCommand::Units => {
            let units = runtime.list_live_units().await?;
            println!("{}", format_output(&Report::Units(&units), &format));
            Ok(())
        }

        SubCommand::Fingerprint { unit } => {
            warden::unit::validate_unit_name(&unit)?;
            let engine = FingerprintEngine::new(runtime, settings.fingerprint_timeout());
            let fingerprint = engine.fingerprint(&unit).await?;
            println!(
                "{}",
                format_output(&Report::Fingerprint { unit: &unit, fingerprint: &fingerprint }, &format)
            );
            Ok(())
        }

        SubCommand::Watch { unit, snapshot, image, interval } => {
            if let Some(secs) = interval {
                settings.interval_secs = secs;
                settings.validate()?;
            }

            let artifact = match snapshot {
                Some(path) => {
                    check_artifact(&path)?;
                    let artifact = SnapshotArtifact::new(path);
                    Some(match image {
                        Some(image) => artifact.with_image(image),
                        None => artifact,
                    })
                }
                None => configured_catalog(&settings).snapshot_for(&unit),
            };

            let (sink, events) = EventSink::channel();
            let mut coordinator = Coordinator::new(runtime, host, &settings, sink);
            coordinator.start_supervision(&unit, artifact, None)?;
            supervise(coordinator, events, format).await
        }

        SubCommand::WatchAll { units, select, snapshots, snapshot_dir, interval } => {
            if let Some(secs) = interval {
                settings.interval_secs = secs;
                settings.validate()?;
            }
            if snapshot_dir.is_some() {
                settings.snapshot_dir = snapshot_dir;
            }

            let mut explicit = ExplicitSnapshots::new();
            for pair in &snapshots {
                let (unit, artifact) = parse_snapshot_pair(pair)?;
                check_artifact(&artifact.path)?;
                explicit.insert(&unit, artifact);
            }
            let catalog = ChainedCatalog::new()
                .with(explicit)
                .with(configured_catalog(&settings));

            let (sink, events) = EventSink::channel();
            let mut coordinator = Coordinator::new(runtime, host, &settings, sink);

            let targets = if !units.is_empty() {
                units
            } else if !settings.targets.is_empty() {
                settings.target_units()
            } else {
                let live = coordinator.discover().await?;
                Selection::parse(&select).apply(&live)?
            };

            let started = coordinator.start_all(&targets, &catalog)?;
            if started == 0 {
                bail!("none of the selected units could be supervised");
            }
            supervise(coordinator, events, format).await
        }

        SubCommand::Resolve { .. } | SubCommand::Bootstrap => Ok(()),
    }
}

/// Snapshots named in the configuration file, then the snapshot directory
fn configured_catalog(settings: &Settings) -> ChainedCatalog {
    let catalog = ChainedCatalog::new().with(settings.explicit_snapshots());
    match settings.snapshot_dir.as_deref() {
        Some(dir) => catalog.with(SnapshotDir::new(dir)),
        None => catalog,
    }
}

/// Print events until Ctrl+C or until every loop has ended
async fn supervise(
    coordinator: Coordinator,
    mut events: tokio::sync::mpsc::UnboundedReceiver<warden::IntegrityEvent>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        stop_tx.send_replace(true);
    })
    .context("failed to set Ctrl+C handler")?;

    if format == OutputFormat::Human {
        println!(
            "Supervising {}... (Press Ctrl+C to stop)\n",
            coordinator.supervised().join(", ")
        );
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", format_output(&Report::Event(&event), &format));
        }
    });

    let exits = coordinator.run_until_stopped(stop_rx).await;
    if printer.await.is_err() {
        warn!("event printer ended abnormally");
    }
    println!("{}", format_output(&Report::Exits(&exits), &format));

    if !exits.is_empty() && exits.iter().all(|(_, exit)| *exit != LoopExit::Stopped) {
        bail!("no unit could be supervised");
    }
    Ok(())
}
