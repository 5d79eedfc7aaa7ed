//! NextGCore TNGF (Trusted Non-3GPP Gateway Function)
//!
//! Gateway between a trusted WLAN access network and the 5G core.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nextgcore_tngfd::context::XfrmInterface;
use nextgcore_tngfd::{
    gtp_path, ike_handler, ike_path, nas_path, ngap_path, radius_path, up_path, GatewayContext, IpXfrmInstaller,
    Outbound, TngfConfig, XfrmInterfaceConfig,
};

/// NextGCore TNGF - Trusted Non-3GPP Gateway Function
#[derive(Parser, Debug)]
#[command(name = "nextgcore-tngfd")]
#[command(author = "NextGCore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "5G Core Trusted Non-3GPP Gateway Function", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "/etc/nextgcore/tngf.yaml")]
    config: String,

    /// Log file path
    #[arg(short = 'l', long)]
    log_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'e', long, default_value = "info")]
    log_level: String,

    /// Disable color output
    #[arg(short = 'm', long)]
    no_color: bool,

    /// Kill running instance
    #[arg(short = 'k', long)]
    kill: bool,
}

/// Global shutdown flag
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    log::info!("NextGCore TNGF v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.kill {
        log::info!("Kill flag set - would send SIGTERM to running instance");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    log::info!("Loading configuration from {}", args.config);
    let settings = TngfConfig::load(&args.config)
        .and_then(|config| config.settings())
        .with_context(|| format!("Invalid configuration {}", args.config))?;

    let (ike_tx, ike_rx) = tokio::sync::mpsc::unbounded_channel();
    let (radius_tx, radius_rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = Arc::new(GatewayContext::new(
        settings,
        Arc::new(IpXfrmInstaller),
        Outbound {
            ike: ike_tx,
            radius: radius_tx,
        },
    ));
    log::info!("TNGF context initialized");

    setup_default_xfrm_interface(&ctx)?;

    let mut handles = Vec::new();
    handles.extend(ngap_path::open(&ctx));
    handles.extend(
        radius_path::open(&ctx, radius_rx)
            .await
            .context("Failed to open RADIUS path")?,
    );
    handles.extend(ike_path::open(&ctx, ike_rx).await.context("Failed to open IKE path")?);
    handles.push(nas_path::open(&ctx).await.context("Failed to open NAS path")?);

    let gtp = gtp_path::bind(&ctx).await.context("Failed to open GTP-U path")?;
    let (gre, up_handle) = up_path::open(&ctx, gtp.clone()).context("Failed to open GRE path")?;
    handles.push(up_handle);
    handles.push(gtp_path::open(&ctx, gtp, gre));

    log::info!("NextGCore TNGF ready");

    run_async_event_loop(&ctx, shutdown).await;

    log::info!("Shutting down...");
    for handle in &handles {
        handle.abort();
    }
    remove_xfrm_interfaces(&ctx);

    log::info!("NextGCore TNGF stopped");
    Ok(())
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) -> Result<()> {
    let mut builder = env_logger::Builder::new();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    };
    builder.filter_level(level);

    builder.format_timestamp_millis();

    if args.no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    if let Some(path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        shutdown.store(true, Ordering::SeqCst);
        SHUTDOWN.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    Ok(())
}

/// Interface carrying the signalling Child SAs and the UE subnet
fn setup_default_xfrm_interface(ctx: &GatewayContext) -> Result<()> {
    let settings = &ctx.settings;
    let name = settings.xfrm_interface_name.clone();
    let if_id = settings.xfrm_interface_id;
    let ifindex = ctx
        .xfrm
        .setup_interface(&XfrmInterfaceConfig {
            name: name.clone(),
            if_id,
            parent: settings.xfrm_parent_interface.clone(),
            address: Some((settings.ipsec_gateway_address, settings.ue_subnet.prefix_len)),
            route: Some(settings.ue_subnet),
        })
        .with_context(|| format!("Failed to set up xfrm interface {name}"))?;
    ctx.register_xfrm_interface(XfrmInterface { name, if_id, ifindex });
    Ok(())
}

fn remove_xfrm_interfaces(ctx: &GatewayContext) {
    for interface in ctx.xfrm_interfaces() {
        if let Err(e) = ctx.xfrm.delete_interface(&interface.name) {
            log::warn!("Failed to delete xfrm interface {}: {}", interface.name, e);
        }
    }
}

/// Wait for shutdown, expiring half-open SAs and reporting gateway load now
/// and then
async fn run_async_event_loop(ctx: &GatewayContext, shutdown: Arc<AtomicBool>) {
    log::debug!("Entering async event loop");

    let mut poll_interval = tokio::time::interval(Duration::from_millis(200));
    let mut expiry_interval = tokio::time::interval(Duration::from_secs(5));
    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                if shutdown.load(Ordering::SeqCst) || SHUTDOWN.load(Ordering::SeqCst) {
                    break;
                }
            }
            _ = expiry_interval.tick() => {
                let expired = ike_handler::expire_half_open(ctx, tokio::time::Instant::now());
                if expired > 0 {
                    log::info!("{} half-open SAs expired", expired);
                }
            }
            _ = stats_interval.tick() => {
                let counts = ctx.allocation_counts();
                if ctx.ue_count() > 0 {
                    log::debug!("Active UEs: {} ({:?})", ctx.ue_count(), counts);
                }
            }
        }
    }

    log::debug!("Exiting async event loop");
}
