//! Voltgrid Node - simulated EV charging network
//!
//! Runs every role of the network in one process: the Central System,
//! one Charge Point and session listener per EVSE, and (in demo mode) a
//! vehicle that reserves a station, plugs in, and charges until full.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults: CSMS on :9000, five EVSEs on :9002-:9006
//! voltgrid-node
//!
//! # Smaller network, verbose logs
//! voltgrid-node --evse-count 2 --log-level debug
//!
//! # Full end-to-end charging flow for EV-001 on EVSE 1
//! voltgrid-node --demo
//! ```

mod catalogue;

use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use voltgrid_core::config::{EvConfig, NetworkConfig, StationConfig};
use voltgrid_core::fleet::FleetState;
use voltgrid_core::registry::{EvCommand, SessionRegistry, StationCommand};
use voltgrid_iso15118::{EvClient, EvseServer};
use voltgrid_ocpp::{CentralSystem, ChargePoint};

/// Simulated EV charging network node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Central System host
    #[arg(long, default_value = "127.0.0.1")]
    csms_host: String,

    /// Central System WebSocket port
    #[arg(long, default_value = "9000")]
    csms_port: u16,

    /// Base port for per-EVSE session listeners (EVSE n listens on base + n)
    #[arg(long, default_value = "9001")]
    iso15118_base_port: u16,

    /// Number of charging stations to simulate
    #[arg(long, default_value = "5")]
    evse_count: u32,

    /// Run the demonstration flow: reserve, plug in, and charge EV-001
    /// on EVSE 1
    #[arg(long)]
    demo: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║        Voltgrid Node - EV Charging Network       ║");
    println!("╠══════════════════════════════════════════════════╣");
    println!("║  CSMS:     {:<38} ║", format!("ws://{}:{}", args.csms_host, args.csms_port));
    println!("║  EVSEs:    {:<38} ║", args.evse_count);
    println!("║  Sessions: {:<38} ║", format!("ports {}+", args.iso15118_base_port + 1));
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    let network = NetworkConfig::default()
        .with_csms_host(&args.csms_host)
        .with_csms_port(args.csms_port)
        .with_iso15118_base_port(args.iso15118_base_port);

    let fleet = FleetState::new();
    for ev in catalogue::default_evs() {
        fleet.add_ev(ev);
    }
    for evse in catalogue::default_evses(args.evse_count) {
        fleet.add_evse(evse);
    }
    info!(
        evs = fleet.ev_ids().len(),
        evses = fleet.evse_ids().len(),
        "fleet catalogue loaded"
    );

    let registry = SessionRegistry::new();

    let csms = CentralSystem::new(fleet.clone(), network.clone());
    {
        let csms = csms.clone();
        tokio::spawn(async move {
            if let Err(e) = csms.serve().await {
                error!(error = %e, "Central System stopped");
            }
        });
    }

    // Give the listener a moment before the stations dial in.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for evse in fleet.evse_summaries() {
        let server = EvseServer::new(evse.id, &network, registry.clone());
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!(error = %e, "EVSE session server stopped");
            }
        });

        let station = StationConfig::default().with_initial_status(evse.status);
        let (charge_point, outgoing_rx) = ChargePoint::new(evse.id, station, network.clone());

        let commands = registry.register_station(charge_point.station_id());
        tokio::spawn(charge_point.clone().run_commands(commands));

        let station_id = charge_point.station_id().to_string();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = charge_point.run(registry, outgoing_rx).await {
                error!(station = %station_id, error = %e, "Charge Point stopped");
            }
        });
    }

    if args.demo {
        let fleet = fleet.clone();
        let registry = registry.clone();
        let network = network.clone();
        tokio::spawn(async move {
            run_demo(csms, fleet, registry, network).await;
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

/// End-to-end flow: EV-001 reserves EVSE 1, plugs in, charges until the
/// SOC monitor reports a full battery.
async fn run_demo(
    csms: CentralSystem,
    fleet: FleetState,
    registry: SessionRegistry,
    network: NetworkConfig,
) {
    const EVSE_ID: u32 = 1;
    const EV_ID: &str = "EV-001";

    // Let the stations finish their boot sequences first.
    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("demo: reserving EVSE {} for {}", EVSE_ID, EV_ID);

    match csms.reserve_evse_by_id(EVSE_ID, EV_ID).await {
        Ok(status) => info!(?status, "demo: reservation answered"),
        Err(e) => {
            error!(error = %e, "demo: reservation failed, aborting");
            return;
        }
    }

    fleet.with_ev_mut(EV_ID, |ev| ev.connected_evse_id = Some(EVSE_ID));

    match registry.station(voltgrid_core::ident::station_id_for(EVSE_ID).as_str()) {
        Ok(tx) => {
            let _ = tx.send(StationCommand::PlugIn { evse_id: EVSE_ID });
        }
        Err(e) => warn!(error = %e, "demo: plug-in not delivered"),
    }

    let client = EvClient::new(EV_ID, EVSE_ID, fleet, EvConfig::default(), network);
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run(registry).await {
                error!(error = %e, "demo: vehicle session ended");
            }
        });
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    match registry.ev(EV_ID) {
        Ok(tx) => {
            info!("demo: starting charge");
            let _ = tx.send(EvCommand::StartCharging);
        }
        Err(e) => warn!(error = %e, "demo: vehicle not connected"),
    }
}
