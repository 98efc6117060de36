//! Exposure notification node binary.
//!
//! # Usage
//!
//! ```bash
//! # Broadcast, listen and match against a local control plane
//! exposure-node run --listen 0.0.0.0:7000 --peer 10.0.0.2:7000 --control 127.0.0.1:7100
//!
//! # Publish this device's keys after a positive test
//! exposure-node upload --otp 123456
//!
//! # Show recorded exposures
//! exposure-node report
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use exposure_node::{
    KeyStore, NodeConfig, RedbStorage, SystemEnv, TcpControlPlane, exposure_report, start_node,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exposure notification node
#[derive(Parser, Debug)]
#[command(name = "exposure-node")]
#[command(about = "Privacy-preserving exposure notification node")]
#[command(version)]
struct Args {
    /// Path to the database file
    #[arg(long, global = true, default_value = "exposure.redb")]
    db: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Broadcast identifiers, log beacons and match diagnosis keys
    Run {
        /// Address the radio listens on
        #[arg(long, default_value = "0.0.0.0:7000")]
        listen: String,

        /// Peer to advertise to (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Control-plane server address
        #[arg(long, default_value = "127.0.0.1:7100")]
        control: String,

        /// Seconds between advertisements
        #[arg(long, default_value = "900")]
        broadcast_secs: u64,

        /// Seconds between diagnosis key fetches
        #[arg(long, default_value = "7200")]
        refresh_secs: u64,

        /// Transmit power in dBm, written into the metadata
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        tx_power: i8,

        /// Seconds a peer gets to deliver its frame
        #[arg(long, default_value = "5")]
        read_timeout_secs: u64,
    },

    /// Upload this device's keys after a positive diagnosis
    Upload {
        /// One-time password issued by the health authority
        #[arg(long)]
        otp: String,

        /// Control-plane server address
        #[arg(long, default_value = "127.0.0.1:7100")]
        control: String,
    },

    /// Print recorded exposures, newest first
    Report,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Run {
            listen,
            peers,
            control,
            broadcast_secs,
            refresh_secs,
            tx_power,
            read_timeout_secs,
        } => {
            let config = NodeConfig {
                db_path: args.db,
                listen_address: listen,
                peers,
                control_plane_address: control,
                broadcast_interval: Duration::from_secs(broadcast_secs),
                refresh_interval: Duration::from_secs(refresh_secs),
                tx_power_dbm: tx_power,
                read_timeout: Duration::from_secs(read_timeout_secs),
                ..Default::default()
            };

            tracing::info!(db = %config.db_path.display(), "exposure node starting");
            let handle = start_node(&config).await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            handle.shutdown();
        },

        Command::Upload { otp, control } => {
            let control = NodeConfig { control_plane_address: control, ..Default::default() }
                .validate()?
                .control_plane;

            let key_store = KeyStore::new(RedbStorage::open(&args.db)?, SystemEnv::new());
            let accepted =
                key_store.upload_diagnosis(&TcpControlPlane::new(control), &otp).await?;

            if accepted {
                println!("Keys uploaded.");
            } else {
                println!("Upload was not accepted.");
            }
        },

        Command::Report => {
            let storage = RedbStorage::open(&args.db)?;
            let summaries = exposure_report(&storage)?;

            if summaries.is_empty() {
                println!("No exposures recorded.");
            }
            for summary in summaries {
                println!("{summary}");
            }
        },
    }

    Ok(())
}
