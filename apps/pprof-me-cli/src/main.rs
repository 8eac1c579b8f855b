// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

// println is the CLI's output channel; diagnostics go through tracing.
#![allow(clippy::disallowed_macros)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pprof_me_api::ProfileType;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "pprof-me client CLI", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:7070")]
    server: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CaptureType {
    Cpu,
    Heap,
}

impl From<CaptureType> for ProfileType {
    fn from(value: CaptureType) -> Self {
        match value {
            CaptureType::Cpu => Self::Cpu,
            CaptureType::Heap => Self::Heap,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a profile file (POST /profiles)
    Upload {
        /// Path to the pprof profile
        file: PathBuf,
        /// App name to record (default: the binary's file name, else the
        /// profile's file stem)
        #[arg(short, long)]
        name: Option<String>,
        /// Profiled binary to fingerprint (default: no fingerprint)
        #[arg(short, long)]
        binary: Option<PathBuf>,
    },
    /// List stored profiles (GET /profiles)
    List,
    /// Download a profile (GET /profiles/{id})
    Fetch {
        id: String,
        /// Output file path
        out: PathBuf,
    },
    /// Capture a profile from a pod through the server
    Capture {
        #[arg(long, default_value = "")]
        namespace: String,
        /// Pod name, or app name matched against the pod's app label
        #[arg(long)]
        pod: String,
        #[arg(long = "type", value_enum, default_value = "cpu")]
        profile_type: CaptureType,
    },
    /// Print the visualizer URL of a profile
    Ui { id: String },
}

async fn run(cli: Cli) -> pprof_me_client::ClientResult<()> {
    let server = cli.server.as_str();
    match cli.command {
        Commands::Upload { file, name, binary } => {
            let id = pprof_me_client::upload_profile(
                server,
                &file,
                name.as_deref(),
                binary.as_deref(),
            )
            .await?;
            println!("{id}");
            println!("{}", pprof_me_client::ui_url(server, &id)?);
        },
        Commands::List => {
            let profiles = pprof_me_client::list_profiles(server).await?;
            if profiles.is_empty() {
                println!("No profiles found.");
            } else {
                println!("{:<24} {:<26} ID", "APP", "TIMESTAMP");
                for profile in profiles {
                    println!("{:<24} {:<26} {}", profile.app_name, profile.timestamp, profile.id);
                }
            }
        },
        Commands::Fetch { id, out } => {
            let written = pprof_me_client::fetch_profile_to_file(server, &id, &out).await?;
            println!("Wrote {written} bytes to {}", out.display());
        },
        Commands::Capture { namespace, pod, profile_type } => {
            let id =
                pprof_me_client::capture_profile(server, &namespace, &pod, profile_type.into())
                    .await?;
            println!("{id}");
            println!("{}", pprof_me_client::ui_url(server, &id)?);
        },
        Commands::Ui { id } => {
            println!("{}", pprof_me_client::ui_url(server, &id)?);
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
