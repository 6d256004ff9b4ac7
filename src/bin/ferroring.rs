//! Command-line entry point: run as the coordinator or as a worker.
//!
//! ```text
//! ferroring coordinator [--port 8081] [--max-workers 100] [--array-len 100]
//! ferroring worker <coordinator-ip> [--port 8081] [--worker-port 0] [--advertise-ip IP]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferroring::{session, Command, Coordinator, Outcome, RoutingPolicy, SessionConfig};
use std::io::{self, BufRead, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc;
use std::thread;
use tracing_subscriber::EnvFilter;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "ferroring")]
#[command(about = "Star/ring message passing: distributed SUM, MIN, MAX and SORT")]
struct Args {
    /// Fail on invalid ranks instead of ignoring them
    #[arg(long, global = true)]
    strict_routing: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Accept workers, read a command from stdin and run it
    Coordinator {
        /// Port to listen on for registrations
        #[arg(long)]
        port: Option<u16>,
        /// Close registration after this many workers
        #[arg(long)]
        max_workers: Option<usize>,
        /// Length of the generated input array
        #[arg(long)]
        array_len: Option<usize>,
    },
    /// Join a coordinator and take part in whatever it runs
    Worker {
        /// Coordinator IP address
        coordinator: IpAddr,
        /// Coordinator port
        #[arg(long)]
        port: Option<u16>,
        /// Port for this worker's ring listener (0 lets the OS choose)
        #[arg(long)]
        worker_port: Option<u16>,
        /// IP to advertise to ring neighbors. Defaults to the address used to
        /// reach the coordinator; when that is loopback, a detected interface
        /// address is used so workers on other hosts can connect.
        #[arg(long)]
        advertise_ip: Option<Ipv4Addr>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SessionConfig::from_env().context("reading FERRORING_* environment")?;
    if args.strict_routing {
        config.routing = RoutingPolicy::Strict;
    }

    match args.role {
        Role::Coordinator {
            port,
            max_workers,
            array_len,
        } => {
            config.coordinator_port = port.unwrap_or(config.coordinator_port);
            config.max_workers = max_workers.unwrap_or(config.max_workers);
            config.array_len = array_len.unwrap_or(config.array_len);
            config.validate()?;
            coordinator(&config)
        }
        Role::Worker {
            coordinator,
            port,
            worker_port,
            advertise_ip,
        } => {
            config.coordinator_port = port.unwrap_or(config.coordinator_port);
            config.worker_port = worker_port.unwrap_or(config.worker_port);
            config.advertise_ip = advertise_ip.or(config.advertise_ip);
            let addr = SocketAddr::new(coordinator, config.coordinator_port);
            let report = session::run_worker(addr, &config)
                .with_context(|| format!("worker session against {addr}"))?;
            println!("[Worker {}] Finished {}", report.rank, report.command);
            Ok(())
        }
    }
}

fn coordinator(config: &SessionConfig) -> Result<()> {
    let coordinator = Coordinator::bind(config)
        .with_context(|| format!("binding port {}", config.coordinator_port))?;

    println!("\n=== Available Commands ===");
    for command in Command::ALL {
        println!("  {:<4} - {}", command.as_str(), command.describe());
    }
    println!("==========================");
    println!("Enter command when all workers are connected:");

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || read_command(tx));

    let data = ferroring::random_array(config.array_len);
    // Fails with CommandSourceClosed if stdin ends before a command
    let report =
        session::run_coordinator(coordinator, &data, rx).context("coordinator session")?;

    let verdict = if ferroring::validate(report.command, &report.outcome, &data) {
        "PASS"
    } else {
        "FAIL"
    };
    match &report.outcome {
        Outcome::Scalar(value) => {
            println!("[Coordinator] Final {}: {value} ({verdict})", report.command);
        }
        Outcome::Sorted { data, rounds } => {
            println!("[Coordinator] Final sorted array after {rounds} rounds ({verdict}):");
            println!("{data:?}");
        }
    }
    println!("[Coordinator] Goodbye!");
    Ok(())
}

/// Prompt until the operator types a valid command.
fn read_command(tx: mpsc::Sender<Command>) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("Coordinator> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                tracing::warn!("stdin closed before a command was entered");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                return;
            }
        }
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => {
                println!("[Coordinator] Command '{command}' received, closing registration");
                let _ = tx.send(command);
                return;
            }
            Err(_) => println!("Invalid command. Available: SUM, MIN, MAX, SORT"),
        }
    }
}
