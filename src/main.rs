use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use contract_net::bus::{MemoryBus, SharedBus};
use contract_net::config::{
    BusConfig, Capabilities, DoneWait, LookaheadConfig, MachineConfig, SupervisorConfig,
    DEFAULT_PREFIX,
};
use contract_net::dashboard::{run_dashboard, DashboardState};
use contract_net::error::CnpError;
use contract_net::grpc::{BrokerServer, RemoteBus};
use contract_net::machine::MachineAgent;
use contract_net::observer::{JobLedger, Observer};
use contract_net::protocol::Topics;
use contract_net::shutdown::install_shutdown_handler;
use contract_net::supervisor::{Completion, RoundOutcome, RoundResult, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "contract-net")]
#[command(version)]
#[command(about = "Contract Net task allocation over a publish/subscribe bus")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the message bus broker
    Broker {
        /// Port to listen on for gRPC
        #[arg(long, default_value = "1883")]
        port: u16,
    },

    /// Run a machine agent that bids on and executes jobs
    Machine {
        #[command(flatten)]
        bus: BusArgs,

        #[command(flatten)]
        machine: MachineArgs,
    },

    /// Run the supervisor over a job sequence
    Supervisor {
        #[command(flatten)]
        bus: BusArgs,

        #[command(flatten)]
        rounds: RoundArgs,

        /// Output format for the round summary
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Watch protocol traffic and report job timings
    Observe {
        #[command(flatten)]
        bus: BusArgs,

        /// Port for the HTTP dashboard (optional)
        #[arg(long)]
        dashboard_port: Option<u16>,
    },

    /// Run a supervisor and three machines in one process
    Demo {
        #[command(flatten)]
        rounds: RoundArgs,

        /// Topic prefix
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,

        /// Output format for the round summary
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct BusArgs {
    /// Broker host
    #[arg(long, default_value = "localhost")]
    broker: String,

    /// Broker port
    #[arg(long, default_value = "1883")]
    port: u16,

    /// Topic prefix shared by all agents
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,
}

impl BusArgs {
    fn config(&self) -> BusConfig {
        BusConfig::new(&self.broker, self.port).with_prefix(&self.prefix)
    }
}

#[derive(Parser, Debug)]
struct MachineArgs {
    /// Unique machine identifier, also the Accept topic suffix
    #[arg(long)]
    machine_id: String,

    /// Capabilities like "cut:3,drill:5,paint:2.5" (seconds)
    #[arg(long, default_value = "")]
    caps: String,

    /// Capabilities as JSON, used when --caps is empty
    #[arg(long, default_value = "")]
    caps_json: String,
}

impl MachineArgs {
    fn config(&self) -> Result<MachineConfig, CnpError> {
        let capabilities = if !self.caps.trim().is_empty() {
            Capabilities::parse_list(&self.caps)?
        } else if !self.caps_json.trim().is_empty() {
            Capabilities::from_json(&self.caps_json)?
        } else {
            return Err(CnpError::Config(
                "define capabilities with --caps or --caps-json".into(),
            ));
        };
        let config = MachineConfig::new(&self.machine_id, capabilities);
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
struct RoundArgs {
    /// Comma-separated job types, negotiated in order
    #[arg(long, default_value = "cut,drill,cut,paint,drill")]
    jobs: String,

    /// Bid window ceiling in seconds
    #[arg(long, default_value = "1.0")]
    deadline: f64,

    /// Wait for each job's Done before the next CfP
    #[arg(long)]
    wait_done: bool,

    /// Give up waiting for a Done after this many seconds
    #[arg(long, requires = "wait_done")]
    done_timeout: Option<f64>,

    /// Stop collecting once this many distinct machines bid (0 disables)
    #[arg(long, default_value = "0")]
    min_bids: usize,

    /// Stop collecting after this many ms without a new bid (0 disables)
    #[arg(long, default_value = "0")]
    quiet_ms: u64,

    /// Prefer the runner-up when the next job has the same type
    #[arg(long)]
    guard_fast: bool,

    /// Runner-up tolerance for --guard-fast
    #[arg(long, default_value = "1.15")]
    alpha: f64,

    /// Bid window re-evaluation period in ms
    #[arg(long, default_value = "20")]
    quantum_ms: u64,
}

impl RoundArgs {
    fn config(&self) -> Result<SupervisorConfig, CnpError> {
        let deadline = Duration::try_from_secs_f64(self.deadline)
            .map_err(|_| CnpError::Config(format!("invalid deadline: {}", self.deadline)))?;

        let mut config = SupervisorConfig::new(SupervisorConfig::parse_jobs(&self.jobs)?)
            .with_deadline(deadline)
            .with_min_bidders(self.min_bids)
            .with_quiet_ms(self.quiet_ms)
            .with_quantum(Duration::from_millis(self.quantum_ms));

        if self.wait_done {
            let wait = match self.done_timeout {
                Some(secs) => DoneWait::Timeout(Duration::try_from_secs_f64(secs).map_err(
                    |_| CnpError::Config(format!("invalid done timeout: {}", secs)),
                )?),
                None => DoneWait::Unbounded,
            };
            config = config.with_wait_for_done(wait);
        }
        if self.guard_fast {
            config = config.with_lookahead(LookaheadConfig::enabled(self.alpha));
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct RoundOutput {
    job_id: String,
    job_type: String,
    bids: usize,
    stop_reason: String,
    collection_ms: u128,
    winner: Option<String>,
    eta_s: Option<f64>,
    guard_applied: bool,
    completion: String,
    elapsed_s: Option<f64>,
}

impl From<&RoundOutcome> for RoundOutput {
    fn from(outcome: &RoundOutcome) -> Self {
        let completion = match &outcome.result {
            RoundResult::NoWinner => "skipped",
            RoundResult::Awarded { completion, .. } => match completion {
                Completion::NotAwaited => "pipelined",
                Completion::Done(_) => "done",
                Completion::TimedOut => "timed out",
                Completion::Cancelled => "cancelled",
            },
        };
        Self {
            job_id: outcome.job.job_id.clone(),
            job_type: outcome.job.job_type.clone(),
            bids: outcome.proposals.len(),
            stop_reason: outcome.stop_reason.to_string(),
            collection_ms: outcome.collection_time.as_millis(),
            winner: outcome.winner().map(|w| w.machine_id.clone()),
            eta_s: outcome.winner().map(|w| w.eta_s),
            guard_applied: outcome.guard_applied(),
            completion: completion.to_string(),
            elapsed_s: outcome.done().map(|d| d.elapsed_s()),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn connect_bus(config: &BusConfig, client_id: &str) -> Result<SharedBus, CnpError> {
    let bus = RemoteBus::connect(config.endpoint(), client_id).await?;
    Ok(Arc::new(bus))
}

fn print_outcomes(
    outcomes: &[RoundOutcome],
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<RoundOutput> = outcomes.iter().map(RoundOutput::from).collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No rounds run.");
                return Ok(());
            }

            println!(
                "{:<14} {:<8} {:<5} {:<14} {:<10} {:<7} {:<10} {:<9}",
                "JOB ID", "TYPE", "BIDS", "STOPPED BY", "WINNER", "ETA", "RESULT", "ELAPSED"
            );
            println!("{}", "-".repeat(84));
            for row in &rows {
                let winner = match (&row.winner, row.guard_applied) {
                    (Some(w), true) => format!("{}*", w),
                    (Some(w), false) => w.clone(),
                    (None, _) => "-".to_string(),
                };
                println!(
                    "{:<14} {:<8} {:<5} {:<14} {:<10} {:<7} {:<10} {:<9}",
                    row.job_id,
                    row.job_type,
                    row.bids,
                    row.stop_reason,
                    winner,
                    row.eta_s.map(|e| format!("{:.2}", e)).unwrap_or_else(|| "-".into()),
                    row.completion,
                    row.elapsed_s
                        .map(|e| format!("{:.3}s", e))
                        .unwrap_or_else(|| "-".into()),
                );
            }
            if rows.iter().any(|r| r.guard_applied) {
                println!("\n* picked by the lookahead guard");
            }
        }
    }

    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_broker(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let shutdown = install_shutdown_handler();
    BrokerServer::new().run(addr, shutdown).await?;
    Ok(())
}

async fn run_machine(bus_args: BusArgs, args: MachineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.config()?;
    let bus_config = bus_args.config();
    let bus = connect_bus(&bus_config, &config.machine_id).await?;

    let shutdown = install_shutdown_handler();
    let agent = MachineAgent::new(config, Topics::new(&bus_config.prefix), bus);
    agent.start(shutdown).await?.await??;
    Ok(())
}

async fn run_supervisor(
    bus_args: BusArgs,
    rounds: RoundArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = rounds.config()?;
    let bus_config = bus_args.config();
    let bus = connect_bus(&bus_config, "supervisor").await?;

    let shutdown = install_shutdown_handler();
    let mut supervisor = Supervisor::connect(config, Topics::new(&bus_config.prefix), bus).await?;
    let outcomes = supervisor.run(&shutdown).await?;
    print_outcomes(&outcomes, &output)
}

async fn run_observer(
    bus_args: BusArgs,
    dashboard_port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus_config = bus_args.config();
    let bus = connect_bus(&bus_config, "observer").await?;

    let ledger = Arc::new(RwLock::new(JobLedger::new()));
    if let Some(port) = dashboard_port {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        let state = DashboardState {
            ledger: ledger.clone(),
        };
        tokio::spawn(run_dashboard(addr, state));
    }

    let shutdown = install_shutdown_handler();
    let observer = Observer::new(Topics::new(&bus_config.prefix), ledger);
    let subscription = observer.subscribe(&bus).await?;
    observer.run(subscription, shutdown).await?;
    Ok(())
}

async fn run_demo(
    rounds: RoundArgs,
    prefix: String,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = rounds.config()?;
    let topics = Topics::new(&prefix);
    let bus: SharedBus = Arc::new(MemoryBus::new());
    let shutdown = install_shutdown_handler();

    let machines = [
        ("M1", "cut:3,drill:5"),
        ("M2", "cut:4,paint:2.5"),
        ("M3", "drill:4,paint:3,cut:3.3"),
    ];
    let mut handles = Vec::with_capacity(machines.len());
    for (machine_id, caps) in machines {
        let machine_config = MachineConfig::new(machine_id, Capabilities::parse_list(caps)?);
        let agent = MachineAgent::new(machine_config, topics.clone(), bus.clone());
        handles.push(agent.start(shutdown.child_token()).await?);
    }

    let mut supervisor = Supervisor::connect(config, topics, bus).await?;
    let outcomes = supervisor.run(&shutdown).await?;

    shutdown.cancel();
    for handle in handles {
        handle.await??;
    }
    print_outcomes(&outcomes, &output)
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Broker { port } => run_broker(port).await?,
        Commands::Machine { bus, machine } => run_machine(bus, machine).await?,
        Commands::Supervisor {
            bus,
            rounds,
            output,
        } => run_supervisor(bus, rounds, output).await?,
        Commands::Observe {
            bus,
            dashboard_port,
        } => run_observer(bus, dashboard_port).await?,
        Commands::Demo {
            rounds,
            prefix,
            output,
        } => run_demo(rounds, prefix, output).await?,
    }

    Ok(())
}
