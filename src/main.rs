use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use lparsched::config::DaemonConfig;
use lparsched::executor::ExecutorRegistry;
use lparsched::scheduler::job::Request;
use lparsched::scheduler::SchedulerLoop;
use lparsched::shutdown::install_shutdown_handler;
use lparsched::store::{FsStore, Store};
use lparsched::supervisor::process::UnixProcesses;
use lparsched::supervisor::{supervise, SupervisorOpts};

#[derive(Parser, Debug)]
#[command(name = "lparsched")]
#[command(version)]
#[command(about = "Job scheduler and process supervisor for mainframe provisioning")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the scheduler daemon
    Server(ServerArgs),

    /// Create a submit request for the daemon to pick up
    Submit(SubmitArgs),

    /// Create a cancel request for an existing job
    Cancel(CancelArgs),

    /// Child-process entry point used by the daemon to host one job's
    /// executor. Not meant to be invoked by hand.
    #[command(hide = true)]
    Supervise(SuperviseArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Directory for persisted job/request documents
    #[arg(long, default_value = "/var/lib/lparsched/state")]
    state_dir: PathBuf,

    /// Directory for per-job working directories
    #[arg(long, default_value = "/var/lib/lparsched/jobs")]
    jobs_dir: PathBuf,

    /// Seconds between scheduler iterations
    #[arg(long, default_value = "2")]
    interval_secs: u64,

    /// Seconds a canceled job's cleanup may run before it is given up on
    #[arg(long, default_value = "60")]
    grace_secs: u64,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    #[arg(long, default_value = "/var/lib/lparsched/state")]
    state_dir: PathBuf,

    /// Requesting user
    #[arg(long, default_value = "admin")]
    requester: String,

    /// Executor name (e.g. "echo")
    job_type: String,

    /// Raw parameters passed to the executor's parser
    parameters: String,

    /// Priority, lower value runs first
    #[arg(long, default_value = "0")]
    priority: i32,

    /// Execution budget in minutes, 0 = unbounded
    #[arg(long, default_value = "0")]
    timeout: u32,

    /// Desired earliest start (RFC 3339)
    #[arg(long)]
    start_date: Option<DateTime<Utc>>,
}

#[derive(Parser, Debug)]
struct CancelArgs {
    #[arg(long, default_value = "/var/lib/lparsched/state")]
    state_dir: PathBuf,

    #[arg(long, default_value = "admin")]
    requester: String,

    /// Id of the job to cancel
    job_id: Uuid,
}

#[derive(Parser, Debug)]
struct SuperviseArgs {
    #[arg(long)]
    job_id: Uuid,

    #[arg(long)]
    state_dir: PathBuf,

    #[arg(long)]
    jobs_dir: PathBuf,

    #[arg(long, default_value = "60")]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Submit(submit_args) => run_submit(submit_args)?,
        Commands::Cancel(cancel_args) => run_cancel(cancel_args)?,
        Commands::Supervise(supervise_args) => run_supervise(supervise_args).await?,
    }
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::new(args.state_dir, args.jobs_dir)
        .with_loop_interval(Duration::from_secs(args.interval_secs))
        .with_cleanup_grace(Duration::from_secs(args.grace_secs));
    std::fs::create_dir_all(&config.jobs_dir)?;

    let store = FsStore::open(&config.state_dir)?;
    let registry = ExecutorRegistry::builtin();
    let processes = UnixProcesses::new(config.clone());
    let shutdown = install_shutdown_handler();

    tracing::info!(
        state_dir = %config.state_dir.display(),
        jobs_dir = %config.jobs_dir.display(),
        "Scheduler daemon starting"
    );
    let looper = SchedulerLoop::new(config, store, registry, processes);
    looper.run(shutdown).await?;
    Ok(())
}

fn run_submit(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsStore::open(&args.state_dir)?;
    let mut request = Request::submit(args.requester, args.job_type, args.parameters)
        .with_priority(args.priority)
        .with_timeout(args.timeout);
    if let Some(start) = args.start_date {
        request = request.with_start_date(start);
    }
    store.create_request(&request)?;
    println!("Request {} created", request.id);
    Ok(())
}

fn run_cancel(args: CancelArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsStore::open(&args.state_dir)?;
    let request = Request::cancel(args.requester, args.job_id);
    store.create_request(&request)?;
    println!("Request {} created", request.id);
    Ok(())
}

async fn run_supervise(args: SuperviseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ExecutorRegistry::builtin();
    let opts = SupervisorOpts {
        job_id: args.job_id,
        state_dir: args.state_dir,
        jobs_dir: args.jobs_dir,
        cleanup_grace: Duration::from_secs(args.grace_secs),
        // Execution budgets are advisory for now; the deadline arm stays
        // disarmed.
        execution_deadline: None,
    };
    let code = supervise(opts, &registry).await?;
    // The authoritative result code travels through the result file; the
    // process exit status only distinguishes success from failure.
    std::process::exit(if code == 0 { 0 } else { 1 });
}
