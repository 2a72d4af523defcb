//! jobspool CLI: operator interface to a queue directory.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use jobspool::config::Config;
use jobspool::model::job::due_in;
use jobspool::telemetry::{TelemetryConfig, init_telemetry};
use jobspool::{HookExecutor, JobId, JobStore, Queue};

#[derive(Parser)]
#[command(name = "jobspool", about = "Disk-durable job queue")]
struct Cli {
    /// Queue directory (overrides JOBSPOOL_DIR and the config file)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queue, executing each job with a hook command
    Serve {
        /// Command run once per job; receives the payload on stdin
        #[arg(long)]
        hook: PathBuf,
        /// Extra arguments passed to the hook
        #[arg(last = true)]
        args: Vec<String>,
        /// Maximum simultaneous executions (overrides the config file)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Persist a new job into the queue directory
    Push {
        /// JSON payload
        payload: String,
        /// Delay before the job becomes due
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// List pending jobs
    List,
    /// Show one pending job
    Show {
        /// Job ID (full UUID or prefix)
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let mut queue_config = config.queue(cli.dir)?;

    match cli.command {
        Command::Serve {
            hook,
            args,
            concurrency,
        } => {
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "jobspool".to_string(),
                default_filter: config.log_level.clone(),
            })?;
            if let Some(n) = concurrency {
                queue_config.concurrency = n;
            }
            queue_config.auto_start = true;
            cmd_serve(queue_config, hook, args).await
        }
        Command::Push { payload, delay_ms } => {
            let store = JobStore::open(&queue_config.directory, queue_config.prettify_json).await?;
            cmd_push(&store, payload, delay_ms).await
        }
        Command::List => {
            let store = JobStore::new(&queue_config.directory, queue_config.prettify_json);
            cmd_list(&store).await
        }
        Command::Show { id } => {
            let store = JobStore::new(&queue_config.directory, queue_config.prettify_json);
            cmd_show(&store, id).await
        }
    }
}

async fn cmd_serve(
    config: jobspool::QueueConfig,
    hook: PathBuf,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let executor = HookExecutor::new(&hook, args)?;
    let queue = Queue::open(config, executor).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, draining running jobs");
    queue.destroy().await?;
    Ok(())
}

async fn cmd_push(store: &JobStore, payload: String, delay_ms: u64) -> anyhow::Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&payload)?;
    let due_at = due_in(Duration::from_millis(delay_ms));
    let job = store.create(payload, due_at);
    store.persist(&job).await?;
    println!("Queued: {} (due {})", job.id, job.due_at);
    Ok(())
}

async fn cmd_list(store: &JobStore) -> anyhow::Result<()> {
    let jobs = store.list().await?;

    if jobs.is_empty() {
        println!("No pending jobs.");
        return Ok(());
    }

    println!("{:<8}  {:<8}  {:<20}  PAYLOAD", "ID", "ATTEMPTS", "DUE");
    println!("{}", "-".repeat(80));

    for job in &jobs {
        let payload = job.payload.to_string();
        let payload_display = if payload.chars().count() > 40 {
            format!("{}...", payload.chars().take(40).collect::<String>())
        } else {
            payload
        };
        println!(
            "{:<8}  {:<8}  {:<20}  {}",
            job.id.short(),
            job.attempts,
            job.due_at.format("%Y-%m-%d %H:%M:%S"),
            payload_display
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_show(store: &JobStore, id_str: String) -> anyhow::Result<()> {
    // Support prefix matching against pending jobs
    let id = if id_str.len() < 36 {
        let jobs = store.list().await?;
        let matches: Vec<_> = jobs
            .iter()
            .filter(|job| job.id.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no pending job matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} jobs match prefix '{id_str}'; be more specific"),
        }
    } else {
        id_str.parse::<JobId>()?
    };

    let job = store.get(id).await?;

    println!("ID:         {}", job.id);
    println!("File:       {}", job.file().display());
    println!("Due:        {}", job.due_at);
    println!("Attempts:   {}", job.attempts);
    println!("Processing: {}", job.processing);
    println!("Created:    {}", job.created_at);
    println!(
        "Payload:    {}",
        serde_json::to_string_pretty(&job.payload)?
    );

    Ok(())
}
