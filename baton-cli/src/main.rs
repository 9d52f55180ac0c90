mod server;
mod handlers;

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use baton_core::client::BatonClient;
use baton_core::error::LockError;
use baton_core::lock::TicketLockConfig;
use baton_core::logging::{self, LogConfig};

/// Time left to the background release after Ctrl-C, before the process exits.
const RELEASE_GRACE: Duration = Duration::from_millis(200);

/// Conventional exit status of a process stopped by SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(
    name = "baton",
    about = "Baton: run commands one at a time across processes, through a shared ticket queue",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueueArgs {
    /// Storage backend: "memory" or "sqlite:<path>"
    #[arg(long, default_value = "memory", env = "BATON_STORAGE")]
    storage: String,

    /// Queue name; callers on different queues never wait on each other
    #[arg(long, default_value = "default", env = "BATON_QUEUE")]
    queue: String,

    /// Delay between two reads of the queue head, in milliseconds
    #[arg(long, default_value_t = 200, env = "BATON_POLL_MS")]
    poll_ms: u64,

    /// How long the same head may block the queue before it is evicted, in milliseconds
    #[arg(long, default_value_t = 30_000, env = "BATON_MAX_WAIT_MS")]
    max_wait_ms: u64,
}

impl QueueArgs {
    fn client(&self) -> Result<BatonClient, String> {
        let client = server::create_client(&self.storage, &self.queue)?;
        Ok(client.with_lock_config(TicketLockConfig {
            poll_interval: Duration::from_millis(self.poll_ms),
            max_wait: Duration::from_millis(self.max_wait_ms),
            ..TicketLockConfig::default()
        }))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Baton HTTP inspection server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[command(flatten)]
        queue: QueueArgs,
    },

    /// Run a command while holding the queue's ticket lock
    Run {
        #[command(flatten)]
        queue: QueueArgs,

        /// Command and arguments, after `--`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Print the pending tickets of a queue as JSON
    Tickets {
        #[command(flatten)]
        queue: QueueArgs,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init(&LogConfig::from_env("baton")) {
        eprintln!("{}", e);
    }

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Serve { port, host, queue } => match queue.client() {
            Ok(client) => server::run(&host, port, client)
                .await
                .map(|()| ExitCode::SUCCESS)
                .map_err(|e| format!("Server error: {}", e)),
            Err(e) => Err(e),
        },
        Commands::Run { queue, command } => run_command(&queue, &command).await,
        Commands::Tickets { queue } => list_tickets(&queue).await,
        Commands::Version => {
            println!("baton {}", env!("CARGO_PKG_VERSION"));
            println!("Cross-process ticket lock and correlated pub/sub exchange");
            Ok(ExitCode::SUCCESS)
        }
    };

    outcome.unwrap_or_else(|e| {
        tracing::error!("{}", e);
        eprintln!("baton: {}", e);
        ExitCode::FAILURE
    })
}

async fn run_command(args: &QueueArgs, command: &[String]) -> Result<ExitCode, String> {
    let Some((program, rest)) = command.split_first() else {
        return Err("no command given".to_string());
    };
    if args.storage == "memory" {
        tracing::warn!("In-memory storage only serializes within this process; use sqlite:<path> to coordinate shells");
    }

    let client = args.client()?;
    let lock = client.lock();

    let guarded = lock.run(async {
        tracing::info!(program = %program, queue = %args.queue, "▶️  Running under ticket lock");
        tokio::process::Command::new(program).args(rest).status().await
    });

    let outcome = tokio::select! {
        outcome = guarded => outcome,
        () = interrupted() => {
            // The dropped lock future releases its ticket on a spawned task.
            tracing::warn!(queue = %args.queue, "🛑 Interrupted, releasing ticket");
            tokio::time::sleep(RELEASE_GRACE).await;
            return Ok(ExitCode::from(INTERRUPTED_EXIT));
        }
    };
    let status = outcome.map_err(|e| match e {
        LockError::Store(e) => format!("ticket queue unavailable: {}", e),
        LockError::Operation(e) => format!("failed to start '{}': {}", program, e),
    })?;

    tracing::info!(program = %program, status = %status, "⏹️  Command finished");
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

async fn list_tickets(args: &QueueArgs) -> Result<ExitCode, String> {
    let tickets = args
        .client()?
        .tickets()
        .await
        .map_err(|e| e.to_string())?;
    let rendered = serde_json::to_string_pretty(&handlers::TicketInfo::from_queue(tickets))
        .map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(ExitCode::SUCCESS)
}
