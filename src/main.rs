use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "planstream")]
#[command(version, about = "Streaming bridge for curriculum-generation workers")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP bridge server
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value = "7070")]
        port: u16,

        /// Worker program (defaults to PLANSTREAM_WORKER_CMD or python3)
        #[arg(long)]
        worker_cmd: Option<String>,

        /// Argument placed before the topic; repeat for multiple
        #[arg(long = "worker-arg")]
        worker_args: Vec<String>,

        /// Kill a worker after this long without output
        #[arg(long)]
        idle_timeout_secs: Option<u64>,

        /// Allow cross-origin requests (development mode)
        #[arg(long)]
        cors: bool,
    },
    /// Submit a topic to a running server and print the live stream
    Watch {
        topic: String,

        #[arg(long, default_value = "http://127.0.0.1:7070")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "planstream=debug" } else { "planstream=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            worker_cmd,
            worker_args,
            idle_timeout_secs,
            cors,
        } => {
            let mut config = planstream::config::Config::from_env();
            if let Some(worker_cmd) = worker_cmd {
                config.worker_cmd = worker_cmd;
            }
            if !worker_args.is_empty() {
                config.worker_args = worker_args;
            }
            if let Some(secs) = idle_timeout_secs {
                config.idle_timeout = std::time::Duration::from_secs(secs);
            }
            cmd::serve::run(&host, port, config, cors).await
        }
        Commands::Watch { topic, url } => cmd::watch::run(&url, &topic).await,
    }
}
