//! TrueNAS CLI - call middleware methods from the command line.
//!
//! Connects one DDP session, runs a single command, prints the JSON result
//! to stdout and closes the session. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use truenas_client::{Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "truenas-cli")]
#[command(about = "Call TrueNAS middleware methods over DDP")]
struct Args {
    /// TrueNAS host, optionally with a port
    #[arg(long, env = "TRUENAS_HOST")]
    host: String,

    /// API key used for authentication
    #[arg(long, env = "TRUENAS_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Accept self-signed or otherwise invalid TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Use plain ws:// and http:// instead of TLS
    #[arg(long)]
    no_tls: bool,

    /// Per-call timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a method and print its result
    Call {
        method: String,
        /// Parameters as JSON (an array is sent as-is)
        params: Option<String>,
    },
    /// Call a job-returning method and wait for the job to finish
    Job {
        method: String,
        params: Option<String>,
    },
    /// Wait for an existing job by id
    WaitJob {
        job_id: i64,
        /// Seconds to wait before giving up
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
    /// Upload a file through the HTTP upload endpoint
    Upload {
        file: PathBuf,
        /// JSON describing the method the upload belongs to
        #[arg(long)]
        data: String,
        #[arg(long, default_value = "/_upload/")]
        endpoint: String,
        /// File name sent to the server (defaults to the local name)
        #[arg(long)]
        filename: Option<String>,
    },
}

fn parse_json(label: &str, raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).with_context(|| format!("invalid {} JSON", label)),
        None => Ok(Value::Null),
    }
}

fn session_config(args: &Args) -> SessionConfig {
    SessionConfig::new(args.host.clone(), args.api_key.clone())
        .with_tls(!args.no_tls)
        .with_accept_invalid_certs(args.insecure)
        .with_call_timeout(Duration::from_secs(args.timeout))
}

async fn run(session: &Session, command: Command) -> Result<Value> {
    let value = match command {
        Command::Call { method, params } => {
            let params = parse_json("params", params.as_deref())?;
            session.call(&method, params).await?
        }
        Command::Job { method, params } => {
            let params = parse_json("params", params.as_deref())?;
            session.call_with_job(&method, params).await?
        }
        Command::WaitJob { job_id, timeout } => {
            let job = session
                .wait_for_job(job_id, Duration::from_secs(timeout))
                .await?;
            serde_json::json!({
                "id": job.id,
                "state": job.state,
                "result": job.result,
            })
        }
        Command::Upload {
            file,
            data,
            endpoint,
            filename,
        } => {
            let data = parse_json("data", Some(&data))?;
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let filename = filename.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "upload".to_string())
            });
            session
                .upload_file(&endpoint, &data, content, &filename)
                .await?
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = session_config(&args);
    debug!("Session config: {:?}", config);

    let session = Session::new(config);
    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", args.host))?;
    info!("Connected to {}", args.host);

    let outcome = run(&session, args.command).await;
    session.close().await?;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
