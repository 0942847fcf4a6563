use clap::Parser;
use powerguard_helper::{HelperService, ServeExit, DEFAULT_COMPONENT, HELPER_VERSION};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Privileged helper holding the power-action veto. Speaks JSON lines on
/// stdin/stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "powerguard-helper")]
#[command(version, about, long_about = None)]
struct Args {
    /// Component identifier clients must bind with
    #[arg(long, default_value = DEFAULT_COMPONENT)]
    component: String,

    /// Protocol version clients must bind with
    #[arg(long = "protocol-version", default_value_t = HELPER_VERSION)]
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_env("POWERGUARD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let service = HelperService::with_version(args.component, args.protocol_version);
    let exit = service
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .map_err(|e| anyhow::anyhow!("helper protocol error: {e}"))?;

    match exit {
        ServeExit::Rejected => anyhow::bail!("handshake rejected"),
        ServeExit::Requested | ServeExit::PeerClosed => Ok(()),
    }
}
