use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde_json::Value;
use surreal_ws::{Incoming, Request, WsClientBuilder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "surreal-ws")]
#[command(about = "Send RPC requests over a database WebSocket connection", long_about = None)]
struct Args {
    /// WebSocket endpoint (falls back to SURREAL_WS_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// RPC method to call
    #[arg(short, long, default_value = "ping")]
    method: String,

    /// Parameters as a JSON array (e.g. '["SELECT * FROM person"]')
    #[arg(short, long)]
    params: Option<String>,

    /// Mark the request as async
    #[arg(long = "async")]
    is_async: bool,

    /// Keep listening for notifications on the request id until Ctrl+C
    #[arg(long)]
    live: bool,

    /// Receive buffer size in bytes
    #[arg(long, default_value_t = surreal_ws::pool::DEFAULT_BUFFER_SIZE)]
    receive_buffer: usize,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surreal_ws=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let url = args
        .url
        .or_else(|| std::env::var("SURREAL_WS_URL").ok())
        .unwrap_or_else(|| surreal_ws::config::DEFAULT_URL.to_string());

    let params: Vec<Value> = match &args.params {
        Some(raw) => serde_json::from_str(raw).context("--params must be a JSON array")?,
        None => Vec::new(),
    };

    let mux = WsClientBuilder::new(&url)
        .receive_buffer_size(args.receive_buffer)
        .connect_timeout_ms(args.timeout_ms)
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;

    let request = mux
        .request(&args.method)
        .with_params(params)
        .with_async(args.is_async);

    let result = if args.live {
        run_live(&mux, &request).await
    } else {
        match mux.send(&request).await {
            Ok(incoming) => print_message(incoming).await,
            Err(e) => Err(e.into()),
        }
    };

    mux.close().await?;
    result
}

async fn run_live(mux: &surreal_ws::Multiplexer, request: &Request) -> anyhow::Result<()> {
    let mut subscription = mux.subscribe(request).await?;
    tracing::info!("Listening on {} (Ctrl+C to stop)", subscription.id());

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            next = subscription.next() => Some(next),
        };

        match next {
            Some(Some(Ok(incoming))) => print_message(incoming).await?,
            Some(Some(Err(e))) => return Err(e.into()),
            Some(None) => return Ok(()),
            None => {
                tracing::info!("Stopping");
                subscription.cancel();
                return Ok(());
            }
        }
    }
}

async fn print_message(incoming: Incoming) -> anyhow::Result<()> {
    let (header, body) = incoming.into_parts();
    if let Some(error) = header.error().filter(|e| e.code != 0) {
        anyhow::bail!("{}", error);
    }

    let value: Option<Value> = body.read_value().await?;
    let value = value.unwrap_or(Value::Null);
    match header.method() {
        Some(method) => println!("{} {}", method, serde_json::to_string_pretty(&value)?),
        None => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}
