use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use http::{Method, Request};
use token_renew::config::file_to_config;
use token_renew::observability::metrics::gather_metrics;
use token_renew::utils::logging::{self, LogLevel};
use token_renew::{Authenticator, Body, RequestContext};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "token-renew.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
    /// Protected resource to call
    #[arg(short, long)]
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request body sent with the call
    #[arg(short, long)]
    data: Option<String>,
    /// Print the metrics exposition after the call
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config, init logging
    // -------------------------------

    let args = Args::parse();
    let service_config = file_to_config(Path::new(&args.config))
        .await
        .with_context(|| format!("Invalid config: {}", args.config))?;
    logging::run(&service_config.settings, args.log_level);

    // -------------------------------
    // 2. Build the authenticating transport
    // -------------------------------

    let credentials = service_config.credentials.to_client_credentials().await?;
    let auth = Authenticator::with_reqwest(credentials, reqwest::Client::new());

    // -------------------------------
    // 3. Send one request
    // -------------------------------

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{}'", args.method))?;
    let body = args.data.map(Body::from).unwrap_or_default();
    let mut ctx = RequestContext::new();
    if let Some(timeout_ms) = service_config.settings.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(timeout_ms));
    }
    let request = ctx.attach(Request::builder().method(method).uri(&args.url).body(body)?);

    info!(url = %args.url, "sending request");
    let response = auth.send(request).await?;
    let status = response.status();
    let text = response.into_body().text().await?;
    println!("{status}");
    println!("{text}");

    if args.metrics {
        println!("{}", gather_metrics().await?);
    }
    info!(generation = auth.generation(), "done");

    Ok(())
}
