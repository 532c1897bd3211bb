//! API gateway
//!
//! A request-processing gateway built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────────────┐
//!                          │                       API GATEWAY                        │
//!                          │                                                          │
//!   Client Request         │  ┌──────────┐   ┌──────────────────┐   ┌─────────────┐   │
//!   ───────────────────────┼─▶│   http   │──▶│   global stage   │──▶│   routing   │   │
//!                          │  │  server  │   │ sec·cors·auth·rl │   │   router    │   │
//!                          │  └──────────┘   └──────────────────┘   └──────┬──────┘   │
//!                          │                                               ▼          │
//!                          │                   ┌─────────────────────────────────┐    │
//!                          │                   │           route stage           │    │
//!                          │                   │ cors·sec·rl·auth·breaker·filters│    │
//!                          │                   └───────────────┬─────────────────┘    │
//!                          │                                   ▼                      │
//!   Client Response        │  ┌──────────┐   ┌──────────────────┐   ┌─────────────┐   │
//!   ◀──────────────────────┼──│ response │◀──│   hyper client   │◀──│load_balancer│◀──┼── Backend
//!                          │  └──────────┘   └──────────────────┘   └─────────────┘   │
//!                          │                                                          │
//!                          │  config · observability · admin · lifecycle              │
//!                          └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "Configurable API gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml", env = "GATEWAY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    api_gateway::lifecycle::startup::run(&args.config).await?;
    Ok(())
}
