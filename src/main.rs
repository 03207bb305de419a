mod auth;
mod codec;
mod config;
mod error;
mod exec;
mod handler;
mod kv;
mod model;
mod registry;
mod runtime;
mod session;
mod tty_size;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use russh::server::Server as _;
use russh_keys::load_secret_key;
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::auth::AuthResolver;
use crate::config::Config;
use crate::handler::Gateway;
use crate::kv::ConsulKvStore;
use crate::registry::MySqlRegistry;
use crate::runtime::BollardRuntime;

#[derive(Parser, Debug)]
#[clap(version, author, about = "SSH front-door onto container-runtime exec sessions")]
struct Args {
    #[clap(short, long, help = "a toml file containing configuration")]
    config_file: String,
    #[clap(short, long, action = clap::ArgAction::Count,
           help = "show more in logs, may be provided multiple times")]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "sshexecd=info",
        1 => "sshexecd=debug",
        _ => "sshexecd=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load(&args.config_file).context("loading configuration")?;

    let pool = MySqlPoolOptions::new()
        .connect(&config.database_url)
        .await
        .context("connecting to the container registry database")?;
    let registry = Arc::new(MySqlRegistry::new(pool));
    let auth = Arc::new(AuthResolver::new(registry));

    let kv = Arc::new(ConsulKvStore::new(config.kv_host.clone(), config.kv_key_prefix.clone()));

    let runtime = Arc::new(
        BollardRuntime::connect(&config.runtime_socket_path, &config.runtime_api_version)
            .context("connecting to the container runtime")?,
    );

    let host_key = load_secret_key(&config.host_key_path, None)
        .context("loading host private key")?;

    let server_config = Arc::new(russh::server::Config {
        keys: vec![host_key],
        ..Default::default()
    });

    let mut gateway = Gateway::new(auth, kv, runtime, config.default_shell_env_var.clone());

    let socket = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "listening");
    gateway
        .run_on_socket(server_config, &socket)
        .await
        .context("running ssh server")?;

    Ok(())
}
