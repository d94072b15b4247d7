//! farcall-greeter: serves a `Greeter` interface, registers it, then calls it
//! through a generated proxy.
//!
//! With `--consul` the service is registered with and resolved through a
//! Consul agent; otherwise an in-process catalog is used.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::Level;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use farcall::Client;
use farcall::ClientConfig;
use farcall::RemoteProxy;
use farfind::Address;
use farfind::ConsulCatalog;
use farfind::HealthCheck;
use farfind::MemoryCatalog;
use farfind::ServiceDiscovery;
use farfind::ServiceRegistry;
use farwire::FaultKind;
use farwire::RemoteFault;
use farwire::Response;

farcall::remote_interface! {
    /// Says hello.
    pub trait Greeter => GreeterClient {
        fn say_hello(&self, name: String) -> String;
    }
}

#[derive(Parser, Debug)]
#[command(name = "farcall-greeter")]
#[command(about = "Serve and call a Greeter over farcall")]
struct Args {
    /// Name to greet
    #[arg(default_value = "world")]
    name: String,

    /// Host to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Consul agent as host:port; omit to use an in-process catalog
    #[arg(long)]
    consul: Option<String>,

    /// Per-call timeout in milliseconds; overrides FARCALL_CALL_TIMEOUT_MS
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

/// The environment's config, with `--timeout-ms` taking precedence when given.
fn client_config(
    timeout_ms: Option<u64>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig> {
    let config = ClientConfig::from_lookup(lookup)?;
    Ok(match timeout_ms {
        Some(millis) => config.call_timeout(Duration::from_millis(millis)),
        None => config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let address = Address::from(listener.local_addr()?);
    tokio::spawn(farcall::responder::serve(listener, |request| async move {
        match (request.method.as_str(), request.args.first()) {
            ("say_hello", Some(name)) => {
                let name = name.as_str().unwrap_or_default();
                Response::ok(request.id, json!(format!("Hello, {}", name)))
            }
            (method, _) => Response::fault(
                request.id,
                RemoteFault::new(FaultKind::MethodNotFound, format!("no method '{}'", method)),
            ),
        }
    }));
    info!(%address, "greeter listening");

    let (registry, discovery) = match &args.consul {
        Some(agent) => {
            let catalog = Arc::new(ConsulCatalog::new(agent)?);
            let registry: Arc<dyn ServiceRegistry> = catalog.clone();
            let discovery: Arc<dyn ServiceDiscovery> = catalog;
            (registry, discovery)
        }
        None => {
            let catalog = Arc::new(MemoryCatalog::new());
            let registry: Arc<dyn ServiceRegistry> = catalog.clone();
            let discovery: Arc<dyn ServiceDiscovery> = catalog;
            (registry, discovery)
        }
    };

    registry
        .register(GreeterClient::SERVICE, &address, HealthCheck::tcp(Duration::from_secs(1)))
        .await?;

    let config = client_config(args.timeout_ms, |var| std::env::var(var).ok())?;
    let client = Client::builder().config(config).discovery(discovery).build()?;

    let greeter: GreeterClient = client.proxy();
    let greeting = greeter.say_hello(args.name).await?;
    println!("{}", greeting);

    client.shutdown();
    registry.deregister(GreeterClient::SERVICE, &address).await?;
    Ok(())
}
