//! Command-line driver for the OffKit offline layer.
//!
//! Runs the layer over a disk-backed cache store and the live network.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the static manifest and activate
//! offkit --config offkit.json install
//!
//! # Route a request through the layer
//! offkit fetch https://app.example/ --navigate
//!
//! # Post a control message
//! offkit message '{"type":"CLEAR_CACHE"}'
//!
//! # List cache names and their entries
//! offkit caches --entries
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use http::Method;
use offkit_common::{init_logging, LogConfig, LogFormat};
use offkit_net::{HttpTransport, LoaderConfig, Request, RequestMode, Response, Transport, Url};
use offkit_sw::{
    CacheStorage, DiskStore, FetchOutcome, Registration, ServiceWorkerEvent, SwConfig,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "offkit")]
#[command(about = "Offline request-interception cache")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache store directory
    #[arg(short, long, global = true, default_value = ".offkit")]
    store: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace, -vvv dependencies too)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured version and activate it
    Install,

    /// Route a request through the active version
    Fetch {
        /// Absolute request URL
        url: String,
        /// Treat as a top-level navigation
        #[arg(short, long)]
        navigate: bool,
        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Print response headers
        #[arg(long)]
        headers: bool,
    },

    /// Post a control message such as {"type":"SKIP_WAITING"}
    Message {
        /// Message JSON
        json: String,
    },

    /// List caches
    Caches {
        /// Also list the keys in each cache
        #[arg(short, long)]
        entries: bool,
    },

    /// Delete every cache
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose).with_env_overrides();
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("logging already initialized: {e}");
    }

    let config = load_config(cli.config.as_deref())?;
    let store = DiskStore::open_root(&cli.store)
        .await
        .with_context(|| format!("opening store at {}", cli.store.display()))?;
    let caches = CacheStorage::new(Arc::new(store));
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(LoaderConfig::default())?);

    let (registration, mut events) = Registration::new(caches.clone(), Arc::clone(&transport));

    match cli.command {
        Commands::Install => {
            let worker = registration.register(config).await?;
            println!(
                "Installed {} ({}) as {}",
                worker.names().precache_name(),
                worker.version(),
                worker.state().await
            );
        }

        Commands::Fetch {
            url,
            navigate,
            method,
            headers,
        } => {
            restore(&registration, config).await?;
            let request = build_request(&url, navigate, &method)?;

            let response = match registration.handle_fetch(&request).await {
                FetchOutcome::Respond(response) => response,
                FetchOutcome::Passthrough => {
                    debug!(url = %request.url, "Not intercepted, fetching directly");
                    transport.fetch(&request).await?
                }
            };
            registration.settle().await;
            print_response(&response, headers);
        }

        Commands::Message { json } => {
            restore(&registration, config).await?;
            let value: serde_json::Value =
                serde_json::from_str(&json).context("message is not valid JSON")?;
            match registration.post_message(&value).await {
                Some(message) => println!("Handled {message:?}"),
                None => println!("Ignored"),
            }
        }

        Commands::Caches { entries } => {
            for name in caches.keys().await? {
                println!("{name}");
                if entries {
                    for key in caches.open(&name).await?.keys().await? {
                        println!("  {key}");
                    }
                }
            }
        }

        Commands::Clear => {
            let deleted = registration.clear_all_caches().await;
            println!("Deleted {} cache(s)", deleted.len());
        }
    }

    log_events(&mut events);
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SwConfig> {
    let config = match path {
        Some(path) => SwConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SwConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn restore(registration: &Registration, config: SwConfig) -> anyhow::Result<()> {
    if registration.restore(config).await?.is_none() {
        warn!("No installed version found; requests will not be intercepted");
    }
    Ok(())
}

fn build_request(url: &str, navigate: bool, method: &str) -> anyhow::Result<Request> {
    let url = Url::parse(url).with_context(|| format!("invalid URL {url:?}"))?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {method:?}"))?;
    if navigate && method != Method::GET {
        bail!("navigations must use GET");
    }

    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url).mode(RequestMode::NoCors)
    };
    Ok(request.method(method))
}

fn print_response(response: &Response, headers: bool) {
    if response.is_error() {
        println!("Network error (no response)");
        return;
    }

    println!("{} {}", response.status, response.status_text);
    if headers {
        for (name, value) in &response.headers {
            println!("{}: {}", name, String::from_utf8_lossy(value.as_bytes()));
        }
    }
    println!();
    if is_textual(response) {
        println!("{}", response.text());
    } else {
        println!("<{} bytes of binary content>", response.body().len());
    }
}

/// Whether the body is worth printing to a terminal.
fn is_textual(response: &Response) -> bool {
    match response.content_type() {
        Some(content_type) => {
            content_type.type_() == mime::TEXT
                || [mime::JSON, mime::JAVASCRIPT, mime::XML]
                    .into_iter()
                    .any(|name| content_type.subtype() == name || content_type.suffix() == Some(name))
        }
        None => std::str::from_utf8(response.body()).is_ok(),
    }
}

fn log_events(events: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ServiceWorkerEvent::StateChange {
                worker_id,
                version,
                new_state,
            } => info!(worker = %worker_id, %version, state = %new_state, "State change"),
            ServiceWorkerEvent::CachesCleared { deleted } => {
                info!(count = deleted.len(), "Caches cleared")
            }
            other => debug!(event = ?other, "Event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_fetch() {
        let cli = Cli::parse_from(["offkit", "-vv", "fetch", "https://app.example/", "--navigate"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.store, PathBuf::from(".offkit"));
        match cli.command {
            Commands::Fetch {
                url,
                navigate,
                method,
                ..
            } => {
                assert_eq!(url, "https://app.example/");
                assert!(navigate);
                assert_eq!(method, "GET");
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_build_request() {
        let request = build_request("https://app.example/guides", true, "get").unwrap();
        assert!(request.is_navigation());
        assert_eq!(request.method, Method::GET);

        let post = build_request("https://x.supabase.co/rest", false, "POST").unwrap();
        assert_eq!(post.method, Method::POST);

        assert!(build_request("https://app.example/", true, "POST").is_err());
        assert!(build_request("not a url", false, "GET").is_err());
    }

    #[test]
    fn test_textual_bodies() {
        use http::header::CONTENT_TYPE;
        use http::HeaderValue;

        let typed = |value: &'static str, body: &'static [u8]| {
            Response::new(200, body).with_header(CONTENT_TYPE, HeaderValue::from_static(value))
        };

        assert!(is_textual(&typed("text/html; charset=utf-8", b"<html>")));
        assert!(is_textual(&typed("application/json", b"{}")));
        assert!(is_textual(&typed("application/manifest+json", b"{}")));
        assert!(is_textual(&typed("application/javascript", b"export {}")));
        assert!(!is_textual(&typed("font/woff2", b"wOF2")));
        assert!(!is_textual(&typed("image/png", &[0x89, b'P', b'N', b'G'])));

        assert!(is_textual(&Response::new(200, "plain")));
        assert!(!is_textual(&Response::new(200, vec![0u8, 159, 146, 150])));
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offkit.json");
        std::fs::write(&path, r#"{"origin":"https://app.example","version":"2.1.0"}"#).unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.version, "2.1.0");
        assert!(load_config(Some(dir.path().join("missing.json").as_path())).is_err());
    }
}
