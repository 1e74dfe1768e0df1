//! Vortek bridge CLI - serves render contexts over a local socket.
//!
//! This is the main binary entry point. See the `vortek_bridge` library
//! for the core functionality.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vortek_bridge::renderer::LoopbackBackend;
use vortek_bridge::window::LocalWindowManager;
use vortek_bridge::{RenderOptions, RenderThread, RendererComponent, ServerConfig};

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

// CLI
#[derive(Parser)]
#[command(name = "vortek-bridge")]
#[command(version)]
#[command(about = "Render context broker for display-server clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve render contexts with the loopback backend until interrupted
    Serve {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Socket path (relative paths resolve against the configured root)
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Render options as key=value pairs, e.g. "vkMaxVersion=1.2,maxDeviceMemory=2048"
        #[arg(long)]
        options: Option<String>,
        /// Refuse context creation beyond this many live contexts
        #[arg(long)]
        max_contexts: Option<usize>,
    },
    /// Parse render options and print them as JSON
    Options {
        /// Render options as key=value pairs
        #[arg(default_value = "")]
        settings: String,
    },
}

/// Runs the renderer component until a shutdown signal arrives.
fn run_server(
    config_path: Option<PathBuf>,
    socket: Option<PathBuf>,
    options: Option<String>,
    max_contexts: Option<usize>,
) -> Result<()> {
    let mut config = ServerConfig::load(config_path.as_deref())?;
    if let Some(socket) = socket {
        config.socket_path = socket;
    }
    if let Some(options) = options {
        config.render_options = options;
    }

    // Validate everything before binding anything
    let render_options = config.render().context("Invalid render options")?;
    let socket_config = config.socket_config()?;

    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let render_thread = RenderThread::spawn("vortek-render")?;
    let backend = match max_contexts {
        Some(limit) => LoopbackBackend::new().with_context_limit(limit),
        None => LoopbackBackend::new(),
    };

    let mut renderer = RendererComponent::new(
        Arc::new(LocalWindowManager::new()),
        Arc::new(backend),
        render_thread.queue(),
        socket_config,
        render_options,
    );
    renderer.start()?;

    println!("Listening on {}", renderer.socket_path().display());
    log::info!("vortek-bridge v{} started", env!("CARGO_PKG_VERSION"));

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    println!("Shutting down...");
    renderer.stop();
    render_thread.shutdown();

    Ok(())
}

/// Prints parsed render options, including the packed API version.
fn print_options(settings: &str) -> Result<()> {
    let options = RenderOptions::from_key_values(settings)?;
    let output = serde_json::json!({
        "max_api_version": options.max_api_version.to_string(),
        "max_api_version_packed": options.max_api_version.packed(),
        "max_device_memory": options.max_device_memory,
        "image_cache_size": options.image_cache_size,
        "exposed_device_extensions": options.exposed_device_extensions,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            socket,
            options,
            max_contexts,
        } => {
            run_server(config, socket, options, max_contexts)?;
        }
        Commands::Options { settings } => {
            print_options(&settings)?;
        }
    }

    Ok(())
}
