mod assistant;
mod auth;
#[allow(dead_code)]
mod chat;
mod config;
mod daemon;
mod error;
mod notices;
#[allow(dead_code)]
mod remote;
mod server;
mod store;
mod sync;
mod types;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Handle CLI arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("panchayatd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("panchayatd {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: panchayatd [OPTIONS]\n");
                println!("Options:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                println!("\nConfiguration is read from config.toml in the working directory;");
                println!("GEMINI_API_KEY in the environment (or .env) overrides the file.");
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let config = config::AppConfig::load(&PathBuf::from("config.toml"))?;

    // Run async
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(daemon::run(config))
}
