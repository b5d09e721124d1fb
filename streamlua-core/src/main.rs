//! StreamLua - Stream Worker with Embedded Lua
//!
//! Loads a worker configuration, runs the worker-init Lua hook once and
//! then idles until interrupted.

use anyhow::Result;
use streamlua_core::{init_tracing, start_worker};
use tracing::info;

const DEFAULT_CONFIG: &str = "streamlua.json";

fn print_help() {
    println!("streamlua - Stream Worker with Embedded Lua v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  streamlua [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help           Print this help message");
    println!("  -v, --version        Print version information");
    println!("  -c, --config <PATH>  Worker configuration (default: {DEFAULT_CONFIG})");
    println!();
    println!("ENVIRONMENT:");
    println!("  STREAMLUA_LOG        Log filter (default: info)");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DEFAULT_CONFIG.to_owned();

    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("streamlua {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "-c" | "--config" => match rest.next() {
                Some(path) => config = path.clone(),
                None => {
                    eprintln!("error: '{arg}' requires a path");
                    std::process::exit(1);
                }
            },
            _ => {
                eprintln!("error: unrecognized argument '{arg}'");
                eprintln!("Run 'streamlua --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    init_tracing()?;

    let _state = match start_worker(&config).await {
        Ok(state) => state,
        Err(err) => {
            eprintln!("streamlua: {err:#}");
            std::process::exit(1);
        }
    };

    info!("Worker ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
