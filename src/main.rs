mod command_line_arguments;

use crate::command_line_arguments::HostmuxArguments;
use anyhow::{Context, Result};
use clap::Parser;
use hostmux::config::manager::StateHandle;
use hostmux::config::{Config, ProxyMode};
use hostmux::proxy::client::UpstreamClients;
use hostmux::proxy::{start_http_server, start_https_server, start_passthrough_server};
use hostmux::state::ProxyState;
use log::{LevelFilter, error, info, trace};
use pretty_env_logger::env_logger::Target;
use std::fs::OpenOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let args = HostmuxArguments::parse();

    let config = match Config::try_load(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            // the logger is not configured yet
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    init_logger(&args, &config)?;

    info!("Starting hostmux in {:?} mode", config.get_mode());
    trace!("Arguments: {:#?}", args);

    let state = match ProxyState::build(config).await {
        Ok(state) => state,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };
    if args.check {
        info!("Configuration {} is valid", args.config_path);
        println!("{}", state.get_config());
        return Ok(());
    }

    let clients = UpstreamClients::new(state.get_config())?;
    let mode = state.get_config().get_mode();
    let handle = StateHandle::new(state);
    handle.reload_on_hangup()?;
    if args.watch_config {
        handle.watch_config_file()?;
    }

    // Run the plaintext server next to whichever TLS listener the mode needs
    match mode {
        ProxyMode::Terminate => {
            tokio::try_join!(start_http_server(handle.clone()), start_https_server(handle.clone(), clients))?;
        }
        ProxyMode::Passthrough => {
            tokio::try_join!(start_http_server(handle.clone()), start_passthrough_server(handle.clone()))?;
        }
    }

    Ok(())
}

fn init_logger(args: &HostmuxArguments, config: &Config) -> Result<()> {
    let level = if args.verbose {
        LevelFilter::Trace
    } else if config.is_log_debug() {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = pretty_env_logger::env_logger::builder();
    builder.format_timestamp(None).filter_level(level);
    if let Some(log_file) = config.get_log_file() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Cannot open log file {}", log_file))?;
        builder.format_timestamp_millis().target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}
