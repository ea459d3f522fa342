use clap::Parser;
use cubicle::configuration::config::Config;
use cubicle::controller::controller_handler::Controller;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cubicle")]
#[command(version = "0.1.0")]
#[command(about = "Per-user sandboxed development containers with terminals, files and port forwarding")]
struct Args {
    /// TOML configuration file; defaults plus environment overrides when omitted
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let config = match &args.config_file {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
