use std::{env, fs, path, sync::Arc};

use dotenv::dotenv;
use mcdoze::{
    config::Config,
    control::ExecControlPlane,
    lifecycle::{Driver, Lifecycle},
    probe::PingProber,
    server::Server,
    tracing::init_tracing,
};
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    println!("Starting...");

    dotenv().ok();

    // first command line argument is the location of the config file
    let args = env::args().collect::<Box<[String]>>();
    let config_file = args.get(1).cloned().unwrap_or("config.toml".to_string());

    let config_file_path = path::Path::new(&config_file).canonicalize()?;
    println!(
        "parsing config at {}",
        config_file_path.as_os_str().to_string_lossy()
    );
    let mut config: Config = toml::from_str(&fs::read_to_string(config_file_path)?)?;

    init_tracing(&config);
    info!("Logging initialized");

    config.status.sanitize_favicon();
    let config = Arc::new(config);

    let (lifecycle, trigger_rx) = Lifecycle::new(&config);
    let control = ExecControlPlane::new(config.control.clone());
    let prober = PingProber::new(&config.probe);
    let driver = Driver::new(
        lifecycle.clone(),
        trigger_rx,
        control,
        prober,
        config.clone(),
    );
    tokio::spawn(driver.run());
    info!(
        "impersonating {} while it sleeps",
        config.instance.public_address
    );

    let server = Server::bind(config, lifecycle).await?;
    server.run().await
}
