use dotenvy::dotenv;
use log::info;
use spg_watcherd::{config::WatcherdConfig, daemon::run_daemon};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let config = WatcherdConfig::from_env_or_default();

    info!("🚀️ Starting the settlement watcher daemon");
    match run_daemon(config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}
