use parley_server::{Server, ServerConfig};
use parley_utils::parse_args;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args(std::env::args().skip(1));
    let cfg = match ServerConfig::from_args(&args) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "bad configuration");
            std::process::exit(2);
        }
    };

    ctrlc::set_handler(|| {
        info!("interrupt received, server stopped");
        std::process::exit(0);
    })
    .expect("couldn't install the interrupt handler");

    let server = match Server::bind(&cfg) {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "startup failed");
            std::process::exit(1);
        }
    };
    if let Err(err) = server.serve() {
        error!(%err, "server failed");
        std::process::exit(1);
    }
}
