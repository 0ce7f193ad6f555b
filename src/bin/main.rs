use mio::Poll;
use server_proxy::config::AppConfig;
use server_proxy::server::Server;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Exit codes per spec.md 6: 0 normal shutdown, 1 startup failure
/// (bind/listen/sigaction), 2 config error.
fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = match AppConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    config.display_config();

    if let Err(e) = run(config) {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

fn run(config: AppConfig) -> server_proxy::error::Result<()> {
    let poll = Poll::new()?;
    let mut server = Server::new(config, &poll)?;
    server.run(poll)
}
