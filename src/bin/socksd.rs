//! socksd binary
//!
//! Usage: socksd [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Print a default configuration
//!   -h, --help           Print help information
//!
//! With no options the server runs with built-in defaults.

use std::env;

use socksd::server::{Server, ServerConfig, ServerConfigFile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — respects RUST_LOG env var (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        None => run_server(None).await?,
        Some("-h") | Some("--help") => print_usage(),
        Some("-g") | Some("--generate") => generate_config()?,
        Some("-c") | Some("--config") => match args.get(2) {
            Some(path) => run_server(Some(path.as_str())).await?,
            None => eprintln!("error: --config requires a file path"),
        },
        Some(other) => {
            eprintln!("unknown option: {}", other);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"socksd - SOCKS5 proxy server with username/password authentication

USAGE:
    socksd [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -g, --generate          Print a default configuration
    -h, --help              Print help information

EXAMPLES:
    Generate a configuration:
        socksd --generate > socksd.toml

    Run the server:
        socksd --config socksd.toml

    Run with built-in defaults (127.0.0.1:1080, admin/admin):
        socksd
"#
    );
}

fn generate_config() -> anyhow::Result<()> {
    let file = ServerConfigFile::from_config(&ServerConfig::default());

    println!("# socksd configuration");
    println!();
    println!("{}", toml::to_string_pretty(&file)?);

    Ok(())
}

async fn run_server(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let file: ServerConfigFile = toml::from_str(&content)?;
            file.to_config()
        }
        None => ServerConfig::default(),
    };
    config.validate()?;

    tracing::info!(
        "starting socksd on {}:{}",
        config.listen_addr,
        config.listen_port
    );

    // A bind failure propagates out of main and terminates the process;
    // everything past bind is handled per session.
    let server = Server::new(config);
    server.run().await?;

    Ok(())
}
