use anyhow::Result;
use clap::Parser;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(
    name = "shellbox-server",
    about = "Sandboxed shell-execution runtime over HTTP",
    version,
    disable_help_subcommand = true
)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8880)]
    port: u16,

    /// Shared token required in the X-API-Key header (empty disables auth)
    #[arg(long, env = "SHELLBOX_API_KEY", default_value = "")]
    api_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let api_key = Some(cli.api_key).filter(|key| !key.is_empty());
    shellbox_server::run_server(&cli.host, cli.port, api_key).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["shellbox-server"]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 8880);
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "shellbox-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--api-key",
            "secret",
        ]);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.api_key, "secret");
    }
}
