//! UFTP command-line client and server
//!
//! Reliable file transfer over plain UDP datagrams.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use uftp_core::{Client, Endpoint, Server, SessionError};
use uftp_transport::AsyncUdpTransport;

use config::Config;
use progress::{TransferProgress, format_bytes, format_duration, format_rate};

/// UFTP - file transfer over UDP with per-datagram checksums and resends
#[derive(Parser)]
#[command(name = "uftp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host, overriding the configuration file
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Server port, overriding the configuration file
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory
    Serve {
        /// Directory sessions start in
        root: Option<PathBuf>,
    },

    /// Print the server's working directory
    Pwd,

    /// List a directory on the server
    Ls {
        /// Directory to list, relative to the server root
        dir: Option<String>,
    },

    /// Resolve a directory on the server and print it
    ///
    /// Every invocation opens a fresh session, so the change does not carry
    /// over to later commands. Use `shell`, or `--dir` on `ls` and `put`.
    Cd {
        /// Target directory
        #[arg(required = true)]
        path: String,
    },

    /// Download a file
    Get {
        /// Remote file path
        #[arg(required = true)]
        remote: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Upload a file
    Put {
        /// Local file to send
        #[arg(required = true)]
        file: PathBuf,

        /// Remote directory to upload into
        #[arg(short, long)]
        dir: Option<String>,
    },

    /// Interactive session (pwd, ls, cd, get, put, exit)
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(server) = cli.server {
        config.network.server_addr = server;
    }
    if let Some(port) = cli.port {
        config.network.server_port = port;
    }

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    config.validate()?;

    match cli.command {
        Commands::Serve { root } => {
            let root = root.unwrap_or_else(|| config.server.root.clone());
            serve(root, &config).await?;
        }
        Commands::Pwd => {
            let mut client = connect(&config).await?;
            println!("{}", client.pwd().await?);
            client.disconnect().await?;
        }
        Commands::Ls { dir } => {
            let mut client = connect(&config).await?;
            if let Some(dir) = dir {
                client.cd(&dir).await?;
            }
            for entry in client.ls().await? {
                println!("{entry}");
            }
            client.disconnect().await?;
        }
        Commands::Cd { path } => {
            let mut client = connect(&config).await?;
            println!("{}", client.cd(&path).await?);
            client.disconnect().await?;
        }
        Commands::Get { remote, output } => {
            let mut client = connect(&config).await?;
            download(&mut client, &remote, &output).await?;
            client.disconnect().await?;
        }
        Commands::Put { file, dir } => {
            let mut client = connect(&config).await?;
            if let Some(dir) = dir {
                client.cd(&dir).await?;
            }
            upload(&mut client, &file).await?;
            client.disconnect().await?;
        }
        Commands::Shell => {
            let client = connect(&config).await?;
            shell(client).await?;
        }
    }

    Ok(())
}

/// Serve `root` until Ctrl-C
async fn serve(root: PathBuf, config: &Config) -> anyhow::Result<()> {
    let transport = AsyncUdpTransport::bind(config.server_bind_addr()?).await?;
    let endpoint = Endpoint::start(Arc::new(transport))?;
    let server = Server::new(endpoint, &root, config.transfer_config())?;

    println!(
        "Serving {} on {}",
        server.root().display(),
        server.local_addr()
    );

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            shutdown.cancel();
        }
    });

    server.run().await?;
    Ok(())
}

/// Bind the client port and open a session with the configured server
async fn connect(config: &Config) -> anyhow::Result<Client> {
    let server = config.server_addr()?;
    let transport = AsyncUdpTransport::bind(config.client_bind_addr()?).await?;
    let endpoint = Endpoint::start(Arc::new(transport))?;

    tracing::debug!("Connecting to {} from {}", server, endpoint.local_addr());
    let client = Client::connect(endpoint, server, config.transfer_config()).await?;
    Ok(client)
}

async fn download(client: &mut Client, remote: &str, output: &Path) -> anyhow::Result<()> {
    let progress = TransferProgress::new(format!("Downloading {remote}"));

    match client.get_to(remote, output).await {
        Ok(path) => {
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            let elapsed = progress.elapsed();
            progress.finish_with_message(format!(
                "Saved {} ({}) in {} ({})",
                path.display(),
                format_bytes(size),
                format_duration(elapsed),
                format_rate(size, elapsed)
            ));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

async fn upload(client: &mut Client, file: &Path) -> anyhow::Result<()> {
    let size = tokio::fs::metadata(file).await?.len();
    let progress = TransferProgress::new(format!(
        "Uploading {} ({})",
        file.display(),
        format_bytes(size)
    ));

    match client.put(file).await {
        Ok(report) => {
            let elapsed = progress.elapsed();
            progress.finish_with_message(format!(
                "Uploaded {} ({} chunks, {} restarts) in {} ({})",
                file.display(),
                report.chunks,
                report.restarts,
                format_duration(elapsed),
                format_rate(size, elapsed)
            ));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Read commands from stdin until `exit` or end of input
async fn shell(mut client: Client) -> anyhow::Result<()> {
    println!(
        "Connected to {}. Commands: pwd, ls, cd <dir>, get <file>, put <file>, exit",
        client.server()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("uftp> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        let result: anyhow::Result<()> = match (command, arg) {
            ("", _) => continue,
            ("exit" | "quit", _) => break,
            ("pwd", _) => client.pwd().await.map(|cwd| println!("{cwd}")).map_err(Into::into),
            ("ls", _) => client
                .ls()
                .await
                .map(|entries| entries.iter().for_each(|e| println!("{e}")))
                .map_err(Into::into),
            ("cd", path) if !path.is_empty() => {
                client.cd(path).await.map(|cwd| println!("{cwd}")).map_err(Into::into)
            }
            ("get", remote) if !remote.is_empty() => {
                download(&mut client, remote, Path::new(".")).await
            }
            ("put", file) if !file.is_empty() => upload(&mut client, Path::new(file)).await,
            _ => {
                eprintln!("Unknown command: {line}");
                Ok(())
            }
        };

        if let Err(e) = result {
            eprintln!("Error: {e}");
            if matches!(e.downcast_ref::<SessionError>(), Some(SessionError::Closed)) {
                return Err(e);
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cd_help_states_session_scope() {
        let cli = Cli::command();
        let cd = cli.find_subcommand("cd").unwrap();
        let help = cd.get_long_about().map(ToString::to_string).unwrap_or_default();
        assert!(help.contains("fresh session"));
        assert!(help.contains("shell"));

        let parsed = Cli::try_parse_from(["uftp", "cd", "sub"]).unwrap();
        assert!(matches!(parsed.command, Commands::Cd { path } if path == "sub"));
    }
}
