//! wjcli - WireJump server management CLI
//!
//! Typical workflow: `peer` -> `list` -> `setup` -> `servers` -> `connect`
//! -> `status` -> `reset`.

mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use wirejump_proto::catalog::*;
use wirejump_proto::{IpcClient, IpcError, RemoteFunction, DEFAULT_SOCKET_PATH};

use output::{json_document, Pretty, SUCCESS_MESSAGE};

const DAEMON_HINT: &str = "Is the daemon running?";

/// WireJump server management CLI
#[derive(Parser, Debug)]
#[command(name = "wjcli")]
#[command(about = "WireJump server management CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print replies as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Daemon socket path
    #[arg(long, global = true, env = "WIREJUMP_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available upstream providers
    List,
    /// Select an upstream provider account
    Setup {
        /// Provider name to use
        #[arg(long)]
        provider: Option<String>,
        /// Account ID or username for this provider
        #[arg(long, alias = "user")]
        username: Option<String>,
        /// Account password
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Show server locations or manage the preferred one
    ///
    /// Each country is a location; the exact server is picked at random.
    /// Locations are cached for an hour unless --force is given.
    Servers {
        /// Force servers update
        #[arg(short, long)]
        force: bool,
        /// Set preferred location
        #[arg(short, long)]
        preferred: Option<String>,
        /// Remove location preference
        #[arg(short, long)]
        reset: bool,
    },
    /// Connect upstream, or reconnect through a new server
    Connect {
        /// Location to explicitly use this time
        #[arg(short, long)]
        location: Option<String>,
        /// Don't rotate WireGuard keys during reconnect
        #[arg(short, long)]
        preserve_keys: bool,
    },
    /// Disconnect upstream
    Disconnect,
    /// Get current connection status
    Status,
    /// Manage downstream peers
    Peer {
        /// Add peer
        #[arg(long, conflicts_with = "remove", required_unless_present = "remove")]
        add: bool,
        /// Remove peer
        #[arg(long)]
        remove: bool,
        /// Peer public key
        #[arg(long)]
        pubkey: String,
        /// Isolate this peer from other peers on the network
        #[arg(long)]
        isolated: bool,
    },
    /// Disconnect and forget the current provider
    Reset {
        /// Don't ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
    /// Show daemon version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(cli.json, &err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    // Gather input before connecting so prompts don't hold the socket
    let setup = match &cli.command {
        Commands::Setup {
            provider,
            username,
            password,
        } => Some(SetupRequest {
            provider: value_or_prompt(provider.as_deref(), "Provider name")?,
            username: value_or_prompt(username.as_deref(), "Account ID or username")?,
            password: password.clone(),
        }),
        Commands::Reset { force: false } if !cli.json => {
            if !confirm("This will disconnect upstream and forget the provider. Type 'yes' to continue: ")? {
                bail!("Reset cancelled");
            }
            None
        }
        _ => None,
    };

    let client = IpcClient::connect_to(&cli.socket).await?;
    let mut session = Session {
        client,
        json: cli.json,
    };

    match &cli.command {
        Commands::List => session.call::<ListProviders>(EmptyRequest {}).await?,
        Commands::Setup { .. } => {
            session
                .call::<SetupProvider>(setup.unwrap_or_default())
                .await?
        }
        Commands::Servers {
            force,
            preferred,
            reset,
        } => {
            session
                .call::<ManageServers>(ServersRequest {
                    force_update: *force,
                    preferred: preferred.clone().unwrap_or_default(),
                    reset: *reset,
                })
                .await?
        }
        Commands::Connect {
            location,
            preserve_keys,
        } => {
            session
                .call::<Connect>(ConnectRequest {
                    location_override: location.clone(),
                    preserve_keys: *preserve_keys,
                    disconnect: false,
                })
                .await?
        }
        Commands::Disconnect => {
            session
                .call::<Connect>(ConnectRequest {
                    disconnect: true,
                    ..Default::default()
                })
                .await?
        }
        Commands::Status => session.call::<Status>(EmptyRequest {}).await?,
        Commands::Peer {
            remove,
            pubkey,
            isolated,
            ..
        } => {
            let operation = if *remove {
                PeerOperation::Delete
            } else {
                PeerOperation::Add
            };

            session
                .call::<ManagePeers>(PeerRequest {
                    operation,
                    pubkey: pubkey.clone(),
                    isolated: *isolated,
                })
                .await?
        }
        Commands::Reset { .. } => session.call::<Reset>(EmptyRequest {}).await?,
        Commands::Version => session.call::<Version>(EmptyRequest {}).await?,
    }

    Ok(())
}

/// One connection to the daemon plus the output mode
struct Session {
    client: IpcClient,
    json: bool,
}

impl Session {
    async fn call<F>(&mut self, request: F::Request) -> Result<(), IpcError>
    where
        F: RemoteFunction,
        F::Reply: Pretty,
    {
        match self.client.call::<F>(&request).await? {
            Some(reply) if self.json => println!("{}", json_document(false, &reply)),
            Some(reply) => print!("{}", reply.table().render()),
            None if self.json => println!("{}", json_document(false, &SUCCESS_MESSAGE)),
            None => println!("{}", SUCCESS_MESSAGE),
        }

        Ok(())
    }
}

fn report(json: bool, err: &anyhow::Error) {
    // business errors come from the daemon itself, everything else
    // suggests the daemon could not be reached
    let protocol = err
        .downcast_ref::<IpcError>()
        .is_some_and(|e| !e.is_command_error());

    if json {
        eprintln!("{}", json_document(true, &format!("{:#}", err)));
        return;
    }

    eprintln!("Error: {:#}", err);
    if protocol {
        eprintln!("{}", DAEMON_HINT);
    }
}

fn value_or_prompt(value: Option<&str>, label: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value.trim().to_string()),
        None => prompt(&format!("{}: ", label)),
    }
}

fn prompt(text: &str) -> Result<String> {
    print!("{}", text);
    std::io::stdout().flush().context("Failed to write prompt")?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;

    Ok(line.trim().to_string())
}

fn confirm(text: &str) -> Result<bool> {
    Ok(prompt(text)?.eq_ignore_ascii_case("yes"))
}
