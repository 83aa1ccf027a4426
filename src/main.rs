use clap::{Parser, Subcommand};
use colored::Colorize;

use tokenkeeper::config::default_credentials_path;
use tokenkeeper::oauth::CredentialState;
use tokenkeeper::{AuthError, CredentialProvider, CredentialStatus, FileTokenStore, RevocationOutcome};

#[derive(Parser)]
#[command(name = "tokenkeeper", version, about = "Keep an OAuth credential usable across runs")]
struct Cli {
    /// Path to the config file (must exist; TOKENKEEPER_CONFIG is consulted when omitted)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the browser consent flow and store the new credential
    Login,

    /// Print a valid access token, refreshing or re-consenting as needed
    Token,

    /// Show the stored credential without contacting the provider
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Revoke the credential at the provider and delete it locally
    Logout,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TOKENKEEPER_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = matches!(cli.command, Commands::Status { json: true });

    // On Ctrl-C the `run` future is dropped here, which closes any open
    // callback listener before the process exits.
    let outcome = tokio::select! {
        result = run(cli) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(result) = outcome else {
        eprintln!("Interrupted; consent flow abandoned.");
        std::process::exit(130);
    };

    if let Err(e) = result {
        if json {
            println!("{}", e.to_json());
        } else {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AuthError> {
    let config = tokenkeeper::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Login => {
            let provider = CredentialProvider::new(config)?;
            let client = provider.login().await?;
            println!("{}", "Authentication successful".green());
            println!("Token expires: {}", client.expires_at().to_rfc3339());
            Ok(())
        }
        Commands::Token => {
            let provider = CredentialProvider::new(config)?;
            println!("{}", provider.access_token().await?);
            Ok(())
        }
        Commands::Status { json } => {
            let path = config
                .credentials_path
                .clone()
                .unwrap_or_else(default_credentials_path);
            let store = FileTokenStore::new(&path);
            let status = CredentialStatus::inspect(&store, config.expiry_skew()).await;
            if json {
                let mut value = serde_json::to_value(&status).map_err(|e| {
                    AuthError::Io(std::io::Error::other(format!("Failed to render status: {e}")))
                })?;
                value["path"] = serde_json::Value::String(path.display().to_string());
                println!("{value}");
            } else {
                print_status(&status, &path);
            }
            Ok(())
        }
        Commands::Logout => {
            let provider = CredentialProvider::new(config)?;
            match provider.revoke_auth().await? {
                RevocationOutcome::Revoked => println!("Revoked and removed stored credential."),
                RevocationOutcome::LocalOnly => println!(
                    "Removed stored credential {}",
                    "(provider revocation skipped or failed)".yellow()
                ),
                RevocationOutcome::NothingStored => println!("No stored credential."),
            }
            Ok(())
        }
    }
}

fn print_status(status: &CredentialStatus, path: &std::path::Path) {
    let state = match status.state {
        CredentialState::NotAuthenticated => "not authenticated".red(),
        CredentialState::Valid => "valid".green(),
        CredentialState::Expired => "expired".yellow(),
    };
    println!("Credential: {state}");
    println!("File: {}", path.display());
    if let Some(expires_at) = status.expires_at {
        println!("Expires: {}", expires_at.to_rfc3339());
        println!(
            "Refresh token: {}",
            if status.has_refresh_token { "present" } else { "absent" }
        );
    }
    if !status.scope.is_empty() {
        println!("Scope: {}", status.scope.join(" "));
    }
}
