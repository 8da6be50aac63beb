use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use std::path::{Path, PathBuf};
use url::Url;

use crate::auth::{ClientCredentials, OAuthEndpoints};

pub const SANDBOX_API_BASE_URL: &str = "https://sandbox-api.dexcom.com";
pub const PRODUCTION_API_BASE_URL: &str = "https://api.dexcom.com";

const CLIENT_ID_ENV: &str = "OAUTH_CLIENT_ID_BEARERAUTH";
const CLIENT_SECRET_ENV: &str = "OAUTH_CLIENT_SECRET_BEARERAUTH";

/// OAuth Keeper - authorization-code login and token refresh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Serve the /auth routes (default)
    Serve,
    /// Run the interactive login flow with a local callback listener
    Login,
    /// Show whether a valid access token is available
    Status,
    /// Delete the stored token
    Logout,
}

#[derive(Args, Debug)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "3000", global = true)]
    pub port: u16,

    /// OAuth client identifier
    #[arg(long, env = CLIENT_ID_ENV, global = true)]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = CLIENT_SECRET_ENV, hide_env_values = true, global = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the authorization server
    #[arg(long, env = "OAUTH_REDIRECT_URI", global = true)]
    pub redirect_uri: Option<String>,

    /// Path of the persisted token file
    #[arg(
        short = 't',
        long,
        env = "TOKEN_STORAGE_PATH",
        default_value = "data/token.json",
        global = true
    )]
    pub token_path: String,

    /// Base URL of the authorization server API
    #[arg(long, env = "API_BASE_URL", global = true)]
    pub api_base_url: Option<String>,

    /// Use the production API instead of the sandbox
    #[arg(long, env = "OAUTH_PRODUCTION", global = true)]
    pub production: bool,

    /// Scope requested in the authorization redirect
    #[arg(long, env = "OAUTH_SCOPE", default_value = "offline_access", global = true)]
    pub scope: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Token endpoint request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    /// Token endpoint connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10", global = true)]
    pub http_connect_timeout: u64,

    /// Local port for the login callback listener
    #[arg(long, env = "CALLBACK_PORT", default_value = "3333", global = true)]
    pub callback_port: u16,

    /// Seconds to wait for the login callback
    #[arg(long, env = "CALLBACK_TIMEOUT", default_value = "300", global = true)]
    pub callback_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Client registration
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,

    // Authorization server
    pub api_base_url: String,

    // Token storage
    pub token_path: PathBuf,

    // HTTP client
    pub http_request_timeout: u64,
    pub http_connect_timeout: u64,

    // CLI login
    pub callback_port: u16,
    pub callback_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Scaffold .env from .env.example on first run
        match bootstrap_env_file(Path::new(".")) {
            Ok(true) => println!("No .env file found, created one from .env.example"),
            Ok(false) => {}
            Err(e) => eprintln!("Warning: {:#}", e),
        }

        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let cli = Cli::parse();
        let command = cli.command.unwrap_or(Command::Serve);
        Ok((Self::from_args(cli.args, command), command))
    }

    /// Build configuration from parsed arguments.
    ///
    /// The redirect URI defaults to the server callback route, or to the local
    /// listener when running the CLI login.
    pub fn from_args(args: CliArgs, command: Command) -> Self {
        let redirect_uri = args.redirect_uri.unwrap_or_else(|| match command {
            Command::Login => format!("http://localhost:{}/callback", args.callback_port),
            _ => format!("http://localhost:{}/auth/callback", args.port),
        });

        let api_base_url = args.api_base_url.unwrap_or_else(|| {
            if args.production {
                PRODUCTION_API_BASE_URL.to_string()
            } else {
                SANDBOX_API_BASE_URL.to_string()
            }
        });

        Config {
            server_host: args.host,
            server_port: args.port,
            client_id: args.client_id.unwrap_or_default().trim().to_string(),
            client_secret: args.client_secret.unwrap_or_default().trim().to_string(),
            redirect_uri,
            scope: args.scope,
            api_base_url,
            token_path: expand_tilde(&args.token_path),
            http_request_timeout: args.http_timeout,
            http_connect_timeout: args.http_connect_timeout,
            callback_port: args.callback_port,
            callback_timeout: args.callback_timeout,
            log_level: args.log_level,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            anyhow::bail!(
                "{} is required (use --client-id or set {} env var)",
                CLIENT_ID_ENV,
                CLIENT_ID_ENV
            );
        }
        if self.client_secret.is_empty() {
            anyhow::bail!(
                "{} is required (use --client-secret or set {} env var)",
                CLIENT_SECRET_ENV,
                CLIENT_SECRET_ENV
            );
        }

        Url::parse(&self.api_base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.api_base_url))?;
        Url::parse(&self.redirect_uri).with_context(|| {
            format!("OAUTH_REDIRECT_URI is not a valid URL: {}", self.redirect_uri)
        })?;

        Ok(())
    }

    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints::from_base_url(&self.api_base_url)
    }

    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Copy `.env.example` to `.env` in `dir` when only the example exists.
///
/// Returns whether a file was created.
pub fn bootstrap_env_file(dir: &Path) -> Result<bool> {
    let env_path = dir.join(".env");
    let example_path = dir.join(".env.example");

    if env_path.exists() || !example_path.exists() {
        return Ok(false);
    }

    std::fs::copy(&example_path, &env_path).with_context(|| {
        format!(
            "Failed to create {} from {}",
            env_path.display(),
            example_path.display()
        )
    })?;
    Ok(true)
}

// === Interactive Setup ===

/// Prompt for missing client credentials and offer to save them to `.env`
pub fn prompt_for_credentials(config: &mut Config) -> Result<()> {
    if config.has_client_credentials() {
        return Ok(());
    }

    println!();
    println!("OAuth client credentials are not configured.");
    println!();

    if config.client_id.is_empty() {
        let client_id: String = Input::new()
            .with_prompt("Enter your OAuth Client ID")
            .interact_text()
            .context("Failed to read client ID")?;
        config.client_id = client_id.trim().to_string();
    }

    if config.client_secret.is_empty() {
        let client_secret: String = Password::new()
            .with_prompt("Enter your OAuth Client Secret")
            .interact()
            .context("Failed to read client secret")?;
        config.client_secret = client_secret.trim().to_string();
    }

    if !config.has_client_credentials() {
        anyhow::bail!("Client ID and Client Secret are required");
    }

    let save_to_env = Confirm::new()
        .with_prompt("Save credentials to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(Path::new(".env"), config)?;
        println!("✅ Credentials saved to .env file");
    }

    Ok(())
}

/// Write the client credentials into an env file, keeping other entries
fn save_env_file(path: &Path, config: &Config) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let updated = upsert_env_vars(
        &existing,
        &[
            (CLIENT_ID_ENV, config.client_id.as_str()),
            (CLIENT_SECRET_ENV, config.client_secret.as_str()),
        ],
    );

    std::fs::write(path, updated).with_context(|| format!("Failed to write {}", path.display()))
}

/// Replace `KEY=...` lines in env file content, appending keys not present
fn upsert_env_vars(content: &str, vars: &[(&str, &str)]) -> String {
    let mut remaining: Vec<&(&str, &str)> = vars.iter().collect();
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            let key = line.split('=').next().unwrap_or_default().trim();
            match remaining.iter().position(|(k, _)| *k == key) {
                Some(idx) if line.contains('=') => {
                    let (k, v) = remaining.remove(idx);
                    format!("{}={}", k, v)
                }
                _ => line.to_string(),
            }
        })
        .collect();

    lines.extend(remaining.into_iter().map(|(k, v)| format!("{}={}", k, v)));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
