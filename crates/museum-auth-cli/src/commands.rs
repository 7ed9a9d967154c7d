//! Command parsing and execution.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::warn;

use museum_auth_core::clock;
use museum_auth_core::{Config, KvCredentialStore, SessionManager, SessionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Login {
        code: String,
        redirect_uri: Option<String>,
    },
    Logout,
    Refresh,
    WhoAmI,
    Tokens,
    Watch,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Status);
        };
        let rest = &args[1..];

        let command = match name.as_str() {
            "status" => Command::Status,
            "login" => match rest {
                [code] => Command::Login {
                    code: code.clone(),
                    redirect_uri: None,
                },
                [code, redirect_uri] => Command::Login {
                    code: code.clone(),
                    redirect_uri: Some(redirect_uri.clone()),
                },
                _ => bail!("login expects <code> [redirect_uri]"),
            },
            "logout" => Command::Logout,
            "refresh" => Command::Refresh,
            "whoami" => Command::WhoAmI,
            "tokens" => Command::Tokens,
            "watch" => Command::Watch,
            "help" | "-h" | "--help" => Command::Help,
            other => bail!("Unknown command: {}", other),
        };

        if !matches!(command, Command::Login { .. }) && !rest.is_empty() {
            bail!("{} takes no arguments", name);
        }
        Ok(command)
    }
}

fn start_session(config: &Config) -> Result<Arc<SessionManager>> {
    let client = Arc::new(config.auth_client()?);
    let store = Arc::new(KvCredentialStore::new(config.key_value_store()?));
    let manager = SessionManager::start(client, store);

    // Ctrl-C cancels whatever is in flight instead of killing the process
    // mid-write.
    let on_interrupt = Arc::clone(&manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling session operations");
            on_interrupt.shutdown();
        }
    });

    Ok(manager)
}

fn format_expiry(expires_at: i64) -> String {
    match DateTime::<Utc>::from_timestamp(expires_at, 0) {
        Some(at) => at.to_rfc3339(),
        None => expires_at.to_string(),
    }
}

/// Run a command; returns whether it succeeded.
pub async fn run(command: Command, config: &Config) -> Result<bool> {
    let manager = start_session(config)?;

    let succeeded = match command {
        Command::Status | Command::Help => {
            let state = manager.wait_until_settled().await;
            println!("{}", state);
            !matches!(state, SessionState::Error(_))
        }

        Command::Login { code, redirect_uri } => {
            let redirect_uri = redirect_uri.unwrap_or_else(|| config.redirect_uri.clone());
            match manager.login(&code, &redirect_uri).await {
                Ok(result) if result.success => {
                    match manager.state().user() {
                        Some(user) => println!("Signed in as {} <{}>", user.display_name, user.email),
                        None => println!("{}", manager.state()),
                    }
                    true
                }
                Ok(result) => {
                    eprintln!("Login failed: {}", result.error.unwrap_or_default());
                    false
                }
                Err(e) => {
                    eprintln!("Login {}", e);
                    false
                }
            }
        }

        Command::Logout => match manager.logout().await {
            Ok(remote_ok) => {
                if remote_ok {
                    println!("Signed out");
                } else {
                    println!("Signed out locally (identity provider could not be reached)");
                }
                true
            }
            Err(e) => {
                eprintln!("Logout {}; local credentials were cleared", e);
                false
            }
        },

        Command::Refresh => {
            manager.wait_until_settled().await;
            match manager.refresh_access_token().await {
                Ok(true) => {
                    println!("Access token refreshed");
                    true
                }
                Ok(false) => {
                    eprintln!("Access token was not refreshed");
                    false
                }
                Err(e) => {
                    eprintln!("Refresh {}", e);
                    false
                }
            }
        }

        Command::WhoAmI => match manager.get_current_user().await {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                true
            }
            None => {
                eprintln!("Not signed in");
                false
            }
        },

        Command::Tokens => match manager.get_current_tokens().await {
            Some(tokens) => {
                let status = if clock::is_valid(&tokens) { "valid" } else { "expired" };
                println!("status:        {}", status);
                println!("expires at:    {}", format_expiry(tokens.expires_at));
                println!("seconds left:  {}", clock::seconds_remaining(&tokens));
                println!("refreshable:   {}", tokens.can_refresh());
                true
            }
            None => {
                eprintln!("No tokens stored");
                false
            }
        },

        Command::Watch => {
            let mut logged_in = manager.is_logged_in();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    next = logged_in.next() => match next {
                        Some(true) => println!("logged in"),
                        Some(false) => println!("logged out"),
                        None => break,
                    },
                }
            }
            true
        }
    };

    manager.shutdown();
    Ok(succeeded)
}
