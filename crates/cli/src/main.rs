use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hymie_engine::Hymie;
use hymie_server::AppState;
use hymie_util::{expand_tilde, pprint_timestamp};
use tracing::info;

/// Serve a hymie workflow app.
#[derive(Debug, Parser)]
#[command(name = "hymie", version, about)]
struct Cli {
    /// Folder containing hymie.yaml.
    #[arg(long, short, global = true, env = "HYMIE_APP_PATH", default_value = ".")]
    path: String,

    /// Merge production.yaml instead of testing.yaml.
    #[arg(long, global = true, env = "HYMIE_PRODUCTION")]
    production: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the app and start the web server.
    Serve {
        /// Overrides `config.server.bind_address`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Report broken references in the app folder.
    Check,
    /// List registered users and their state.
    Users,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app_path = expand_tilde(&cli.path);

    match cli.command {
        Command::Serve { bind } => serve(app_path, cli.production, bind).await,
        Command::Check => check(app_path, cli.production),
        Command::Users => users(app_path, cli.production),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn open(app_path: &Path, production: bool) -> Result<Hymie> {
    Hymie::open(app_path, production, None).with_context(|| format!("could not load the app in {}", app_path.display()))
}

async fn serve(app_path: PathBuf, production: bool, bind: Option<String>) -> Result<()> {
    let hymie = open(&app_path, production)?;
    hymie.ensure_integrity().context("the app failed its integrity check")?;

    let bind_address = bind.unwrap_or_else(|| hymie.definition().config.server.bind_address.clone());
    info!(app = %hymie.definition().metadata.name, production, "starting hymie");
    let state = AppState::new(Arc::new(hymie))?;
    hymie_server::serve(state, &bind_address).await
}

fn check(app_path: PathBuf, production: bool) -> Result<()> {
    let hymie = open(&app_path, production)?;
    let report = hymie.integrity_check();
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in &report.errors {
        println!("error: {error}");
    }
    if !report.is_ok() {
        bail!("{} integrity error(s) found", report.errors.len());
    }
    println!("{} looks fine", app_path.display());
    Ok(())
}

fn users(app_path: PathBuf, production: bool) -> Result<()> {
    let hymie = open(&app_path, production)?;
    for user in hymie.users_state()? {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            user.uid,
            user.email,
            user.friendly_id,
            user.state,
            pprint_timestamp(user.timestamp)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_path_defaults_to_the_current_folder() {
        temp_env::with_vars_unset(["HYMIE_APP_PATH", "HYMIE_PRODUCTION"], || {
            let cli = Cli::try_parse_from(["hymie", "check"]).unwrap();
            assert_eq!(cli.path, ".");
            assert!(!cli.production);
            assert!(matches!(cli.command, Command::Check));
        });
    }

    #[test]
    fn environment_selects_the_app() {
        temp_env::with_vars(
            [("HYMIE_APP_PATH", Some("/srv/trips")), ("HYMIE_PRODUCTION", Some("true"))],
            || {
                let cli = Cli::try_parse_from(["hymie", "users"]).unwrap();
                assert_eq!(cli.path, "/srv/trips");
                assert!(cli.production);
            },
        );
    }

    #[test]
    fn serve_accepts_a_bind_override() {
        temp_env::with_var_unset("HYMIE_APP_PATH", || {
            let cli = Cli::try_parse_from(["hymie", "serve", "--bind", "0.0.0.0:8000", "--path", "app"]).unwrap();
            assert_eq!(cli.path, "app");
            match cli.command {
                Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:8000")),
                other => panic!("unexpected command {other:?}"),
            }
        });
    }
}
