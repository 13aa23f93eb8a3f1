mod cli;
mod commands;
mod config;
mod exec;
mod storage;

use std::{io, path::PathBuf, process::ExitCode};

use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Command, ConfigCommand},
    exec::{ExecPipeline, ExecStatus, Streams},
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let db = cli.db;
    let outcome = match cli.command {
        Command::Exec { insulate, args } => {
            let status = run_exec(db, insulate, &args).await;
            return Ok(ExitCode::from(exit_byte(status)));
        }
        Command::Version => {
            print_version();
            Ok(())
        }
        Command::Config(ConfigCommand::Init) => init_config(),
        Command::List => run_list(db).await,
        Command::Set { namespace, pairs } => run_set(db, &namespace, &pairs).await,
        Command::Show { decrypt, namespace } => run_show(db, &namespace, decrypt).await,
        Command::Unset { namespace, keys } => run_unset(db, &namespace, &keys).await,
        Command::Purge { namespace } => run_purge(db, &namespace).await,
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("vaultenv: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Process exit byte for an exec outcome. Codes outside `0..=255` become 1.
fn exit_byte(status: ExecStatus) -> u8 {
    u8::try_from(status.code()).unwrap_or(1)
}

fn init_tracing() {
    // Diagnostics go to stderr and stay quiet by default; stdout belongs to
    // command output and to the exec'd child.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("vaultenv {}", env!("CARGO_PKG_VERSION"));
}

fn init_config() -> Result<()> {
    let config = config::load()?;
    let path = config::write_default_if_missing(&config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_list(db: Option<PathBuf>) -> Result<()> {
    let config = config::load()?;
    let safe = storage::safe_from_config(db, &config)?;
    commands::list(&safe, &mut io::stdout().lock()).await
}

async fn run_set(db: Option<PathBuf>, namespace: &str, pairs: &[String]) -> Result<()> {
    let config = config::load()?;
    let safe = storage::safe_from_config(db, &config)?;
    let ring = storage::ring_from_config(&config);
    commands::set(&safe, &ring, namespace, pairs).await
}

async fn run_show(db: Option<PathBuf>, namespace: &str, decrypt: bool) -> Result<()> {
    let config = config::load()?;
    let safe = storage::safe_from_config(db, &config)?;
    let ring = storage::ring_from_config(&config);
    commands::show(&safe, &ring, namespace, decrypt, &mut io::stdout().lock()).await
}

async fn run_unset(db: Option<PathBuf>, namespace: &str, keys: &[String]) -> Result<()> {
    let config = config::load()?;
    let safe = storage::safe_from_config(db, &config)?;
    commands::unset(&safe, namespace, keys).await
}

async fn run_purge(db: Option<PathBuf>, namespace: &str) -> Result<()> {
    let config = config::load()?;
    let safe = storage::safe_from_config(db, &config)?;
    commands::purge(&safe, namespace).await
}

async fn run_exec(db: Option<PathBuf>, insulate: bool, args: &[String]) -> ExecStatus {
    let mut diag = io::stderr();
    if let Err(status) = exec::check_usage(args, &mut diag) {
        return status;
    }

    let backends = config::load().and_then(|config| {
        let safe = storage::safe_from_config(db, &config)?;
        Ok((safe, storage::ring_from_config(&config)))
    });
    let (safe, ring) = match backends {
        Ok(backends) => backends,
        Err(err) => {
            exec::report(&mut diag, &err.to_string());
            return ExecStatus::Failure;
        }
    };

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut streams = Streams {
        diag: &mut diag,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };
    ExecPipeline::new(safe, ring)
        .insulate(insulate)
        .run(args, &mut streams)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_byte_maps_exec_outcomes() {
        assert_eq!(exit_byte(ExecStatus::Child(0)), 0);
        assert_eq!(exit_byte(ExecStatus::Child(7)), 7);
        assert_eq!(exit_byte(ExecStatus::Child(128 + 9)), 137);
        assert_eq!(exit_byte(ExecStatus::Child(255)), 255);
        assert_eq!(exit_byte(ExecStatus::UsageError), 2);
        assert_eq!(exit_byte(ExecStatus::Failure), 1);
        assert_eq!(exit_byte(ExecStatus::Child(-1)), 1);
        assert_eq!(exit_byte(ExecStatus::Child(256)), 1);
    }

    #[tokio::test]
    async fn exec_usage_error_comes_before_config_and_storage() {
        // An unreachable database path would fail if it were ever resolved.
        let db = Some(PathBuf::from("/dev/null/vaultenv.safe"));
        for raw in [&["myNS"][..], &[][..]] {
            let args: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
            assert_eq!(
                run_exec(db.clone(), false, &args).await,
                ExecStatus::UsageError
            );
        }
    }
}
