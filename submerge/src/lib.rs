//! Command-line front end for the transaction coordinator. The binary
//! (`src/bin.rs`) just parses [`Cli`] and calls [`run`]; this library
//! half exists so the dispatch logic itself can be exercised in tests
//! without spawning a process.

use clap::{Parser, Subcommand};
use submerge_base::Error;
use submerge_txn::{Coordinator, CoordinatorConfig, TxId};

#[derive(Parser, Debug)]
#[command(name = "submerge", about = "Distributed transaction coordinator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Coordination-service endpoint. With no real ensemble configured,
    /// the CLI always runs against an in-process, process-lifetime-only
    /// `LocalCoord`, so this is recorded but not yet dialable.
    #[arg(long, global = true, default_value = "localhost:2181")]
    pub host: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Allocate a new transaction ID.
    Begin {
        #[arg(long)]
        app: String,
        /// Mark the transaction as cross-group, allowing later locks
        /// across up to five entity groups instead of one.
        #[arg(long)]
        xg: bool,
    },
    /// Claim the lock for an entity group.
    Lock {
        #[arg(long)]
        app: String,
        #[arg(long)]
        tx: u64,
        #[arg(long)]
        key: String,
    },
    /// Release every lock a transaction holds and remove its node.
    Unlock {
        #[arg(long)]
        app: String,
        #[arg(long)]
        tx: u64,
    },
    /// Roll back a failed or expired transaction.
    NotifyFailure {
        #[arg(long)]
        app: String,
        #[arg(long)]
        tx: u64,
    },
    /// Run one garbage-collection sweep across every application and
    /// exit (the coordinator also runs this on a background timer for
    /// as long as the process lives).
    GcSweep,
    /// Acquire the global datastore groomer lock.
    GroomLock,
    /// Release the global datastore groomer lock.
    GroomUnlock,
}

/// Runs `cli.command` against a fresh, process-lifetime `Coordinator`
/// and prints its result. Returns an error for the caller to translate
/// into a non-zero exit code.
pub fn run(cli: Cli) -> Result<(), Error> {
    let config = CoordinatorConfig {
        host: cli.host,
        ..Default::default()
    };
    let coordinator = Coordinator::new_local(config);
    let result = dispatch(&coordinator, cli.command);
    coordinator.stop();
    result
}

fn dispatch(coordinator: &Coordinator, command: Command) -> Result<(), Error> {
    match command {
        Command::Begin { app, xg } => {
            let tx = coordinator.begin_tx(&app, xg)?;
            println!("{tx}");
        }
        Command::Lock { app, tx, key } => {
            let lock_path = coordinator.acquire_lock(&app, TxId(tx), &key)?;
            println!("{lock_path}");
        }
        Command::Unlock { app, tx } => {
            coordinator.release_lock(&app, TxId(tx))?;
            println!("ok");
        }
        Command::NotifyFailure { app, tx } => {
            coordinator.notify_failure(&app, TxId(tx));
            println!("ok");
        }
        Command::GcSweep => {
            coordinator.gc_sweep_now();
            println!("ok");
        }
        Command::GroomLock => {
            let acquired = coordinator.get_datastore_groomer_lock()?;
            println!("{acquired}");
        }
        Command::GroomUnlock => {
            coordinator.release_datastore_groomer_lock()?;
            println!("ok");
        }
    }
    Ok(())
}

/// Initializes `tracing` for the binary: `RUST_LOG`-driven filtering,
/// human-readable output on stderr.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn begin_then_lock_then_unlock_round_trips() {
        let coordinator = Coordinator::new_local(CoordinatorConfig::default());

        let tx = coordinator.begin_tx("guestbook", false).unwrap();
        coordinator.acquire_lock("guestbook", tx, "Greeting:1").unwrap();
        coordinator.release_lock("guestbook", tx).unwrap();

        coordinator.stop();
    }

    #[test_log::test]
    fn groom_lock_is_mutually_exclusive() {
        let coordinator = Coordinator::new_local(CoordinatorConfig::default());
        assert!(coordinator.get_datastore_groomer_lock().unwrap());
        assert!(!coordinator.get_datastore_groomer_lock().unwrap());
        coordinator.release_datastore_groomer_lock().unwrap();
        coordinator.stop();
    }
}
