//! # Record Cache Inspector
//!
//! Prints what the record cache holds for a signed-in identity.
//!
//! ## Usage
//! ```bash
//! cargo run -p roster-db --bin inspect -- --owner alice@example.com
//!
//! # Specify database path
//! cargo run -p roster-db --bin inspect -- --owner alice@example.com --db ./roster.db
//!
//! # Drop the stored fragments (endpoint cache is kept)
//! cargo run -p roster-db --bin inspect -- --owner alice@example.com --truncate
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::env;

use roster_core::{MembershipList, OwnerSettings};
use roster_db::{Database, DbConfig, DbError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut owner: Option<String> = None;
    let mut db_path = String::from("./roster.db");
    let mut truncate = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--owner" | "-o" => {
                if i + 1 < args.len() {
                    owner = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--truncate" => truncate = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let Some(owner) = owner else {
        print_usage();
        return Ok(());
    };

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("Record cache: {}", db_path);
    println!("Identity:     {}", owner);
    println!();

    match db.snapshots().load(&owner).await {
        Ok(Some(snapshot)) => {
            let count = |list: MembershipList| {
                snapshot.contacts.values().filter(|c| c.is_on(list)).count()
            };
            let settings = OwnerSettings::from_properties(&snapshot.owner_properties);

            println!("Roster snapshot (schema {})", snapshot.schema_version);
            println!("  contacts:  {}", snapshot.contacts.len());
            for list in MembershipList::ALL {
                println!("    {:<8} {}", list.to_string(), count(list));
            }
            println!("  groups:    {}", snapshot.groups.len());
            println!("  awaiting:  {}", snapshot.awaiting_decision().len());
            println!("  privacy:   {:?} / {:?}", settings.privacy, settings.notify);
            println!("  membership marker:   {:?}", snapshot.membership_last_change.timestamp());
            println!("  address book marker: {:?}", snapshot.address_book_last_change.timestamp());
        }
        Ok(None) => println!("Roster snapshot: none"),
        Err(e @ DbError::SchemaMismatch { .. }) => {
            warn!(error = %e, "Stored snapshot is stale");
            println!("Roster snapshot: stale ({})", e);
        }
        Err(e) => return Err(e.into()),
    }

    println!();

    match db.delta_logs().load(&owner).await {
        Ok(Some(log)) => {
            println!("Delta log (schema {})", log.schema_version);
            println!("  fragments: {}", log.fragments.len());
            for (method, entry) in &log.endpoints {
                println!(
                    "  {:<16} host={} token={}",
                    method,
                    entry.host().unwrap_or("-"),
                    if entry.token().is_some() { "cached" } else { "-" }
                );
            }
        }
        Ok(None) => println!("Delta log: none"),
        Err(e @ DbError::SchemaMismatch { .. }) => {
            warn!(error = %e, "Stored delta log is stale");
            println!("Delta log: stale ({})", e);
        }
        Err(e) => return Err(e.into()),
    }

    if truncate {
        let removed = db.delta_logs().truncate(&owner).await?;
        println!();
        println!("Truncated {} fragment(s)", removed);
    }

    db.close().await;
    Ok(())
}

fn print_usage() {
    println!("Roster record cache inspector");
    println!();
    println!("Usage: inspect --owner <ACCOUNT> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -o, --owner <ACCOUNT>  Signed-in identity to inspect");
    println!("  -d, --db <PATH>        Database file path (default: ./roster.db)");
    println!("      --truncate         Drop stored delta fragments");
    println!("  -h, --help             Show this help message");
}
