mod commands;
mod db;
mod errors;
mod models;
mod services;
mod utils;

use std::path::PathBuf;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::errors::{SyncError, SyncResult};
use crate::services::state::AppState;

const USAGE: &str = "usage: costlink <command>

  connect                              print the QuickBooks authorization URL
  exchange <code> <realm-id>           complete the OAuth connection
  status                               show connection health
  sync                                 mirror purchases and bills as expenses
  sync-sales                           reconcile invoices and estimates to leads
  resync-stages                        re-derive deal stages from estimate status
  job-costing                          print the job profitability report
  metrics                              print the financial metrics snapshot
  push-estimate <lead-id> <lines.json> export a quote as a QuickBooks estimate
  estimate-pdf <estimate-id> <out.pdf> download an estimate PDF
  configure <key> <value>              persist a setting (qb_client_id, ...)";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        if err.reconnect_required() {
            eprintln!("error: {} (run `costlink connect` to re-authorize)", err);
            std::process::exit(2);
        }
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> SyncResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let db_path = std::env::var("COSTLINK_DB").unwrap_or_else(|_| "costlink.sqlite".to_string());
    let db = db::Database::new(PathBuf::from(db_path))?;
    let settings = commands::settings::load_settings(&db);
    let state = AppState::new(db, settings);

    match args.first().map(String::as_str) {
        Some("connect") => {
            println!("{}", commands::connection::connect_url(&state)?);
        }
        Some("exchange") => {
            let code = required(&args, 1, "authorization code")?;
            let realm_id = required(&args, 2, "realm id")?;
            commands::connection::exchange(&state, code, realm_id).await?;
            println!("connected");
        }
        Some("status") => {
            print_json(&commands::connection::status(&state).await?)?;
        }
        Some("sync") => {
            print_json(&commands::sync::sync_expenses(&state).await?)?;
        }
        Some("sync-sales") => {
            print_json(&commands::sync::sync_sales(&state).await?)?;
        }
        Some("resync-stages") => {
            print_json(&commands::sync::resync_stages(&state).await?)?;
        }
        Some("job-costing") => {
            print_json(&commands::analytics::job_costing(&state)?)?;
        }
        Some("metrics") => {
            print_json(&commands::analytics::financial_metrics(&state).await?)?;
        }
        Some("push-estimate") => {
            let lead_id = required(&args, 1, "lead id")?;
            let lines_path = required(&args, 2, "line items file")?;
            let estimate_id =
                commands::estimates::push_estimate(&state, lead_id, &PathBuf::from(lines_path))
                    .await?;
            println!("{}", estimate_id);
        }
        Some("estimate-pdf") => {
            let estimate_id = required(&args, 1, "estimate id")?;
            let out_path = required(&args, 2, "output path")?;
            commands::estimates::download_estimate_pdf(
                &state,
                estimate_id,
                &PathBuf::from(out_path),
            )
            .await?;
        }
        Some("configure") => {
            let key = required(&args, 1, "setting key")?;
            let value = required(&args, 2, "setting value")?;
            commands::settings::configure(&state, key, value)?;
        }
        _ => {
            eprintln!("{}", USAGE);
        }
    }
    Ok(())
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> SyncResult<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Validation(format!("missing {}", name)))
}

fn print_json<T: Serialize>(value: &T) -> SyncResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{}", rendered);
    Ok(())
}
