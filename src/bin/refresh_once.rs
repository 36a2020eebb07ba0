//! One-shot reconciliation pass for an agent.
//!
//! Runs a single fetch-merge-detect-dispatch cycle against the real
//! provider, overlay store, and extraction service, waits for the
//! extraction batch to drain, and prints a summary. Diagnostic companion
//! to the dashboard shell.
//!
//! Usage: `refresh_once <agent-id>`

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use calldesk::call_source::CallSourceClient;
use calldesk::extraction::ExtractionClient;
use calldesk::notify::LogNotifier;
use calldesk::overlay::OverlayDb;
use calldesk::refresh::{run_refresh, RefreshEnv, RefreshResult};
use calldesk::session::{load_config, overlay_db_path, SessionState};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Some(agent_id) = std::env::args().nth(1) else {
        eprintln!("Usage: refresh_once <agent-id>");
        return ExitCode::FAILURE;
    };

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let db = match overlay_db_path(&config) {
        Some(path) => OverlayDb::open_at(path),
        None => OverlayDb::open(),
    };
    let db = match db {
        Ok(db) => Arc::new(Mutex::new(db)),
        Err(e) => {
            eprintln!("Overlay store error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env = RefreshEnv {
        session: Arc::new(SessionState::new(agent_id.clone())),
        db,
        source: Arc::new(CallSourceClient::new(
            config.provider_base_url.clone(),
            config.provider_api_key.clone(),
        )),
        extractor: Arc::new(ExtractionClient::new(
            config.extraction_url.clone(),
            config.extraction_api_key.clone(),
        )),
        notifier: Arc::new(LogNotifier),
        config,
    };

    let outcome = run_refresh(&env).await;

    match outcome.result {
        RefreshResult::Completed {
            records,
            new_call_ids,
        } => {
            println!(
                "Merged {} records for agent {} ({} new)",
                records.len(),
                agent_id,
                new_call_ids.len()
            );

            if let Some(batch) = outcome.batch {
                match batch.await {
                    Ok(summary) => println!(
                        "Extraction: {} eligible, {} attempted, {} persisted, {} notified",
                        summary.eligible,
                        summary.attempted,
                        summary.persisted,
                        summary.notified
                    ),
                    Err(e) => {
                        eprintln!("Extraction batch panicked: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        RefreshResult::Throttled => {
            println!("Refresh throttled; nothing to do");
            ExitCode::SUCCESS
        }
        RefreshResult::Failed { error } => {
            eprintln!("Refresh failed: {}", error.message);
            eprintln!("{}", error.recovery_suggestion);
            ExitCode::FAILURE
        }
    }
}
