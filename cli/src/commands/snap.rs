use anyhow::{Context, Result};
use std::future::Future;
use std::path::Path;
use std::process;
use tracing::info;

use calsnap_core::coordinator::{FoodLogCoordinator, SubmitOutcome};

use super::helpers::{json_error, print_record_detail};

pub(crate) async fn cmd_snap(coordinator: &FoodLogCoordinator, image: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("Failed to read image: {}", image.display()))?;

    if !json {
        eprintln!("Analyzing {}...", image.display());
    }

    let outcome = submit_until(coordinator, bytes, tokio::signal::ctrl_c()).await;

    match outcome {
        SubmitOutcome::Logged(record) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_record_detail(&record);
            }
            Ok(())
        }
        SubmitOutcome::Failed(message) => {
            if json {
                println!("{}", json_error(&message));
            } else {
                eprintln!("{message}");
            }
            process::exit(1);
        }
        SubmitOutcome::Cancelled => {
            if json {
                println!("{}", json_error("Analysis cancelled"));
            } else {
                eprintln!("Analysis cancelled");
            }
            process::exit(130);
        }
    }
}

/// Submit `image`, giving up as soon as `interrupt` resolves.
///
/// An interrupt that arrives before the analysis has started drops the
/// submission instead of waiting for it.
async fn submit_until<F: Future>(
    coordinator: &FoodLogCoordinator,
    image: Vec<u8>,
    interrupt: F,
) -> SubmitOutcome {
    let submit = coordinator.submit_image(image);
    tokio::pin!(submit);
    tokio::select! {
        biased;
        _ = interrupt => {
            if coordinator.cancel_analysis() {
                info!("interrupt received, cancelling analysis");
                submit.await
            } else {
                info!("interrupt received before analysis started");
                SubmitOutcome::Cancelled
            }
        }
        outcome = &mut submit => outcome,
    }
}
