//! Helpers for spawning background tasks with consistent lifecycle handling.
//!
//! Every long-lived task is spawned on a shared tracker and tied to the
//! application cancellation token, so one task failing unexpectedly brings
//! the whole process to a clean stop instead of limping along without it.

use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info};

/// Spawn a task that runs to completion, cancelling the application if it
/// fails.
pub fn spawn_managed_task<F>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_future: F,
) where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    let task_token = app_token.clone();

    tracker.spawn(async move {
        match task_future.await {
            Ok(()) => {
                info!(task = task_name, "Background task completed");
            }
            Err(e) => {
                error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                task_token.cancel();
            }
        }
    });
}

/// Spawn a task built from the cancellation token, stopping it gracefully on
/// shutdown and cancelling the application if it fails on its own.
pub fn spawn_cancellable_task<F, Fut>(
    tracker: &TaskTracker,
    app_token: CancellationToken,
    task_name: &'static str,
    task_builder: F,
) where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    info!(task = task_name, "Starting background task");

    let task_token = app_token.clone();
    let cancel_token = app_token.clone();

    tracker.spawn(async move {
        tokio::select! {
            result = task_builder(cancel_token.clone()) => {
                match result {
                    Ok(()) => {
                        info!(task = task_name, "Background task completed");
                    }
                    Err(e) => {
                        error!(task = task_name, error = ?e, "Background task failed unexpectedly");
                        task_token.cancel();
                    }
                }
            }
            () = task_token.cancelled() => {
                info!(task = task_name, "Background task shutting down gracefully");
            }
        }
    });
}
