//! Per-run background tasks and fatal-error wiring.

use super::state::DispatcherState;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use anyhow::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    /// Cancelled when the run ends or a fatal error fires.
    pub run_token: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams {
    pub telemetry: Arc<Telemetry>,
    pub state: Arc<DispatcherState>,
    pub metrics_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn(params: LifecycleSpawnParams) -> Self {
        let LifecycleSpawnParams {
            telemetry,
            state,
            metrics_interval,
        } = params;

        let run_token = CancellationToken::new();
        let fatal_handler = Arc::new(FatalErrorHandler::new(run_token.clone()));
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            state,
            run_token.clone(),
            metrics_interval,
        );

        Self {
            run_token,
            fatal_handler,
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) fn fatal_handler(&self) -> Arc<FatalErrorHandler> {
        self.fatal_handler.clone()
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.fatal_handler.error()
    }

    pub(crate) async fn shutdown(mut self) {
        self.run_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}
