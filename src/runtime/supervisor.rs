use crate::dispatch::{DispatchReport, Dispatcher};
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Drives a [`Dispatcher`] run and turns OS signals into graceful cancellation.
pub struct FanoutSupervisor {
    dispatcher: Arc<Dispatcher>,
}

impl FanoutSupervisor {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Returns a clone of the dispatcher's cancellation token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.dispatcher.cancellation_token()
    }

    /// Runs until the dispatch finishes or a Ctrl-C (SIGINT) is received.
    ///
    /// After Ctrl-C no new incidents are assigned; in-flight incidents finish and the
    /// returned report carries the `cancelled` status.
    pub async fn run_until_ctrl_c(&self) -> Result<DispatchReport> {
        tracing::info!("dispatch started; waiting for completion or Ctrl-C (SIGINT)");

        let run = self.dispatcher.run();
        tokio::pin!(run);

        tokio::select! {
            report = &mut run => report,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; draining in-flight incidents");
                self.dispatcher.cancellation_token().cancel();
                run.await
            }
        }
    }
}
