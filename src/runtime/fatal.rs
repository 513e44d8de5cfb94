use anyhow::Error as AnyError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Captures the first unrecoverable dispatch error and stops the run.
///
/// Incident-level failures never reach this handler; they become failed
/// completions. Only infrastructure faults (dead workers, a closed event
/// channel, undeliverable assignments) are fatal.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    run_shutdown: CancellationToken,
    captured_error: Mutex<Option<CapturedFatalError>>,
}

#[derive(Clone)]
struct CapturedFatalError {
    inner: Arc<AnyError>,
}

impl CapturedFatalError {
    fn new(inner: AnyError) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl fmt::Debug for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturedFatalError")
            .field(&self.inner)
            .finish()
    }
}

impl fmt::Display for CapturedFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner.as_ref(), f)
    }
}

impl std::error::Error for CapturedFatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref().as_ref())
    }
}

impl FatalErrorHandler {
    pub fn new(run_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                run_shutdown,
                captured_error: Mutex::new(None),
            }),
        }
    }

    /// Records `error` (first call wins) and cancels the run token.
    pub fn trigger_external(&self, context: &str, error: AnyError) -> AnyError {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return error;
        }

        tracing::error!(
            context,
            error = %error,
            "fatal dispatch error; stopping run"
        );

        let captured = CapturedFatalError::new(error);
        {
            let mut slot = self
                .inner
                .captured_error
                .lock()
                .expect("fatal error slot mutex poisoned");
            if slot.is_none() {
                *slot = Some(captured.clone());
            }
        }

        self.inner.run_shutdown.cancel();
        captured.into()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<AnyError> {
        self.inner
            .captured_error
            .lock()
            .expect("fatal error slot mutex poisoned")
            .as_ref()
            .map(|error| error.clone().into())
    }
}
