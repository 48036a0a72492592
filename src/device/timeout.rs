//! Per-execution timeout tokens

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hands out the token that cancels an execution once its timeout elapses.
///
/// The clock starts on the first call to [`TimeoutFactory::token`]. The
/// token is a child of the run's cancellation token, so it also fires when
/// the whole run is cancelled.
#[derive(Debug)]
pub struct TimeoutFactory {
    parent: CancellationToken,
    duration: Duration,
    issued: Mutex<Option<CancellationToken>>,
    started: watch::Sender<Option<CancellationToken>>,
}

impl TimeoutFactory {
    pub fn new(parent: &CancellationToken, duration: Duration) -> Self {
        let (started, _) = watch::channel(None);
        Self {
            parent: parent.clone(),
            duration,
            issued: Mutex::new(None),
            started,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Token that fires after the timeout, started on first use
    pub fn token(&self) -> CancellationToken {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = issued.as_ref() {
            return token.clone();
        }

        let token = self.parent.child_token();
        let timer = token.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    debug!("Execution timed out after {:?}", duration);
                    timer.cancel();
                }
                _ = timer.cancelled() => {}
            }
        });

        *issued = Some(token.clone());
        self.started.send_replace(Some(token.clone()));
        token
    }

    /// The timeout elapsed (as opposed to the run being cancelled)
    pub fn timed_out(&self) -> bool {
        let issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        match issued.as_ref() {
            Some(token) => token.is_cancelled() && !self.parent.is_cancelled(),
            None => false,
        }
    }

    /// Resolves once an issued token has fired; pending until one is issued
    pub async fn expired(&self) {
        let mut started = self.started.subscribe();
        let token = match started.wait_for(Option::is_some).await {
            Ok(token) => token.clone(),
            Err(_) => None,
        };
        match token {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for TimeoutFactory {
    fn drop(&mut self) {
        // Stops the timer task
        if let Some(token) = self.issued.get_mut().ok().and_then(|t| t.take()) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_token_fires_after_duration() {
        let cancel = CancellationToken::new();
        let factory = TimeoutFactory::new(&cancel, Duration::from_secs(5));
        let token = factory.token();
        assert!(!factory.timed_out());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(token.is_cancelled());
        assert!(factory.timed_out());
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancellation_is_not_a_timeout() {
        let cancel = CancellationToken::new();
        let factory = TimeoutFactory::new(&cancel, Duration::from_secs(5));
        let token = factory.token();

        cancel.cancel();
        assert!(token.is_cancelled());
        assert!(!factory.timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_waits_for_issue() {
        let cancel = CancellationToken::new();
        let factory = TimeoutFactory::new(&cancel, Duration::from_secs(1));

        let not_issued = tokio::time::timeout(Duration::from_secs(10), factory.expired()).await;
        assert!(not_issued.is_err());

        factory.token();
        tokio::time::timeout(Duration::from_secs(2), factory.expired())
            .await
            .expect("issued token expires");
    }
}
