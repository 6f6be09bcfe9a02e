use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::DynConnector;

/// Backoff parameters for a [RetryController].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound the delay doubles towards.
    pub max_delay: Duration,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            max_attempts: None,
        }
    }
}

/// What a [RetryController] is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Connecting,
    /// Waiting out the backoff delay before the next attempt.
    Scheduled,
    Connected,
    /// `max_attempts` consecutive attempts failed.
    GaveUp,
}

/// A snapshot of a [RetryController]'s state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub attempt_count: u32,
    pub current_delay: Duration,
    /// Whether the controller is supposed to keep retrying.
    pub active: bool,
    pub phase: RetryPhase,
    pub last_error: Option<String>,
}

struct Inner {
    name: String,
    config: RetryConfig,
    connector: Arc<DynConnector>,
    state: Mutex<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(self: Arc<Self>) {
        loop {
            if !self.lock_state().active {
                return;
            }

            let delay = match self.connector.connect().await {
                Ok(()) => {
                    let mut state = self.lock_state();
                    state.attempt_count = 0;
                    state.current_delay = self.config.initial_delay;
                    state.active = false;
                    state.phase = RetryPhase::Connected;
                    state.last_error = None;
                    info!("{}: connected", self.name);
                    return;
                }
                Err(e) => {
                    let mut state = self.lock_state();
                    state.attempt_count += 1;
                    state.last_error = Some(e.to_string());
                    if let Some(max) = self.config.max_attempts {
                        if state.attempt_count >= max {
                            state.active = false;
                            state.phase = RetryPhase::GaveUp;
                            error!(
                                "{}: giving up after {} failed connection attempts: {e}",
                                self.name, state.attempt_count
                            );
                            return;
                        }
                    }
                    state.phase = RetryPhase::Scheduled;
                    warn!(
                        "{}: connection attempt {} failed: {e}. Retrying in {}ms",
                        self.name,
                        state.attempt_count,
                        state.current_delay.as_millis()
                    );
                    state.current_delay
                }
            };

            tokio::time::sleep(delay).await;

            let mut state = self.lock_state();
            state.current_delay = (state.current_delay * 2).min(self.config.max_delay);
            state.phase = RetryPhase::Connecting;
        }
    }
}

/// Drives a [Connector](crate::Connector) until it succeeds, backing off exponentially between failures.
///
/// The first attempt is made as soon as [RetryController::start] is called. After a failed attempt the
/// next one is scheduled `current_delay` later and the delay doubles, capped at `max_delay`. A
/// successful attempt resets the backoff and the controller becomes idle again, so `start` can be called
/// once the connection is lost.
///
/// Cloning a controller produces another handle to the same controller.
#[derive(Clone)]
pub struct RetryController {
    inner: Arc<Inner>,
}

impl RetryController {
    pub fn new<S: Into<String>>(name: S, config: RetryConfig, connector: Arc<DynConnector>) -> Self {
        let state = ConnectionState {
            attempt_count: 0,
            current_delay: config.initial_delay,
            active: false,
            phase: RetryPhase::Idle,
            last_error: None,
        };
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                connector,
                state: Mutex::new(state),
                task: Mutex::new(None),
            }),
        }
    }

    /// Begin connecting. Does nothing if the controller is already connecting or waiting to retry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.active {
                debug!("{}: already connecting", self.inner.name);
                return;
            }
            state.active = true;
            state.phase = RetryPhase::Connecting;
        }
        let handle = tokio::spawn(self.inner.clone().run());
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
    }

    /// Cancel any pending or in flight attempt. The backoff state is retained.
    pub fn stop(&self) {
        {
            let mut state = self.inner.lock_state();
            state.active = false;
            if matches!(state.phase, RetryPhase::Connecting | RetryPhase::Scheduled) {
                state.phase = RetryPhase::Idle;
            }
        }
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use tokio::time::{self, Instant};

    use super::*;
    use crate::{ConnectError, Connector};

    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<bool>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<(), ConnectError> {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.outcomes.lock().unwrap().pop_front() {
                Some(true) => Ok(()),
                _ => Err(ConnectError::Failed("refused".into())),
            }
        }
    }

    fn gaps(attempts: &[Instant]) -> Vec<u128> {
        attempts
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_then_resets_on_success() {
        let connector = ScriptedConnector::new(&[false, false, false, true]);
        let retry = RetryController::new("test", RetryConfig::default(), connector.clone());
        retry.start();

        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(gaps(&connector.attempts()), vec![1000, 2000, 4000]);
        let state = retry.state();
        assert_eq!(state.phase, RetryPhase::Connected);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.current_delay, Duration::from_millis(1000));
        assert!(!state.active);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_capped() {
        let connector = ScriptedConnector::new(&[false; 8]);
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            max_attempts: None,
        };
        let retry = RetryController::new("test", config, connector.clone());
        retry.start();

        time::sleep(Duration::from_millis(12_500)).await;
        retry.stop();

        assert_eq!(gaps(&connector.attempts()), vec![1000, 2000, 3000, 3000, 3000]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = ScriptedConnector::new(&[]);
        let config = RetryConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        let retry = RetryController::new("test", config, connector.clone());
        retry.start();

        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(connector.attempts().len(), 3);
        let state = retry.state();
        assert_eq!(state.phase, RetryPhase::GaveUp);
        assert!(!state.active);
        assert_eq!(state.last_error.as_deref(), Some("connection failed: refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_active_is_ignored() {
        let connector = ScriptedConnector::new(&[]);
        let retry = RetryController::new("test", RetryConfig::default(), connector.clone());
        retry.start();
        retry.start();
        time::sleep(Duration::from_millis(500)).await;
        retry.start();

        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(retry.state().phase, RetryPhase::Scheduled);
        retry.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_scheduled_attempt() {
        let connector = ScriptedConnector::new(&[]);
        let retry = RetryController::new("test", RetryConfig::default(), connector.clone());
        retry.start();
        time::sleep(Duration::from_millis(500)).await;
        retry.stop();
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(connector.attempts().len(), 1);
        let state = retry.state();
        assert!(!state.active);
        assert_eq!(state.phase, RetryPhase::Idle);
        assert_eq!(state.attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_connection_lost() {
        let connector = ScriptedConnector::new(&[true, false, true]);
        let retry = RetryController::new("test", RetryConfig::default(), connector.clone());
        retry.start();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(retry.state().phase, RetryPhase::Connected);

        retry.start();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.attempts().len(), 3);
        assert_eq!(retry.state().phase, RetryPhase::Connected);
    }
}
