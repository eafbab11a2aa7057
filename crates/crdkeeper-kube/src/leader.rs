//! Leader election wrapper
//!
//! [`LeaderElection::start`] runs a [`LeaderElector`] on its own task and
//! turns its callbacks into two one-shot signals owned by a [`LeaderSession`]:
//! "acquired" fires when this replica becomes leader, "released" fires when
//! the election loop ends and reports how leadership ended.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{KubeError, Result};
use crate::lease::{ElectionConfig, LeaderCallbacks, LeaderElector, LeaseLock};

/// How a leader election session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEnd {
    /// This replica stepped down on request
    Cooperative,
    /// Leadership was taken away (renewal failed or another replica took over)
    Involuntary,
    /// The session ended before leadership was acquired
    NeverAcquired,
}

impl LeadershipEnd {
    /// Process exit status for a replica whose leadership ended this way
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Cooperative | Self::NeverAcquired => 0,
            Self::Involuntary => 1,
        }
    }
}

impl fmt::Display for LeadershipEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooperative => write!(f, "cooperative"),
            Self::Involuntary => write!(f, "involuntary"),
            Self::NeverAcquired => write!(f, "never acquired"),
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Callbacks feeding the session's one-shot signals
struct SessionSignals {
    acquired: Mutex<Option<oneshot::Sender<()>>>,
    released: Mutex<Option<oneshot::Sender<LeadershipEnd>>>,
    leadership: Mutex<Option<CancellationToken>>,
}

impl LeaderCallbacks for SessionSignals {
    fn on_started_leading(&self, leadership: CancellationToken) {
        *guard(&self.leadership) = Some(leadership);

        if let Some(acquired) = guard(&self.acquired).take() {
            let _ = acquired.send(());
        }
    }

    fn on_stopped_leading(&self) {
        let leadership = guard(&self.leadership).clone();

        let end = match leadership {
            None => LeadershipEnd::NeverAcquired,
            Some(token) if token.is_cancelled() => {
                tracing::info!("Lost leader due to cooperative lease release");
                LeadershipEnd::Cooperative
            }
            Some(_) => {
                tracing::warn!("Lost leader");
                LeadershipEnd::Involuntary
            }
        };

        // Wakes anyone still waiting for acquisition
        guard(&self.acquired).take();

        if let Some(released) = guard(&self.released).take() {
            let _ = released.send(end);
        }
    }
}

/// Leader election over a [`LeaseLock`]
pub struct LeaderElection {
    lock: Arc<dyn LeaseLock>,
    config: ElectionConfig,
}

impl LeaderElection {
    /// Create a leader election, validating its configuration
    pub fn new(lock: Arc<dyn LeaseLock>, config: ElectionConfig) -> Result<Self> {
        config.validate()?;
        if lock.identity().is_empty() {
            return Err(KubeError::InvalidLeaseConfig(
                "leader election identity must not be empty".to_string(),
            ));
        }
        Ok(Self { lock, config })
    }

    /// Identity this replica holds the lease as
    pub fn identity(&self) -> &str {
        self.lock.identity()
    }

    /// Lease location, for logs
    pub fn describe(&self) -> String {
        self.lock.describe()
    }

    /// Spawn the election loop
    ///
    /// Cancelling `cancel` stops the loop: before acquisition the session
    /// ends as [`LeadershipEnd::NeverAcquired`], after acquisition the lease
    /// is released cooperatively.
    pub fn start(&self, cancel: CancellationToken) -> Result<LeaderSession> {
        let (acquired_tx, acquired_rx) = oneshot::channel();
        let (released_tx, released_rx) = oneshot::channel();

        let signals = Arc::new(SessionSignals {
            acquired: Mutex::new(Some(acquired_tx)),
            released: Mutex::new(Some(released_tx)),
            leadership: Mutex::new(None),
        });

        let elector = LeaderElector::new(Arc::clone(&self.lock), self.config.clone(), signals)?;
        let task = tokio::spawn(elector.run(cancel.clone()));

        Ok(LeaderSession {
            acquired: Some(acquired_rx),
            released: Some(released_rx),
            end: None,
            task: Some(task),
            cancel,
        })
    }
}

/// One running leader election, scoped to a single apply
pub struct LeaderSession {
    acquired: Option<oneshot::Receiver<()>>,
    released: Option<oneshot::Receiver<LeadershipEnd>>,
    end: Option<LeadershipEnd>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl LeaderSession {
    /// Wait until this replica holds the lease
    ///
    /// There is no timeout; returns [`KubeError::Cancelled`] if the session is
    /// cancelled first.
    pub async fn wait_acquired(&mut self) -> Result<()> {
        let Some(acquired) = self.acquired.take() else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KubeError::Cancelled),
            signal = acquired => signal.map_err(|_| {
                KubeError::ElectionTask("election ended before acquiring the lease".to_string())
            }),
        }
    }

    /// Wait for the "released" signal
    ///
    /// Cancellation safe: dropping the future before it completes loses
    /// nothing, so it can be raced against other work.
    pub async fn released(&mut self) -> Result<LeadershipEnd> {
        if let Some(end) = self.end {
            return Ok(end);
        }

        let Some(released) = self.released.as_mut() else {
            return Err(KubeError::ElectionTask(
                "election ended without reporting".to_string(),
            ));
        };

        let result = released.await;
        self.released = None;

        let end = result.map_err(|_| {
            KubeError::ElectionTask("election ended without reporting".to_string())
        })?;
        self.end = Some(end);
        Ok(end)
    }

    /// Wait for the election loop to end and its task to unwind
    pub async fn wait_released(&mut self) -> Result<LeadershipEnd> {
        let end = self.released().await?;

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| KubeError::ElectionTask(e.to_string()))?;
        }
        Ok(end)
    }

    /// Give up leadership cooperatively and wait for the release
    pub async fn step_down(&mut self) -> Result<LeadershipEnd> {
        self.cancel.cancel();
        self.wait_released().await
    }
}

impl Drop for LeaderSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLeaseLock;
    use std::time::Duration;

    fn fast_config() -> ElectionConfig {
        ElectionConfig {
            lease_duration: Duration::from_millis(600),
            renew_deadline: Duration::from_millis(300),
            retry_period: Duration::from_millis(10),
            release_on_cancel: true,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(LeadershipEnd::Cooperative.exit_code(), 0);
        assert_eq!(LeadershipEnd::NeverAcquired.exit_code(), 0);
        assert_eq!(LeadershipEnd::Involuntary.exit_code(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_up_front() {
        let config = ElectionConfig {
            renew_deadline: Duration::from_secs(30),
            ..Default::default()
        };
        let result = LeaderElection::new(Arc::new(MockLeaseLock::new("replica-a")), config);
        assert!(matches!(result, Err(KubeError::InvalidLeaseConfig(_))));
    }

    #[tokio::test]
    async fn test_step_down_is_cooperative() {
        let lock = MockLeaseLock::new("replica-a");
        let election = LeaderElection::new(Arc::new(lock.clone()), fast_config()).unwrap();

        let mut session = election.start(CancellationToken::new()).unwrap();
        session.wait_acquired().await.unwrap();
        assert_eq!(lock.holder().as_deref(), Some("replica-a"));

        let end = session.step_down().await.unwrap();
        assert_eq!(end, LeadershipEnd::Cooperative);
        assert_eq!(lock.holder(), None);
        assert_eq!(lock.release_count(), 1);
    }

    #[tokio::test]
    async fn test_takeover_is_involuntary() {
        let lock = MockLeaseLock::new("replica-a");
        let election = LeaderElection::new(Arc::new(lock.clone()), fast_config()).unwrap();

        let mut session = election.start(CancellationToken::new()).unwrap();
        session.wait_acquired().await.unwrap();

        lock.for_identity("replica-b").hold_for(Duration::from_secs(60));

        assert_eq!(session.released().await.unwrap(), LeadershipEnd::Involuntary);
        // The cached result is reported again
        assert_eq!(session.wait_released().await.unwrap(), LeadershipEnd::Involuntary);
        assert_eq!(lock.holder().as_deref(), Some("replica-b"));
    }

    #[tokio::test]
    async fn test_cancel_before_acquire() {
        let lock = MockLeaseLock::new("replica-a");
        lock.for_identity("replica-b").hold_for(Duration::from_secs(60));
        let election = LeaderElection::new(Arc::new(lock.clone()), fast_config()).unwrap();

        let cancel = CancellationToken::new();
        let mut session = election.start(cancel.child_token()).unwrap();

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        assert!(matches!(
            session.wait_acquired().await,
            Err(KubeError::Cancelled)
        ));
        waiter.await.unwrap();

        assert_eq!(
            session.wait_released().await.unwrap(),
            LeadershipEnd::NeverAcquired
        );
        assert_eq!(lock.holder().as_deref(), Some("replica-b"));
        assert_eq!(lock.release_count(), 0);
    }
}
