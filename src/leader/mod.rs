//! Leader lease — single-writer election over an exclusive file lock
//!
//! Candidates take a non-blocking exclusive `flock` on a configured path.
//! The holder writes its PID into the file, spawns the leader task with a
//! child cancellation token, and re-asserts the lease every retry period by
//! checking the lock target still exists and is the same inode. Losing the
//! lease cancels and aborts the leader task so in-flight work is dropped.
//!
//! When election is disabled the process is the permanent leader and the
//! leader task runs immediately.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::LeaderElectionConfig;
use crate::error::{Result, ZenoError};

struct LeaderState {
    lock: Flock<File>,
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// File-lock based leader elector
pub struct LeaderElector {
    config: LeaderElectionConfig,
}

impl LeaderElector {
    /// Create a new elector
    pub fn new(config: LeaderElectionConfig) -> Self {
        Self { config }
    }

    /// Run the election loop until `shutdown` fires.
    ///
    /// `on_leading` builds the leader task; it receives a child token that
    /// is cancelled when leadership is lost. `on_stopped` fires on every
    /// transition out of leadership.
    pub async fn run<F, Fut>(
        &self,
        shutdown: CancellationToken,
        on_leading: F,
        on_stopped: impl Fn(),
    ) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if !self.config.enabled {
            tracing::info!("leader election disabled, assuming leadership");
            let child = shutdown.child_token();
            on_leading(child).await;
            on_stopped();
            return Ok(());
        }

        tracing::info!(
            lock_file = self.config.lock_file_path,
            lease_duration_secs = self.config.lease_duration_secs,
            "starting leader election"
        );

        let mut state: Option<LeaderState> = None;
        let mut ticker = tokio::time::interval(self.config.retry_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Some(held) = state.take() {
                        self.release(held, &on_stopped).await;
                    }
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let lost = matches!(&state, Some(held) if !self.still_holding(&held.lock));
                    if lost {
                        tracing::warn!("lost leadership");
                        if let Some(held) = state.take() {
                            self.release(held, &on_stopped).await;
                        }
                    } else if state.is_none() {
                        match self.try_acquire() {
                            Ok(Some(lock)) => {
                                tracing::info!("acquired leadership");
                                if let Err(e) = write_pid(&lock) {
                                    tracing::warn!(error = %e, "failed to write PID to lock file");
                                }
                                let token = shutdown.child_token();
                                let handle = tokio::spawn(on_leading(token.clone()));
                                state = Some(LeaderState { lock, token, handle });
                            }
                            Ok(None) => {}
                            Err(e) => {
                                tracing::error!(error = %e, "failed to acquire lock");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Attempt a non-blocking exclusive lock. `None` means another holder
    /// has it; errors are environmental (permissions, missing directory).
    fn try_acquire(&self) -> Result<Option<Flock<File>>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(&self.config.lock_file_path)
            .map_err(|e| {
                ZenoError::Lease(format!(
                    "failed to open lock file {}: {}",
                    self.config.lock_file_path, e
                ))
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(lock)),
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(ZenoError::Lease(format!(
                "failed to acquire lock: {}",
                errno
            ))),
        }
    }

    /// The lease holds as long as the lock target still exists and is the
    /// inode we locked; a deleted or replaced file means the lease is gone.
    fn still_holding(&self, lock: &Flock<File>) -> bool {
        let held_ino = match lock.metadata() {
            Ok(meta) => meta.ino(),
            Err(_) => return false,
        };
        match std::fs::metadata(&self.config.lock_file_path) {
            Ok(meta) => meta.ino() == held_ino,
            Err(_) => false,
        }
    }

    async fn release(&self, held: LeaderState, on_stopped: &impl Fn()) {
        held.token.cancel();
        held.handle.abort();
        let _ = held.handle.await;
        drop(held.lock);
        on_stopped();
        tracing::info!("released leadership");
    }
}

fn write_pid(lock: &Flock<File>) -> std::io::Result<()> {
    let file: &File = lock;
    file.set_len(0)?;
    let mut writer = file;
    writeln!(writer, "{}", std::process::id())?;
    writer.flush()
}
