use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backfill;
use crate::config::SyncConfig;
use crate::live;
use crate::message::EmailAccount;
use crate::pipeline::Pipeline;
use crate::transport::{IdleOutcome, MailboxSession, MailboxTransport};

/// Per-account connection lifecycle. `Closed` is terminal and only
/// reached on explicit shutdown; everything else loops back through
/// `Reconnecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Backfilling,
    Listening,
    Reconnecting,
    Error,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub backfill_days: i64,
    pub reconnect_delay: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        SyncSettings {
            backfill_days: config.backfill_days,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_secs),
        }
    }
}

/// Owns one connection per configured account and drives it through
/// connect, backfill, listen and reconnect. All connection state lives
/// here; no other component mutates it.
pub struct SyncEngine<T: MailboxTransport> {
    transport: T,
    pipeline: Arc<Pipeline>,
    settings: SyncSettings,
    states: Mutex<HashMap<String, ConnectionState>>,
    /// At most one pending reconnect per account; a new schedule aborts
    /// the previous timer.
    reconnect_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: MailboxTransport> SyncEngine<T> {
    pub fn new(transport: T, pipeline: Arc<Pipeline>, settings: SyncSettings) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(SyncEngine {
            transport,
            pipeline,
            settings,
            states: Mutex::new(HashMap::new()),
            reconnect_timers: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Start one independent connection task per account.
    pub fn start(self: &Arc<Self>, accounts: &[EmailAccount]) {
        for account in accounts {
            log::info!("Starting sync for account {} ({})", account.id, account.user);
            self.spawn_account(account.clone());
        }
    }

    pub fn state_of(&self, account_id: &str) -> ConnectionState {
        self.states
            .lock()
            .unwrap()
            .get(account_id)
            .copied()
            .unwrap_or(ConnectionState::Idle)
    }

    /// Number of reconnect timers currently tracked. Never exceeds one
    /// per account.
    pub fn pending_reconnects(&self) -> usize {
        self.reconnect_timers.lock().unwrap().len()
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn transition(&self, account_id: &str, next: ConnectionState) {
        let mut states = self.states.lock().unwrap();
        let prev = states
            .insert(account_id.to_string(), next)
            .unwrap_or(ConnectionState::Idle);
        if prev != next {
            log::info!("Connection {account_id}: {prev:?} -> {next:?}");
        }
    }

    fn spawn_account(self: &Arc<Self>, account: EmailAccount) {
        let engine = Arc::clone(self);
        let account_id = account.id.clone();
        let handle = tokio::spawn(async move {
            // boxed to break the future type cycle through the reconnect timer
            let run: Pin<Box<dyn Future<Output = ()> + Send>> =
                Box::pin(engine.run_connection(account));
            run.await;
        });
        if let Some(previous) = self.tasks.lock().unwrap().insert(account_id, handle) {
            previous.abort();
        }
    }

    async fn run_connection(self: Arc<Self>, account: EmailAccount) {
        if self.is_shutdown() {
            return;
        }
        self.transition(&account.id, ConnectionState::Connecting);

        let mut session = match self.transport.connect(&account).await {
            Ok(session) => {
                log::info!("Connected to account {} ({})", account.id, account.user);
                session
            }
            Err(e) => {
                log::error!("Error connecting {}: {e}", account.id);
                self.transition(&account.id, ConnectionState::Error);
                self.schedule_reconnect(account);
                return;
            }
        };

        self.transition(&account.id, ConnectionState::Backfilling);
        let window = self.settings.backfill_days;
        match backfill::run(&mut session, &account, window, &self.pipeline).await {
            Ok(count) => log::info!("Backfill complete for {}: {count} messages", account.id),
            Err(e) => {
                log::error!("Backfill failed for {}: {e}", account.id);
                self.schedule_reconnect(account);
                return;
            }
        }

        self.transition(&account.id, ConnectionState::Listening);
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                outcome = session.idle_until_change(self.settings.keepalive_interval) => {
                    match outcome {
                        Ok(IdleOutcome::NewMail) => {
                            log::info!("New message detected in {}", account.id);
                            match live::fetch_latest(&mut session, &account).await {
                                Ok(Some(email)) => {
                                    let pipeline = Arc::clone(&self.pipeline);
                                    // fire-and-forget; shutdown does not wait for this
                                    tokio::spawn(async move {
                                        pipeline.process(email).await;
                                    });
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    log::error!(
                                        "Error fetching new message for {}: {e}",
                                        account.id
                                    );
                                }
                            }
                        }
                        Ok(IdleOutcome::KeepaliveDue) => {
                            if session.usable() {
                                if let Err(e) = session.heartbeat().await {
                                    log::error!("Keepalive failed for {}: {e}", account.id);
                                }
                            }
                        }
                        Err(e) => {
                            log::error!("Connection lost for {}: {e}", account.id);
                            self.schedule_reconnect(account);
                            return;
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        if let Err(e) = session.disconnect().await {
            log::error!("Error disconnecting {}: {e}", account.id);
        } else {
            log::info!("Disconnected from {}", account.id);
        }
        self.transition(&account.id, ConnectionState::Closed);
    }

    /// Schedule exactly one delayed re-entry into `Connecting`. The delay
    /// is fixed; retries are unbounded even under permanent credential
    /// failure, matching the documented behavior.
    fn schedule_reconnect(self: &Arc<Self>, account: EmailAccount) {
        if self.is_shutdown() {
            return;
        }
        self.transition(&account.id, ConnectionState::Reconnecting);

        let engine = Arc::clone(self);
        let account_id = account.id.clone();
        let delay = self.settings.reconnect_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if engine.is_shutdown() {
                return;
            }
            log::info!("Attempting to reconnect {}", account.id);
            engine.spawn_account(account);
        });

        let mut timers = self.reconnect_timers.lock().unwrap();
        if let Some(previous) = timers.insert(account_id, timer) {
            previous.abort();
        }
    }

    /// Cancel all timers and release every transport, best-effort.
    /// In-flight pipeline calls are not awaited.
    pub async fn shutdown(&self) {
        log::info!("Shutting down mailbox sync");
        let _ = self.shutdown_tx.send(true);

        for (_, timer) in self.reconnect_timers.lock().unwrap().drain() {
            timer.abort();
        }

        let tasks: Vec<(String, JoinHandle<()>)> =
            self.tasks.lock().unwrap().drain().collect();
        for (account_id, task) in tasks {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(_) => log::error!("Connection task for {account_id} ended abnormally"),
            }
        }
    }
}
