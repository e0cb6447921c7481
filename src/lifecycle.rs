//! Drives the backing instance through its wake/sleep cycle. One [`Driver`]
//! owns the whole cycle; everything else observes it through cheap immutable
//! snapshots and feeds it login attempts.

use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use parking_lot::RwLock;
use rand::Rng;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    control::{ControlPlane, ControlPlaneError},
    probe::{ProbeError, StatusProber},
};

/// Where the backing instance currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    AwaitingNetworkAddress,
    RebindingAddress,
    AwaitingBackingReady,
    Active,
    Draining,
    Stopping,
}

/// Point-in-time view of the lifecycle. Published as a whole value, so a
/// reader never sees the phase of one update with the occupancy of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    pub instance_id: String,
    pub public_address: Ipv4Addr,
    /// Player count from the most recent successful probe of this cycle.
    pub occupancy: Option<u32>,
    /// Why the last wake cycle was abandoned, if it was.
    pub fault: Option<String>,
}

/// A join attempt seen by a session. The only thing that wakes the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub player_name: String,
    pub source: SocketAddr,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("{what} failed after {attempts} attempts: {source}")]
    ControlPlane {
        what: String,
        attempts: u32,
        source: ControlPlaneError,
    },
    #[error("gave up waiting for {waiting_for} after {after:?}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },
}

/// Shared handle held by every session (and the driver itself).
#[derive(Clone)]
pub struct Lifecycle {
    shared: Arc<Shared>,
}

struct Shared {
    snapshot: RwLock<Arc<Snapshot>>,
    trigger: mpsc::Sender<LoginAttempt>,
}

impl Lifecycle {
    /// Also hands back the receiving end of the login trigger. Exactly one
    /// [`Driver`] gets it; a second consumer would race the cycle.
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<LoginAttempt>) {
        let (trigger, trigger_rx) = mpsc::channel(1);
        let snapshot = Snapshot {
            phase: Phase::Stopped,
            instance_id: config.instance.id.clone(),
            public_address: config.instance.public_address,
            occupancy: None,
            fault: None,
        };
        let lifecycle = Self {
            shared: Arc::new(Shared {
                snapshot: RwLock::new(Arc::new(snapshot)),
                trigger,
            }),
        };
        (lifecycle, trigger_rx)
    }

    /// Cheap enough to call for every status query.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.snapshot.read().clone()
    }

    /// Turns a join attempt into a wake-up trigger. While a cycle is already
    /// underway (or another trigger is queued) the attempt is absorbed, so
    /// the driver only ever sees the one that matters.
    pub fn notify_login(&self, attempt: LoginAttempt) {
        if self.snapshot().phase != Phase::Stopped {
            debug!(
                "{} tried to join mid-cycle, the wake-up is already underway",
                attempt.player_name
            );
            return;
        }
        match self.shared.trigger.try_send(attempt) {
            Ok(()) => {}
            Err(TrySendError::Full(attempt)) => {
                debug!(
                    "{} tried to join but a wake-up is already queued",
                    attempt.player_name
                );
            }
            Err(TrySendError::Closed(attempt)) => {
                warn!(
                    "{} tried to join but the lifecycle driver is gone",
                    attempt.player_name
                );
            }
        }
    }

    /// Copy-update-swap so readers always hold a complete value.
    fn publish(&self, update: impl FnOnce(&mut Snapshot)) {
        let mut guard = self.shared.snapshot.write();
        let mut next = (**guard).clone();
        update(&mut next);
        *guard = Arc::new(next);
    }
}

/// Doubling retry delay with a cap and a bit of jitter.
struct Backoff {
    delay: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            delay: initial,
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.delay.min(self.max);
        self.delay = (base * 2).min(self.max);
        // up to 12.5% of jitter so retries don't land in lockstep with
        // whatever made the control plane unhappy
        base.mul_f64(1.0 + rand::thread_rng().gen_range(-0.125..0.125))
    }
}

/// Owns the wake cycle: start, rebind, wait for readiness, watch occupancy,
/// tear back down. Spawn [`Driver::run`] once at startup.
pub struct Driver<C, P> {
    lifecycle: Lifecycle,
    trigger_rx: mpsc::Receiver<LoginAttempt>,
    control: C,
    prober: P,
    config: Arc<Config>,
}

impl<C: ControlPlane, P: StatusProber> Driver<C, P> {
    pub fn new(
        lifecycle: Lifecycle,
        trigger_rx: mpsc::Receiver<LoginAttempt>,
        control: C,
        prober: P,
        config: Arc<Config>,
    ) -> Self {
        Self {
            lifecycle,
            trigger_rx,
            control,
            prober,
            config,
        }
    }

    /// Consumes login triggers forever. A failed cycle is recorded on the
    /// snapshot and the next login simply tries again.
    pub async fn run(mut self) {
        while let Some(attempt) = self.trigger_rx.recv().await {
            info!(
                "{} ({}) tried to join, waking the backing instance",
                attempt.player_name, attempt.source
            );
            self.lifecycle.publish(|s| s.fault = None);

            match self.run_cycle().await {
                Ok(()) => info!("wake cycle finished, back to hibernating"),
                Err(err) => {
                    warn!("wake cycle abandoned: {err}");
                    self.lifecycle.publish(|s| s.fault = Some(err.to_string()));
                }
            }

            // logins that raced in mid-cycle must not immediately wake the
            // instance we just put to bed
            while self.trigger_rx.try_recv().is_ok() {}
            self.lifecycle.publish(|s| {
                s.phase = Phase::Stopped;
                s.occupancy = None;
            });
        }
    }

    async fn run_cycle(&self) -> Result<(), CycleError> {
        let instance_id = self.config.instance.id.clone();
        let address = self.config.instance.public_address;

        self.publish_phase(Phase::Starting);
        self.retry("start instance", || {
            self.control.start_instance(&instance_id)
        })
        .await?;
        info!("backing instance {instance_id} is running");

        if let Err(err) = self.bring_up(&instance_id, address).await {
            // the instance did start, never leave it running unattended
            warn!("bring-up failed, putting the instance back to sleep: {err}");
            self.teardown(&instance_id).await?;
            return Err(err);
        }

        self.watch_occupancy().await;
        self.teardown(&instance_id).await
    }

    /// Points the public address at the started instance, then polls until
    /// the server on it answers status queries.
    async fn bring_up(&self, instance_id: &str, address: Ipv4Addr) -> Result<(), CycleError> {
        let orchestrator = &self.config.orchestrator;

        self.publish_phase(Phase::AwaitingNetworkAddress);
        self.retry("rebind address to backing instance", || {
            self.control.associate_address(address, instance_id)
        })
        .await?;
        self.publish_phase(Phase::RebindingAddress);
        info!("{address} now points at the backing instance");

        self.publish_phase(Phase::AwaitingBackingReady);
        let deadline = Instant::now() + orchestrator.ready_timeout();
        loop {
            match self.prober.query().await {
                Ok(status) => {
                    info!(
                        "backing server is accepting traffic, {} online",
                        status.online_players
                    );
                    self.lifecycle
                        .publish(|s| s.occupancy = Some(status.online_players.max(0) as u32));
                    return Ok(());
                }
                Err(ProbeError::NotReady(err)) => {
                    debug!("backing server not ready yet: {err}");
                }
                Err(err) => {
                    warn!("status probe failed, treating as not ready: {err}");
                }
            }
            if Instant::now() >= deadline {
                return Err(CycleError::Timeout {
                    waiting_for: "the backing server to accept traffic",
                    after: orchestrator.ready_timeout(),
                });
            }
            sleep(orchestrator.ready_poll()).await;
        }
    }

    /// Active until the server is observed empty, then one drain grace with a
    /// final recheck, looping back to active if players returned.
    async fn watch_occupancy(&self) {
        let orchestrator = &self.config.orchestrator;
        let mut seen_players = self.lifecycle.snapshot().occupancy.unwrap_or_default() > 0;

        loop {
            self.publish_phase(Phase::Active);
            self.active_until_empty(&mut seen_players).await;

            self.publish_phase(Phase::Draining);
            sleep(orchestrator.drain_grace()).await;
            match self.prober.query().await {
                Ok(status) if status.online_players > 0 => {
                    info!("players came back during the drain grace, staying up");
                    self.lifecycle
                        .publish(|s| s.occupancy = Some(status.online_players.max(0) as u32));
                }
                Ok(_) => return,
                Err(err) => {
                    debug!("drain recheck failed, proceeding with teardown: {err}");
                    return;
                }
            }
        }
    }

    /// Polls occupancy until the server is observed empty, or until nobody
    /// has shown up for longer than the empty-server timeout.
    async fn active_until_empty(&self, seen_players: &mut bool) {
        let orchestrator = &self.config.orchestrator;
        let empty_deadline = Instant::now() + orchestrator.empty_server_timeout();

        loop {
            sleep(orchestrator.occupancy_poll()).await;
            match self.prober.query().await {
                Ok(status) => {
                    let online = status.online_players.max(0) as u32;
                    self.lifecycle.publish(|s| s.occupancy = Some(online));
                    if online > 0 {
                        if !*seen_players {
                            info!("first players arrived, {online} online");
                        }
                        *seen_players = true;
                    } else if *seen_players {
                        info!("server is empty, starting the drain grace");
                        return;
                    } else if Instant::now() >= empty_deadline {
                        info!("nobody ever joined, tearing back down");
                        return;
                    }
                }
                // a missed probe is not an empty server
                Err(err) => debug!("occupancy probe failed: {err}"),
            }
        }
    }

    /// The rebind back to the responder must land before any stop is issued,
    /// otherwise players would resolve to an instance with nothing on it.
    async fn teardown(&self, instance_id: &str) -> Result<(), CycleError> {
        let address = self.config.instance.public_address;
        let responder_id = self.config.instance.responder_id.clone();

        self.retry("rebind address to responder", || {
            self.control.associate_address(address, &responder_id)
        })
        .await?;
        info!("{address} points back at the responder");

        self.publish_phase(Phase::Stopping);
        self.retry("stop instance", || self.control.stop_instance(instance_id))
            .await?;
        info!("backing instance {instance_id} is stopped");
        Ok(())
    }

    async fn retry<F, Fut>(&self, what: &str, mut op: F) -> Result<(), CycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ControlPlaneError>>,
    {
        let orchestrator = &self.config.orchestrator;
        let attempts = orchestrator.retry_limit.max(1);
        let mut backoff = Backoff::new(orchestrator.backoff(), orchestrator.backoff_max());

        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("{what} succeeded on attempt {attempt}");
                    }
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    let delay = backoff.next_delay();
                    warn!("{what} failed on attempt {attempt}/{attempts}, retrying in {delay:?}: {err}");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(CycleError::ControlPlane {
                        what: what.to_string(),
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    fn publish_phase(&self, phase: Phase) {
        debug!("entering lifecycle phase {phase:?}");
        self.lifecycle.publish(|s| s.phase = phase);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::probe::BackingStatus;

    #[derive(Clone, Default)]
    struct FakeControl {
        calls: Arc<Mutex<Vec<String>>>,
        start_failures: Arc<AtomicU32>,
        rebind_failures: Arc<AtomicU32>,
    }

    impl FakeControl {
        fn failing_starts(failures: u32) -> Self {
            let control = Self::default();
            control.start_failures.store(failures, Ordering::SeqCst);
            control
        }

        fn failing_rebinds(failures: u32) -> Self {
            let control = Self::default();
            control.rebind_failures.store(failures, Ordering::SeqCst);
            control
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControl {
        async fn start_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError> {
            self.calls.lock().push(format!("start {instance_id}"));
            if self.start_failures.load(Ordering::SeqCst) > 0 {
                self.start_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ControlPlaneError::Io(io::Error::other("simulated outage")));
            }
            Ok(())
        }

        async fn stop_instance(&self, instance_id: &str) -> Result<(), ControlPlaneError> {
            self.calls.lock().push(format!("stop {instance_id}"));
            Ok(())
        }

        async fn associate_address(
            &self,
            address: Ipv4Addr,
            instance_id: &str,
        ) -> Result<(), ControlPlaneError> {
            self.calls.lock().push(format!("rebind {address} {instance_id}"));
            if self.rebind_failures.load(Ordering::SeqCst) > 0 {
                self.rebind_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ControlPlaneError::Io(io::Error::other("simulated outage")));
            }
            Ok(())
        }
    }

    /// Pops scripted player counts per query; `None` means not ready. Once
    /// the script runs out, `tail` repeats forever.
    #[derive(Clone)]
    struct FakeProber {
        script: Arc<Mutex<VecDeque<Option<i32>>>>,
        tail: Option<i32>,
    }

    impl FakeProber {
        fn scripted(entries: &[Option<i32>], tail: Option<i32>) -> Self {
            Self {
                script: Arc::new(Mutex::new(entries.iter().copied().collect())),
                tail,
            }
        }
    }

    #[async_trait]
    impl StatusProber for FakeProber {
        async fn query(&self) -> Result<BackingStatus, ProbeError> {
            let next = self.script.lock().pop_front().unwrap_or(self.tail);
            match next {
                Some(online) => Ok(BackingStatus {
                    online_players: online,
                    max_players: 20,
                    protocol_version: Some(756),
                }),
                None => Err(ProbeError::NotReady(io::Error::other("connection refused"))),
            }
        }
    }

    /// Millisecond-scale timings so whole cycles run in a few dozen millis.
    fn test_config() -> Config {
        toml::from_str(
            r#"
            [instance]
            id = "i-mc"
            responder_id = "i-responder"
            public_address = "203.0.113.9"

            [probe]
            addr = "127.0.0.1"
            port = 25565

            [control]
            start_command = "true"
            stop_command = "true"
            rebind_command = "true"

            [orchestrator]
            retry_limit = 4
            backoff_millis = 1
            backoff_max_millis = 2
            ready_poll_millis = 1
            ready_timeout_secs = 1
            occupancy_poll_millis = 1
            empty_server_timeout_secs = 60
            drain_grace_secs = 0
            "#,
        )
        .unwrap()
    }

    fn attempt(name: &str) -> LoginAttempt {
        LoginAttempt {
            player_name: name.to_string(),
            source: "198.51.100.7:50000".parse().unwrap(),
        }
    }

    async fn wait_for(what: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if what() {
                    return;
                }
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("lifecycle never reached the expected state");
    }

    fn spawn_driver(
        config: &Arc<Config>,
        control: &FakeControl,
        prober: &FakeProber,
    ) -> Lifecycle {
        let (lifecycle, trigger_rx) = Lifecycle::new(config);
        let driver = Driver::new(
            lifecycle.clone(),
            trigger_rx,
            control.clone(),
            prober.clone(),
            config.clone(),
        );
        tokio::spawn(driver.run());
        lifecycle
    }

    #[test]
    fn test_backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        let third = backoff.next_delay();
        assert!(first < second && second < third);

        let cap = Duration::from_secs(60).mul_f64(1.125);
        for _ in 0..10 {
            assert!(backoff.next_delay() <= cap);
        }
    }

    #[tokio::test]
    async fn test_full_cycle_runs_in_order() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        // not ready twice, then up with a player, then everyone leaves
        let prober = FakeProber::scripted(&[None, None, Some(1), Some(0)], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            control.calls().len() == 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        assert_eq!(
            control.calls(),
            [
                "start i-mc",
                "rebind 203.0.113.9 i-mc",
                "rebind 203.0.113.9 i-responder",
                "stop i-mc",
            ]
        );
        let snapshot = lifecycle.snapshot();
        assert_eq!(snapshot.fault, None);
        assert_eq!(snapshot.occupancy, None);
    }

    #[tokio::test]
    async fn test_logins_mid_cycle_are_absorbed() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        // a long stretch of not-ready polls keeps the cycle open while the
        // extra logins come in
        let mut script = vec![None; 40];
        script.extend([Some(1), Some(0)]);
        let prober = FakeProber::scripted(&script, Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| lifecycle.snapshot().phase != Phase::Stopped).await;
        lifecycle.notify_login(attempt("Bob"));
        lifecycle.notify_login(attempt("Carol"));
        wait_for(|| {
            control.calls().len() >= 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        let starts = control
            .calls()
            .iter()
            .filter(|call| call.starts_with("start"))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_trigger_queue_holds_exactly_one() {
        let config = Arc::new(test_config());
        let (lifecycle, mut trigger_rx) = Lifecycle::new(&config);

        lifecycle.notify_login(attempt("Alice"));
        lifecycle.notify_login(attempt("Bob"));

        assert_eq!(trigger_rx.try_recv().unwrap().player_name, "Alice");
        assert!(trigger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_start_failures_are_retried() {
        let config = Arc::new(test_config());
        let control = FakeControl::failing_starts(2);
        let prober = FakeProber::scripted(&[Some(1), Some(0)], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            lifecycle.snapshot().phase == Phase::Stopped
                && control.calls().last().is_some_and(|call| call == "stop i-mc")
        })
        .await;

        let calls = control.calls();
        assert_eq!(
            calls.iter().filter(|call| *call == "start i-mc").count(),
            3
        );
        assert_eq!(lifecycle.snapshot().fault, None);
    }

    #[tokio::test]
    async fn test_start_gives_up_after_the_retry_limit() {
        let mut config = test_config();
        config.orchestrator.retry_limit = 2;
        let config = Arc::new(config);
        let control = FakeControl::failing_starts(10);
        let prober = FakeProber::scripted(&[], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            let snapshot = lifecycle.snapshot();
            snapshot.phase == Phase::Stopped && snapshot.fault.is_some()
        })
        .await;

        // never started, so nothing to rebind or stop
        assert_eq!(control.calls(), ["start i-mc", "start i-mc"]);
        let fault = lifecycle.snapshot().fault.clone().unwrap();
        assert!(fault.contains("start instance"), "fault was: {fault}");
    }

    #[tokio::test]
    async fn test_unready_server_is_put_back_to_sleep() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        let prober = FakeProber::scripted(&[], None);
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            let snapshot = lifecycle.snapshot();
            snapshot.phase == Phase::Stopped && snapshot.fault.is_some()
        })
        .await;

        // started and rebound, then unwound in the right order anyway
        assert_eq!(
            control.calls(),
            [
                "start i-mc",
                "rebind 203.0.113.9 i-mc",
                "rebind 203.0.113.9 i-responder",
                "stop i-mc",
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_withheld_when_rebind_back_fails() {
        let mut config = test_config();
        config.orchestrator.retry_limit = 2;
        let config = Arc::new(config);
        let control = FakeControl::failing_rebinds(10);
        let prober = FakeProber::scripted(&[], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            let snapshot = lifecycle.snapshot();
            snapshot.phase == Phase::Stopped && snapshot.fault.is_some()
        })
        .await;

        // with the rebind back to the responder exhausted, stopping now would
        // point the address at a dead instance, so no stop may be issued
        assert_eq!(
            control.calls(),
            [
                "start i-mc",
                "rebind 203.0.113.9 i-mc",
                "rebind 203.0.113.9 i-mc",
                "rebind 203.0.113.9 i-responder",
                "rebind 203.0.113.9 i-responder",
            ]
        );
        let fault = lifecycle.snapshot().fault.clone().unwrap();
        assert!(
            fault.contains("rebind address to responder"),
            "fault was: {fault}"
        );
    }

    #[tokio::test]
    async fn test_empty_server_times_out() {
        let mut config = test_config();
        config.orchestrator.empty_server_timeout_secs = 0;
        let config = Arc::new(config);
        let control = FakeControl::default();
        // comes up fine, nobody ever joins
        let prober = FakeProber::scripted(&[], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            control.calls().len() == 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        assert_eq!(lifecycle.snapshot().fault, None);
        assert_eq!(control.calls().last().unwrap(), "stop i-mc");
    }

    #[tokio::test]
    async fn test_drain_recheck_catches_returning_players() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        // up with 1 player, empty, back to 2 at the drain recheck, empty again
        let prober = FakeProber::scripted(&[Some(1), Some(0), Some(2), Some(0), Some(0)], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            control.calls().len() == 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        // the whole script got consumed, so the drain really did loop back
        assert!(prober.script.lock().is_empty());
        assert_eq!(control.calls().last().unwrap(), "stop i-mc");
        assert_eq!(lifecycle.snapshot().fault, None);
    }

    #[tokio::test]
    async fn test_failed_polls_while_active_do_not_drain() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        // up with a player, then a flaky stretch, then genuinely empty
        let prober = FakeProber::scripted(&[Some(1), None, None, None, Some(0)], Some(0));
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            control.calls().len() == 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        // every failed poll was ridden out in place; had one been read as an
        // empty server, the drain recheck would have eaten the script early
        assert!(prober.script.lock().is_empty());
        assert_eq!(control.calls().last().unwrap(), "stop i-mc");
        assert_eq!(lifecycle.snapshot().fault, None);
    }

    #[tokio::test]
    async fn test_failed_drain_recheck_still_tears_down() {
        let config = Arc::new(test_config());
        let control = FakeControl::default();
        // the server stops answering right after it empties out
        let prober = FakeProber::scripted(&[Some(1), Some(0)], None);
        let lifecycle = spawn_driver(&config, &control, &prober);

        lifecycle.notify_login(attempt("Alice"));
        wait_for(|| {
            control.calls().len() == 4 && lifecycle.snapshot().phase == Phase::Stopped
        })
        .await;

        assert_eq!(control.calls().last().unwrap(), "stop i-mc");
        assert_eq!(lifecycle.snapshot().fault, None);
    }
}
