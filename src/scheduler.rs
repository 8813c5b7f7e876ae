//! Retry/invite scheduler.
//!
//! Every tick walks the registry in table order and, per device, decides
//! whether to (re)transmit the queue head, send an invite, or give up on the
//! head. Only the head is ever on the air; it leaves the queue on an ack or a
//! give-up, never on transmission.
//!
//! Data retries use a fixed spacing of `retry_timeout`. Invites back off
//! linearly: attempt `n` waits `n * invite_timeout` after the previous one.
//! An always-listening device that keeps missing data is switched into invite
//! mode after `retries_before_invite` transmissions.
//!
//! Failure notices are collected while the registry is locked and published
//! once it is released.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::device::DeviceId;
use crate::gate::{Command, GateLink};
use crate::logutil::escape_log;
use crate::metrics;
use crate::mqtt::BrokerBridge;
use crate::registry::{DeviceRecord, SharedRegistry};

const STATS_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub retry_timeout: Duration,
    pub max_retries: u32,
    pub invite_timeout: Duration,
    pub max_invite_retries: u32,
    pub retries_before_invite: u32,
    /// `None` disables the keep-alive ping.
    pub ping_interval: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            tick: Duration::from_millis(cfg.tick_ms.max(1)),
            retry_timeout: Duration::from_secs(cfg.retry_timeout_secs),
            max_retries: cfg.max_retries,
            invite_timeout: Duration::from_secs(cfg.invite_timeout_secs),
            max_invite_retries: cfg.max_invite_retries,
            retries_before_invite: cfg.retries_before_invite,
            ping_interval: (cfg.ping_interval_secs > 0)
                .then(|| Duration::from_secs(cfg.ping_interval_secs)),
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub transmitted: usize,
    pub invites: usize,
    pub gave_up: usize,
}

struct Failure {
    id: DeviceId,
    entry: String,
    message: String,
}

pub struct Scheduler {
    registry: SharedRegistry,
    link: GateLink,
    bridge: BrokerBridge,
    settings: SchedulerSettings,
    last_ping: Option<Instant>,
    last_stats: Instant,
}

/// True when `stamp` is unset or more than `limit` before `now`.
fn older_than(stamp: Option<Instant>, now: Instant, limit: Duration) -> bool {
    match stamp {
        None => true,
        Some(t) => now.saturating_duration_since(t) > limit,
    }
}

/// Linear invite back-off, saturating instead of overflowing.
fn invite_backoff(step: Duration, attempts: u32) -> Duration {
    step.checked_mul(attempts).unwrap_or(Duration::MAX)
}

impl Scheduler {
    pub fn new(
        registry: SharedRegistry,
        link: GateLink,
        bridge: BrokerBridge,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            registry,
            link,
            bridge,
            settings,
            last_ping: None,
            last_stats: Instant::now(),
        }
    }

    pub async fn run(mut self) {
        info!(
            "Scheduler started (tick {:?}, retry {:?} x{}, invite {:?} x{})",
            self.settings.tick,
            self.settings.retry_timeout,
            self.settings.max_retries,
            self.settings.invite_timeout,
            self.settings.max_invite_retries
        );
        let mut interval = tokio::time::interval(self.settings.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(Instant::now());
        }
    }

    /// One pass over the registry as of `now`.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        let mut failures = Vec::new();
        {
            let mut reg = self.registry.lock();
            for rec in reg.iter_mut() {
                self.step(rec, now, &mut report, &mut failures);
            }
        }

        for f in failures {
            warn!("Giving up on {} for {}: {}", escape_log(&f.entry), f.id, f.message);
            let _ = self.bridge.publish_failure(f.id, &f.message, &f.entry);
        }

        self.maybe_ping(now);
        if now.saturating_duration_since(self.last_stats) >= STATS_EVERY {
            self.last_stats = now;
            debug!("Delivery stats: {}", metrics::snapshot());
        }
        report
    }

    fn step(
        &self,
        rec: &mut DeviceRecord,
        now: Instant,
        report: &mut TickReport,
        failures: &mut Vec<Failure>,
    ) {
        let s = &self.settings;
        if !rec.has_queued() {
            return;
        }
        if rec.class.is_on_demand() && !rec.can_send {
            return;
        }

        if rec.class.is_always_listening() && rec.invited {
            if rec.retries > s.max_invite_retries {
                let message = format!("device did not answer {} invites", rec.retries);
                Self::give_up(rec, message, report, failures);
            } else if older_than(
                rec.last_invite,
                now,
                invite_backoff(s.invite_timeout, rec.retries),
            ) {
                match self.link.send(&Command::Invite { id: rec.id }) {
                    Ok(()) => {
                        rec.retries += 1;
                        rec.last_invite = Some(now);
                        report.invites += 1;
                        metrics::inc_invites_sent();
                    }
                    Err(e) => warn!("Invite to {} failed: {}", rec.id, e),
                }
            }
            return;
        }

        if !older_than(rec.last_send, now, s.retry_timeout) {
            return;
        }
        if rec.retries > s.max_retries {
            let message = format!("no acknowledgement after {} attempts", rec.retries);
            Self::give_up(rec, message, report, failures);
            return;
        }

        let Some(head) = rec.peek_head().map(str::to_string) else {
            return;
        };
        if let Err(e) = self.link.send_line(&head) {
            warn!("Transmit to {} failed: {}", rec.id, e);
            return;
        }
        if rec.retries > 0 {
            metrics::inc_frame_retries();
        }
        metrics::inc_frames_sent();
        report.transmitted += 1;
        rec.retries += 1;
        rec.last_send = Some(now);
        rec.can_send = false;

        if rec.class.is_always_listening() && rec.retries >= s.retries_before_invite {
            debug!("{} missed {} transmissions, switching to invites", rec.id, rec.retries);
            rec.retries = 1;
            rec.invited = true;
            rec.last_invite = Some(now);
        }
    }

    fn give_up(
        rec: &mut DeviceRecord,
        message: String,
        report: &mut TickReport,
        failures: &mut Vec<Failure>,
    ) {
        if let Some(entry) = rec.pop_head() {
            failures.push(Failure {
                id: rec.id,
                entry,
                message,
            });
        }
        rec.retries = 0;
        report.gave_up += 1;
        metrics::inc_give_ups();
    }

    fn maybe_ping(&mut self, now: Instant) {
        let Some(every) = self.settings.ping_interval else {
            return;
        };
        let due = match self.last_ping {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= every,
        };
        if due {
            self.last_ping = Some(now);
            if let Err(e) = self.link.send(&Command::Ping) {
                warn!("Ping to gate failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceClass;
    use crate::mqtt::TopicScheme;
    use crate::testing::{MemoryPort, RecordingPublisher};
    use rumqttc::QoS;
    use std::sync::Arc;

    const DEV: DeviceId = DeviceId(0x1122334455667788);

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_millis(100),
            retry_timeout: Duration::from_secs(10),
            max_retries: 3,
            invite_timeout: Duration::from_secs(15),
            max_invite_retries: 5,
            retries_before_invite: 2,
            ping_interval: None,
        }
    }

    fn scheduler(
        settings: SchedulerSettings,
    ) -> (Scheduler, SharedRegistry, MemoryPort, RecordingPublisher) {
        let port = MemoryPort::new();
        let registry = SharedRegistry::new(4);
        let published = RecordingPublisher::new();
        let bridge = BrokerBridge::new(
            Arc::new(published.clone()),
            TopicScheme::default(),
            QoS::AtMostOnce,
            false,
        );
        let sched = Scheduler::new(
            registry.clone(),
            GateLink::new(Box::new(port.clone())),
            bridge,
            settings,
        );
        (sched, registry, port, published)
    }

    #[test]
    fn older_than_treats_none_as_ancient() {
        let now = Instant::now();
        assert!(older_than(None, now, Duration::from_secs(1000)));
        assert!(!older_than(Some(now), now, Duration::ZERO));
        assert!(older_than(Some(now), now + Duration::from_secs(2), Duration::from_secs(1)));
    }

    #[test]
    fn class_b_gives_up_after_max_retries_plus_one() {
        let (mut sched, registry, port, published) = scheduler(settings());
        registry.lock().upsert(DEV, DeviceClass::B, true).unwrap();
        registry.lock().enqueue(DEV, "I11223344556677880400".into()).unwrap();

        let t0 = Instant::now();
        let step = Duration::from_secs(11);
        let mut sends = 0;
        let mut gave_up = 0;
        for i in 0..10 {
            let r = sched.tick(t0 + step * i);
            sends += r.transmitted;
            gave_up += r.gave_up;
        }
        assert_eq!(sends, 4);
        assert_eq!(gave_up, 1);
        assert_eq!(port.sent_lines().len(), 4);
        let reg = registry.lock();
        let rec = reg.find(DEV).unwrap();
        assert!(!rec.has_queued());
        assert_eq!(rec.retries, 0);
        let errors = published.on_topic("devices/lora/1122334455667788/error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].json().unwrap()["data"]["command"], "I11223344556677880400");
    }

    #[test]
    fn retransmission_waits_for_retry_timeout() {
        let (mut sched, registry, port, _) = scheduler(settings());
        registry.lock().upsert(DEV, DeviceClass::B, true).unwrap();
        registry.lock().enqueue(DEV, "x".into()).unwrap();
        let t0 = Instant::now();
        assert_eq!(sched.tick(t0).transmitted, 1);
        assert_eq!(sched.tick(t0 + Duration::from_secs(5)).transmitted, 0);
        assert_eq!(sched.tick(t0 + Duration::from_secs(10)).transmitted, 0);
        assert_eq!(sched.tick(t0 + Duration::from_millis(10_001)).transmitted, 1);
        assert_eq!(port.sent_lines(), vec!["x", "x"]);
    }

    #[test]
    fn unknown_device_is_invited_with_linear_backoff() {
        let (mut sched, registry, port, published) = scheduler(settings());
        registry.lock().enqueue(DEV, "I1122334455667788010203".into()).unwrap();

        let t0 = Instant::now();
        let mut at = t0;
        let mut invite_times = Vec::new();
        for _ in 0..2000 {
            let r = sched.tick(at);
            if r.invites > 0 {
                invite_times.push(at.duration_since(t0).as_secs());
            }
            if r.gave_up > 0 {
                break;
            }
            at += Duration::from_secs(1);
        }
        // First invite immediately, then gaps of 15, 30, 45, 60, 75 (+1 tick).
        assert_eq!(invite_times, vec![0, 16, 47, 93, 154, 230]);
        assert!(port.sent_lines().iter().all(|l| l == "V1122334455667788"));
        assert_eq!(published.messages().len(), 1);
        assert!(!registry.lock().find(DEV).unwrap().has_queued());
    }

    #[test]
    fn always_listening_switches_to_invites_after_missed_data() {
        let (mut sched, registry, port, _) = scheduler(settings());
        registry.lock().upsert(DEV, DeviceClass::C, true).unwrap();
        registry.lock().enqueue(DEV, "D".into()).unwrap();

        let t0 = Instant::now();
        sched.tick(t0);
        sched.tick(t0 + Duration::from_secs(11));
        {
            let reg = registry.lock();
            let rec = reg.find(DEV).unwrap();
            assert!(rec.invited);
            assert_eq!(rec.retries, 1);
            assert_eq!(rec.last_invite, Some(t0 + Duration::from_secs(11)));
        }
        // Next invite after 1 * invite_timeout.
        assert_eq!(sched.tick(t0 + Duration::from_secs(26)).invites, 0);
        assert_eq!(sched.tick(t0 + Duration::from_secs(27)).invites, 1);
        assert_eq!(port.sent_lines(), vec!["D", "D", "V1122334455667788"]);
    }

    #[test]
    fn huge_invite_timeout_saturates() {
        assert_eq!(invite_backoff(Duration::MAX, 3), Duration::MAX);
        assert_eq!(invite_backoff(Duration::from_secs(15), 3), Duration::from_secs(45));

        let mut s = settings();
        s.invite_timeout = Duration::from_secs(u64::MAX);
        let (mut sched, registry, port, _) = scheduler(s);
        registry.lock().enqueue(DEV, "x".into()).unwrap();
        let t0 = Instant::now();
        {
            let mut reg = registry.lock();
            let rec = reg.find_mut(DEV).unwrap();
            rec.retries = 3;
            rec.last_invite = Some(t0);
        }
        assert_eq!(sched.tick(t0 + Duration::from_secs(3600)), TickReport::default());
        assert!(port.sent_lines().is_empty());
    }

    #[test]
    fn on_demand_needs_permission_per_transmission() {
        let (mut sched, registry, port, _) = scheduler(settings());
        registry.lock().upsert(DEV, DeviceClass::A, true).unwrap();
        registry.lock().enqueue(DEV, "a1".into()).unwrap();

        let t0 = Instant::now();
        assert_eq!(sched.tick(t0).transmitted, 0);
        registry.lock().find_mut(DEV).unwrap().can_send = true;
        assert_eq!(sched.tick(t0).transmitted, 1);
        assert!(!registry.lock().find(DEV).unwrap().can_send);
        assert_eq!(sched.tick(t0 + Duration::from_secs(60)).transmitted, 0);
        assert_eq!(port.sent_lines(), vec!["a1"]);
    }

    #[test]
    fn ping_follows_interval() {
        let mut s = settings();
        s.ping_interval = Some(Duration::from_secs(60));
        let (mut sched, _, port, _) = scheduler(s);
        let t0 = Instant::now();
        sched.tick(t0);
        sched.tick(t0 + Duration::from_secs(30));
        sched.tick(t0 + Duration::from_secs(60));
        assert_eq!(port.sent_lines(), vec!["P", "P"]);
    }

    #[test]
    fn settings_from_config() {
        let mut cfg = SchedulerConfig::default();
        cfg.ping_interval_secs = 0;
        let s = SchedulerSettings::from(&cfg);
        assert_eq!(s.ping_interval, None);
        assert_eq!(s.retry_timeout, Duration::from_secs(cfg.retry_timeout_secs));
    }
}
