//! Process-wide delivery counters.
//!
//! Counters are plain atomics so the scheduler and the reply processor can
//! bump them without touching the registry lock.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_SENT: AtomicU64 = AtomicU64::new(0);
static FRAMES_ACKED: AtomicU64 = AtomicU64::new(0);
static FRAME_RETRIES: AtomicU64 = AtomicU64::new(0);
static INVITES_SENT: AtomicU64 = AtomicU64::new(0);
static GIVE_UPS: AtomicU64 = AtomicU64::new(0);
static PUBLISHED: AtomicU64 = AtomicU64::new(0);
static PUBLISH_FAILED: AtomicU64 = AtomicU64::new(0);
static LINES_DROPPED: AtomicU64 = AtomicU64::new(0);

/// A queue head went out on the link (first attempt or retry).
pub fn inc_frames_sent() {
    FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_frames_acked() {
    FRAMES_ACKED.fetch_add(1, Ordering::Relaxed);
}

/// A transmission that was not the first attempt for its queue head.
pub fn inc_frame_retries() {
    FRAME_RETRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_invites_sent() {
    INVITES_SENT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_give_ups() {
    GIVE_UPS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_published() {
    PUBLISHED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_publish_failed() {
    PUBLISH_FAILED.fetch_add(1, Ordering::Relaxed);
}

/// A reply line was discarded (oversized, undecodable or unknown tag).
pub fn inc_lines_dropped() {
    LINES_DROPPED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub frames_sent: u64,
    pub frames_acked: u64,
    pub frame_retries: u64,
    pub invites_sent: u64,
    pub give_ups: u64,
    pub published: u64,
    pub publish_failed: u64,
    pub lines_dropped: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_sent: FRAMES_SENT.load(Ordering::Relaxed),
        frames_acked: FRAMES_ACKED.load(Ordering::Relaxed),
        frame_retries: FRAME_RETRIES.load(Ordering::Relaxed),
        invites_sent: INVITES_SENT.load(Ordering::Relaxed),
        give_ups: GIVE_UPS.load(Ordering::Relaxed),
        published: PUBLISHED.load(Ordering::Relaxed),
        publish_failed: PUBLISH_FAILED.load(Ordering::Relaxed),
        lines_dropped: LINES_DROPPED.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent={} acked={} retries={} invites={} give_ups={} published={} publish_failed={} dropped_lines={}",
            self.frames_sent,
            self.frames_acked,
            self.frame_retries,
            self.invites_sent,
            self.give_ups,
            self.published,
            self.publish_failed,
            self.lines_dropped
        )
    }
}
