//! Waiting for uploaded builds to finish vendor-side processing.
//!
//! Each tracked platform is an independent track that starts out waiting and
//! latches the first `VALID` build it sees. One query returns every platform,
//! so a single loop drives both tracks; the loop ends when both are ready or
//! the deadline passes, whichever comes first.
use crate::api::AppStoreApi;
use crate::locator::BuildLocator;
use crate::model::{Build, Platform};
use anyhow::Result;
use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);
/// Upper bound on a single wait, whatever the settings ask for.
pub const MAX_WAIT_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Consecutive failed queries stretch the interval up to this factor.
const MAX_BACKOFF_FACTOR: u32 = 4;

/// Time source for the polling loop, swappable in tests.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

/// Which builds a tick looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildQuery {
    Version(String),
    Latest { limit: usize },
}

impl BuildQuery {
    fn fetch<A: AppStoreApi + ?Sized>(&self, locator: &BuildLocator<'_, A>) -> Result<Vec<Build>> {
        match self {
            BuildQuery::Version(version) => locator.list_builds_by_version(version),
            BuildQuery::Latest { limit } => locator.list_recent_builds(*limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Track {
    #[default]
    Waiting,
    Ready(Build),
}

impl Track {
    pub fn is_ready(&self) -> bool {
        matches!(self, Track::Ready(_))
    }

    pub fn build(&self) -> Option<&Build> {
        match self {
            Track::Ready(build) => Some(build),
            Track::Waiting => None,
        }
    }
}

/// Readiness of the iOS and macOS tracks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracks {
    pub ios: Track,
    pub mac_os: Track,
}

impl Tracks {
    pub fn track(&self, platform: &Platform) -> Option<&Track> {
        match platform {
            Platform::Ios => Some(&self.ios),
            Platform::MacOs => Some(&self.mac_os),
            Platform::Other(_) => None,
        }
    }

    fn track_mut(&mut self, platform: &Platform) -> Option<&mut Track> {
        match platform {
            Platform::Ios => Some(&mut self.ios),
            Platform::MacOs => Some(&mut self.mac_os),
            Platform::Other(_) => None,
        }
    }

    /// Promote waiting tracks that have a `VALID` build in `builds`.
    ///
    /// Builds are expected newest first, so the newest valid build wins.
    /// Ready tracks are never touched again. Returns the platforms promoted
    /// by this call.
    pub fn observe(&mut self, builds: &[Build]) -> Vec<Platform> {
        let mut promoted = Vec::new();
        for build in builds {
            if !build.state.is_ready() {
                continue;
            }
            if let Some(track) = self.track_mut(&build.platform) {
                if !track.is_ready() {
                    *track = Track::Ready(build.clone());
                    promoted.push(build.platform.clone());
                }
            }
        }
        promoted
    }

    pub fn all_ready(&self) -> bool {
        self.ios.is_ready() && self.mac_os.is_ready()
    }

    pub fn waiting(&self) -> Vec<Platform> {
        Platform::TRACKED
            .iter()
            .filter(|platform| !self.track(platform).is_some_and(Track::is_ready))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub tracks: Tracks,
    pub ticks: u32,
    /// True when polling stopped on the deadline with a track still waiting.
    pub deadline_hit: bool,
    pub elapsed: Duration,
}

/// Blocking poll loop over a [`BuildLocator`].
pub struct ReadinessPoller<'a, A: ?Sized, C> {
    locator: &'a BuildLocator<'a, A>,
    clock: &'a C,
    settings: PollSettings,
}

impl<'a, A: AppStoreApi + ?Sized, C: Clock> ReadinessPoller<'a, A, C> {
    pub fn new(locator: &'a BuildLocator<'a, A>, clock: &'a C, settings: PollSettings) -> Self {
        Self {
            locator,
            clock,
            settings,
        }
    }

    /// Query once and report which tracks that single look resolved.
    pub fn observe_once(&self, query: &BuildQuery) -> Result<Tracks> {
        let builds = query.fetch(self.locator)?;
        let mut tracks = Tracks::default();
        tracks.observe(&builds);
        Ok(tracks)
    }

    /// Poll until both tracks are ready or `max_wait` (capped at
    /// [`MAX_WAIT_LIMIT`]) elapses.
    ///
    /// Sleeps never reach past the deadline, so the loop returns within
    /// `max_wait` plus the duration of one final query.
    pub fn wait_until_ready(&self, query: &BuildQuery) -> PollOutcome {
        let started = self.clock.now();
        let max_wait = self.settings.max_wait.min(MAX_WAIT_LIMIT);
        let deadline = started.checked_add(max_wait).unwrap_or(started);
        let mut tracks = Tracks::default();
        let mut ticks = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            ticks += 1;
            match query.fetch(self.locator) {
                Ok(builds) => {
                    consecutive_failures = 0;
                    for platform in tracks.observe(&builds) {
                        if let Some(build) = tracks.track(&platform).and_then(Track::build) {
                            println!("  {platform} build {} is ready", build.version);
                            tracing::info!(
                                platform = %platform,
                                build_id = %build.id,
                                ticks,
                                "track ready"
                            );
                        }
                    }
                    self.narrate_waiting(&tracks, &builds);
                }
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(ticks, consecutive_failures, error = %err, "build query failed");
                }
            }

            if tracks.all_ready() {
                return self.finish(tracks, ticks, started, false);
            }
            let now = self.clock.now();
            if now >= deadline {
                return self.finish(tracks, ticks, started, true);
            }
            let delay = backoff_delay(self.settings.interval, consecutive_failures)
                .min(deadline.saturating_duration_since(now));
            tracing::debug!(delay_ms = delay.as_millis(), ticks, "sleeping before next poll");
            self.clock.sleep(delay);
        }
    }

    fn narrate_waiting(&self, tracks: &Tracks, builds: &[Build]) {
        for platform in tracks.waiting() {
            let state = builds
                .iter()
                .find(|build| build.platform == platform)
                .map(|build| build.state.to_string())
                .unwrap_or_else(|| "not uploaded yet".to_string());
            println!("  {platform}: waiting ({state})");
        }
    }

    fn finish(&self, tracks: Tracks, ticks: u32, started: Instant, deadline_hit: bool) -> PollOutcome {
        let elapsed = self.clock.now().saturating_duration_since(started);
        tracing::info!(
            ticks,
            elapsed_secs = elapsed.as_secs(),
            deadline_hit,
            "polling finished"
        );
        PollOutcome {
            tracks,
            ticks,
            deadline_hit,
            elapsed,
        }
    }
}

fn backoff_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    let factor = 2u32
        .saturating_pow(consecutive_failures)
        .min(MAX_BACKOFF_FACTOR);
    interval.saturating_mul(factor)
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
