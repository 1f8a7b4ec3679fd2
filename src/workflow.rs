//! Release workflow: locate builds, wait for them, submit them.
//!
//! The public beta group is resolved first because nothing downstream can
//! proceed without it. Targeted runs poll one version until both platform
//! tracks are ready or the deadline lapses; latest runs take the newest
//! already-valid build per platform in a single look.
use crate::api::AppStoreApi;
use crate::locator::BuildLocator;
use crate::model::Platform;
use crate::pipeline::{PipelineReport, SubmissionPipeline};
use crate::poller::{BuildQuery, Clock, PollSettings, ReadinessPoller, Track, Tracks};
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Targeted { version: String },
    Latest { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    FullSuccess,
    PartialSuccess,
    Failure,
}

impl RunStatus {
    fn from_success_count(count: usize) -> Self {
        match count {
            0 => RunStatus::Failure,
            n if n >= Platform::TRACKED.len() => RunStatus::FullSuccess,
            _ => RunStatus::PartialSuccess,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackResolution {
    NotReady,
    Processed(PipelineReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReport {
    pub platform: Platform,
    pub resolution: TrackResolution,
}

impl TrackReport {
    /// A track counts once its build reached the review step.
    fn succeeded(&self) -> bool {
        matches!(self.resolution, TrackResolution::Processed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: Mode,
    pub group_name: String,
    pub tracks: Vec<TrackReport>,
    pub status: RunStatus,
    pub deadline_hit: bool,
    pub waited: Duration,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.tracks.iter().filter(|track| track.succeeded()).count()
    }

    /// 0 on full success, 1 on failure. Partial success is fine in latest
    /// mode but exits 2 in targeted mode, where both platforms were asked for.
    pub fn exit_code(&self) -> u8 {
        match (self.status, &self.mode) {
            (RunStatus::FullSuccess, _) => 0,
            (RunStatus::PartialSuccess, Mode::Latest { .. }) => 0,
            (RunStatus::PartialSuccess, Mode::Targeted { .. }) => 2,
            (RunStatus::Failure, _) => 1,
        }
    }

    pub fn unresolved(&self) -> Vec<&Platform> {
        self.tracks
            .iter()
            .filter(|track| !track.succeeded())
            .map(|track| &track.platform)
            .collect()
    }

    /// Human summary with remaining manual steps.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let headline = match self.status {
            RunStatus::FullSuccess => "TESTFLIGHT RELEASE COMPLETE",
            RunStatus::PartialSuccess => "TESTFLIGHT RELEASE PARTIALLY COMPLETE",
            RunStatus::Failure => "TESTFLIGHT RELEASE FAILED",
        };
        let _ = writeln!(
            out,
            "{headline} ({}/{} platforms processed, group: {})",
            self.success_count(),
            self.tracks.len(),
            self.group_name
        );
        for track in &self.tracks {
            let line = match &track.resolution {
                TrackResolution::Processed(report) => {
                    let steps: Vec<String> = report
                        .steps()
                        .iter()
                        .map(|(step, outcome)| format!("{}: {outcome}", step.as_str()))
                        .collect();
                    format!(
                        "build {} {} ({})",
                        report.build.version,
                        report.outcome.as_str(),
                        steps.join("; ")
                    )
                }
                TrackResolution::NotReady => self.not_ready_reason(),
            };
            let _ = writeln!(out, "  {}: {line}", track.platform);
        }

        out.push_str("\nNext steps:\n");
        let unresolved = self.unresolved();
        if !unresolved.is_empty() {
            let names: Vec<&str> = unresolved.iter().map(|platform| platform.as_str()).collect();
            let rerun = match &self.mode {
                Mode::Targeted { version } => format!("tfpilot submit {version}"),
                Mode::Latest { .. } => "tfpilot submit".to_string(),
            };
            let _ = writeln!(
                out,
                "  - Not processed: {}. Re-run `{rerun}` once processing finishes, or finish in App Store Connect.",
                names.join(", ")
            );
        }
        if self.success_count() > 0 {
            out.push_str("  - Wait for beta app review (usually 1-24 hours).\n");
        }
        out.push_str("  - Check TestFlight status at https://appstoreconnect.apple.com/\n");
        out
    }

    fn not_ready_reason(&self) -> String {
        match &self.mode {
            Mode::Targeted { version } if self.deadline_hit => format!(
                "not ready (no VALID build for {version} after {}m)",
                self.waited.as_secs() / 60
            ),
            Mode::Targeted { version } => format!("not ready (no VALID build for {version})"),
            Mode::Latest { limit } => {
                format!("not ready (no VALID build among the {limit} most recent)")
            }
        }
    }
}

/// Drives one release run against `api`.
pub struct ReleaseWorkflow<'a, A: ?Sized, C> {
    api: &'a A,
    clock: &'a C,
    app_id: &'a str,
    settings: PollSettings,
}

impl<'a, A: AppStoreApi + ?Sized, C: Clock> ReleaseWorkflow<'a, A, C> {
    pub fn new(api: &'a A, clock: &'a C, app_id: &'a str, settings: PollSettings) -> Self {
        Self {
            api,
            clock,
            app_id,
            settings,
        }
    }

    /// Errors only for hard preconditions; everything else lands in the report.
    pub fn run(&self, mode: Mode) -> Result<RunReport> {
        let locator = BuildLocator::new(self.api, self.app_id);

        println!("Resolving public beta group...");
        let group = locator
            .find_public_beta_group()
            .context("resolve public beta group")?
            .ok_or_else(|| {
                anyhow!(
                    "no public beta group found for app {}; enable a public link on a TestFlight group \
                     (run `tfpilot groups` to list them)",
                    self.app_id
                )
            })?;
        println!("Using beta group {} ({})", group.name, group.id);
        tracing::info!(group_id = %group.id, group = %group.name, "public beta group resolved");

        let poller = ReadinessPoller::new(&locator, self.clock, self.settings);
        let (tracks, deadline_hit, waited) = match &mode {
            Mode::Targeted { version } => {
                println!(
                    "Waiting for version {version} to finish processing (every {}s, up to {}m)...",
                    self.settings.interval.as_secs(),
                    self.settings.max_wait.as_secs() / 60
                );
                let outcome = poller.wait_until_ready(&BuildQuery::Version(version.clone()));
                (outcome.tracks, outcome.deadline_hit, outcome.elapsed)
            }
            Mode::Latest { limit } => {
                println!("Looking for the latest VALID builds...");
                let tracks = poller
                    .observe_once(&BuildQuery::Latest { limit: *limit })
                    .context("list recent builds")?;
                (tracks, false, Duration::ZERO)
            }
        };

        let pipeline = SubmissionPipeline::new(self.api, &group);
        let reports = process_tracks(&tracks, &pipeline);
        let success_count = reports.iter().filter(|track| track.succeeded()).count();
        let status = RunStatus::from_success_count(success_count);
        tracing::info!(success_count, ?status, "release run finished");

        Ok(RunReport {
            mode,
            group_name: group.name,
            tracks: reports,
            status,
            deadline_hit,
            waited,
        })
    }
}

fn process_tracks<A: AppStoreApi + ?Sized>(
    tracks: &Tracks,
    pipeline: &SubmissionPipeline<'_, A>,
) -> Vec<TrackReport> {
    Platform::TRACKED
        .iter()
        .map(|platform| {
            let resolution = match tracks.track(platform) {
                Some(Track::Ready(build)) => TrackResolution::Processed(pipeline.run(build)),
                _ => TrackResolution::NotReady,
            };
            TrackReport {
                platform: platform.clone(),
                resolution,
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
