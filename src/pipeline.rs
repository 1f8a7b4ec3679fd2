//! Per-build submission: compliance, group enrollment, beta review.
//!
//! The vendor API has no idempotency keys and no way to ask whether a build
//! was already enrolled or submitted, so every step is attempted and its
//! failure is classified by the vendor error code in the response body.
//! Known "already done" codes count as satisfied; anything else is a warning
//! and the pipeline moves on to the next step regardless.
use crate::api::{ApiFailure, AppStoreApi};
use crate::model::{BetaGroup, Build};
use serde_json::{json, Value};
use std::fmt;

/// Vendor conditions the pipeline knows how to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorCondition {
    /// The attribute was already declared and cannot be changed.
    AttributeAlreadySet,
    /// The build is already a member of the group.
    RelationshipExists,
    /// The build is still being processed on the vendor side.
    InvalidState,
    /// The build already has an active review or testing relationship.
    RelationshipInvalid,
    Unknown,
}

/// Known vendor error markers, matched case-insensitively against the raw
/// response body. First match wins.
const KNOWN_VENDOR_ERRORS: &[(&str, VendorCondition)] = &[
    ("RELATIONSHIP_EXISTS", VendorCondition::RelationshipExists),
    ("relationship already exists", VendorCondition::RelationshipExists),
    ("ENTITY_ERROR.RELATIONSHIP.INVALID", VendorCondition::RelationshipInvalid),
    ("INVALID_QC_STATE", VendorCondition::InvalidState),
    ("STATE_ERROR", VendorCondition::InvalidState),
    ("ALREADY_SET", VendorCondition::AttributeAlreadySet),
    ("already been set", VendorCondition::AttributeAlreadySet),
    ("already set", VendorCondition::AttributeAlreadySet),
];

impl VendorCondition {
    pub fn classify(body: &str) -> Self {
        let haystack = body.to_ascii_lowercase();
        KNOWN_VENDOR_ERRORS
            .iter()
            .find(|(marker, _)| haystack.contains(&marker.to_ascii_lowercase()))
            .map(|(_, condition)| *condition)
            .unwrap_or(VendorCondition::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorCondition::AttributeAlreadySet => "attribute already set",
            VendorCondition::RelationshipExists => "relationship already exists",
            VendorCondition::InvalidState => "build still processing",
            VendorCondition::RelationshipInvalid => "build already in review or testing",
            VendorCondition::Unknown => "unknown error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Compliance,
    Enrollment,
    Review,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Compliance => "export compliance",
            Step::Enrollment => "public group enrollment",
            Step::Review => "beta review submission",
        }
    }

    /// Whether `condition` means this step's effect is already in place.
    pub fn treats_as_done(&self, condition: VendorCondition) -> bool {
        matches!(
            (self, condition),
            (Step::Compliance, VendorCondition::AttributeAlreadySet)
                | (Step::Enrollment, VendorCondition::RelationshipExists)
                | (
                    Step::Review,
                    VendorCondition::InvalidState
                        | VendorCondition::RelationshipInvalid
                        | VendorCondition::RelationshipExists
                )
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// Nothing to do: skipped up front (`condition: None`) or the vendor
    /// reported the effect as already present.
    AlreadySatisfied { condition: Option<VendorCondition> },
    Warning(ApiFailure),
}

impl StepOutcome {
    fn from_reply(step: Step, reply: Result<Option<Value>, ApiFailure>) -> Self {
        match reply {
            Ok(_) => StepOutcome::Done,
            Err(failure) => {
                let condition = VendorCondition::classify(&failure.body);
                if step.treats_as_done(condition) {
                    StepOutcome::AlreadySatisfied {
                        condition: Some(condition),
                    }
                } else {
                    StepOutcome::Warning(failure)
                }
            }
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, StepOutcome::Warning(_))
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Done => f.write_str("done"),
            StepOutcome::AlreadySatisfied { condition: None } => f.write_str("already set"),
            StepOutcome::AlreadySatisfied {
                condition: Some(condition),
            } => write!(f, "already satisfied ({})", condition.as_str()),
            StepOutcome::Warning(failure) => write!(f, "warning: {failure}"),
        }
    }
}

/// Per-build result used for the run tally.
///
/// Reaching the review step counts as completion whatever the review call
/// returned; a failed review request is a warning on the step, not a
/// failed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Submitted,
    AlreadySubmitted,
}

impl SubmissionOutcome {
    fn from_review(review: &StepOutcome) -> Self {
        match review {
            StepOutcome::AlreadySatisfied { .. } => SubmissionOutcome::AlreadySubmitted,
            StepOutcome::Done | StepOutcome::Warning(_) => SubmissionOutcome::Submitted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionOutcome::Submitted => "submitted",
            SubmissionOutcome::AlreadySubmitted => "already submitted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub build: Build,
    pub compliance: StepOutcome,
    pub enrollment: StepOutcome,
    pub review: StepOutcome,
    pub outcome: SubmissionOutcome,
}

impl PipelineReport {
    pub fn steps(&self) -> [(Step, &StepOutcome); 3] {
        [
            (Step::Compliance, &self.compliance),
            (Step::Enrollment, &self.enrollment),
            (Step::Review, &self.review),
        ]
    }
}

/// Carries ready builds into the public beta group and beta review.
pub struct SubmissionPipeline<'a, A: ?Sized> {
    api: &'a A,
    group: &'a BetaGroup,
}

impl<'a, A: AppStoreApi + ?Sized> SubmissionPipeline<'a, A> {
    pub fn new(api: &'a A, group: &'a BetaGroup) -> Self {
        Self { api, group }
    }

    /// Run all three steps in order. No step failure stops the next one.
    pub fn run(&self, build: &Build) -> PipelineReport {
        println!("Processing build {}...", build.label());
        let compliance = self.declare_compliance(build);
        self.narrate(build, Step::Compliance, &compliance);
        let enrollment = self.enroll(build);
        self.narrate(build, Step::Enrollment, &enrollment);
        let review = self.submit_for_review(build);
        self.narrate(build, Step::Review, &review);
        let outcome = SubmissionOutcome::from_review(&review);
        PipelineReport {
            build: build.clone(),
            compliance,
            enrollment,
            review,
            outcome,
        }
    }

    /// The app only uses exempt encryption (standard HTTPS), so the
    /// declaration is always `false`.
    fn declare_compliance(&self, build: &Build) -> StepOutcome {
        if build.uses_non_exempt_encryption.is_some() {
            return StepOutcome::AlreadySatisfied { condition: None };
        }
        let body = json!({
            "data": {
                "type": "builds",
                "id": build.id,
                "attributes": { "usesNonExemptEncryption": false }
            }
        });
        let reply = self.api.patch(&format!("/v1/builds/{}", build.id), &body);
        StepOutcome::from_reply(Step::Compliance, reply)
    }

    fn enroll(&self, build: &Build) -> StepOutcome {
        let body = json!({ "data": [{ "type": "builds", "id": build.id }] });
        let path = format!("/v1/betaGroups/{}/relationships/builds", self.group.id);
        StepOutcome::from_reply(Step::Enrollment, self.api.post(&path, &body))
    }

    fn submit_for_review(&self, build: &Build) -> StepOutcome {
        let body = json!({
            "data": {
                "type": "betaAppReviewSubmissions",
                "relationships": {
                    "build": { "data": { "type": "builds", "id": build.id } }
                }
            }
        });
        StepOutcome::from_reply(
            Step::Review,
            self.api.post("/v1/betaAppReviewSubmissions", &body),
        )
    }

    fn narrate(&self, build: &Build, step: Step, outcome: &StepOutcome) {
        let marker = if outcome.is_warning() { "!" } else { "ok" };
        println!("  [{marker}] {}: {outcome}", step.as_str());
        if let StepOutcome::Warning(failure) = outcome {
            tracing::warn!(
                build_id = %build.id,
                platform = %build.platform,
                step = step.as_str(),
                status = failure.status,
                transport = failure.is_transport(),
                body = %failure.body,
                "step failed with an unrecognized error; continuing"
            );
        } else {
            tracing::debug!(
                build_id = %build.id,
                step = step.as_str(),
                outcome = %outcome,
                "step complete"
            );
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
