//! Core types for fleet deployment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Inputs
// ============================================================================

/// A device to deploy to, as listed by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTarget {
    /// Inventory name (also selects the device's template data)
    pub name: String,
    /// Address the management session connects to
    pub address: String,
}

impl DeviceTarget {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// Configuration document rendered for exactly one device
///
/// The text is opaque to the orchestrator and is never modified after
/// rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    device: String,
    text: String,
}

impl RenderedConfig {
    pub fn new(device: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            text: text.into(),
        }
    }

    /// Name of the device this document was rendered for
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Configuration datastore targeted by lock, push and unlock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datastore {
    #[default]
    Candidate,
    Running,
    Startup,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Running => "running",
            Self::Startup => "startup",
        }
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Datastore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "candidate" => Ok(Self::Candidate),
            "running" => Ok(Self::Running),
            "startup" => Ok(Self::Startup),
            other => Err(format!(
                "unknown datastore '{other}' (expected candidate, running or startup)"
            )),
        }
    }
}

/// Fleet-wide login credentials, shared read-only by every worker
#[derive(Clone, Default)]
pub struct Credentials {
    username: String,
    password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Options for a deployment run
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Datastore to lock, edit and unlock
    pub datastore: Datastore,
    /// Maximum devices in flight at once (0 = one worker per device)
    pub jobs: usize,
    /// Cancel the whole run once this much time has passed
    pub deadline: Option<Duration>,
}

// ============================================================================
// Protocol replies
// ============================================================================

/// One of the four transaction steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Lock,
    Push,
    Commit,
    Unlock,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Lock, Step::Push, Step::Commit, Step::Unlock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Push => "push",
            Self::Commit => "commit",
            Self::Unlock => "unlock",
        }
    }

    /// Name of the protocol operation behind this step
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Push => "edit-config",
            Self::Commit => "commit",
            Self::Unlock => "unlock",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error the device reported inside its reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error tag, e.g. `lock-denied`, `invalid-value`
    pub tag: String,
    /// `error` or `warning`
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RpcError {
    pub fn is_error(&self) -> bool {
        !self.severity.eq_ignore_ascii_case("warning")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.tag, message),
            None => f.write_str(&self.tag),
        }
    }
}

/// Protocol-level reply to a single operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcReply {
    /// Reply exactly as the device sent it
    pub raw: String,
    /// Errors and warnings carried by the reply
    pub errors: Vec<RpcError>,
}

impl RpcReply {
    /// A reply with no errors
    pub fn ok(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            errors: Vec::new(),
        }
    }

    /// A reply carrying the given errors
    pub fn rejected(raw: impl Into<String>, errors: Vec<RpcError>) -> Self {
        Self {
            raw: raw.into(),
            errors,
        }
    }

    /// Whether the operation succeeded (warnings do not count as failure)
    pub fn is_ok(&self) -> bool {
        !self.errors.iter().any(RpcError::is_error)
    }
}

// ============================================================================
// Step results
// ============================================================================

/// Step-specific status of an attempted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepStatus {
    /// The device accepted the operation
    Ok {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<RpcError>,
    },
    /// The device answered with one or more errors
    Rejected { errors: Vec<RpcError> },
    /// No usable answer (timeout, session lost, malformed reply)
    Failed { error: String, timed_out: bool },
}

/// Record of one attempted step
///
/// Steps that were never attempted have no record at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: Step,
    pub success: bool,
    /// Raw reply, or the error text when there was no reply
    pub raw: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

impl StepResult {
    /// Build a result from a reply the device sent back
    pub fn from_reply(step: Step, reply: RpcReply, elapsed: Duration) -> Self {
        let success = reply.is_ok();
        let status = if success {
            StepStatus::Ok {
                warnings: reply.errors,
            }
        } else {
            StepStatus::Rejected {
                errors: reply.errors,
            }
        };

        Self {
            step,
            success,
            raw: reply.raw,
            status,
            elapsed_ms: millis(elapsed),
        }
    }

    /// Build a result for a step that produced no reply
    pub fn from_error(step: Step, error: &crate::error::ProtocolError, elapsed: Duration) -> Self {
        Self {
            step,
            success: false,
            raw: error.to_string(),
            status: StepStatus::Failed {
                error: error.to_string(),
                timed_out: error.is_timeout(),
            },
            elapsed_ms: millis(elapsed),
        }
    }

    /// One-line summary of the status
    pub fn detail(&self) -> String {
        match &self.status {
            StepStatus::Ok { warnings } if warnings.is_empty() => "ok".to_string(),
            StepStatus::Ok { warnings } => format!("ok ({} warning(s))", warnings.len()),
            StepStatus::Rejected { errors } => errors
                .iter()
                .find(|e| e.is_error())
                .map(ToString::to_string)
                .unwrap_or_else(|| "rejected".to_string()),
            StepStatus::Failed { error, .. } => error.clone(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Outcomes
// ============================================================================

/// How bad an outcome is, which decides what the operator has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Configuration is in effect and the device is clean
    Success,
    /// Configuration is in effect but needs manual follow-up
    Warning,
    /// Configuration did not take effect
    Failure,
}

/// Named result of one device's deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Locked, pushed, committed and unlocked
    Committed,
    /// Committed, but the lock could not be released
    CommittedLockHeld,
    /// The configuration could not be rendered
    RenderFailed,
    /// No session could be established
    ConnectFailed,
    /// The datastore lock was refused
    LockFailed,
    /// The configuration push failed; commit was not attempted
    NotApplied,
    /// The push succeeded but the commit failed
    NotCommitted,
    /// The run was cancelled before the transaction completed
    Cancelled,
}

impl Classification {
    /// Classify a transaction from the steps it recorded
    ///
    /// A missing step after a successful one only happens when the run was
    /// cancelled, since unlock is always attempted once lock succeeds.
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let find = |step: Step| steps.iter().find(|r| r.step == step);

        match find(Step::Lock) {
            None => return Self::Cancelled,
            Some(r) if !r.success => return Self::LockFailed,
            Some(_) => {}
        }
        match find(Step::Push) {
            None => return Self::Cancelled,
            Some(r) if !r.success => return Self::NotApplied,
            Some(_) => {}
        }
        match find(Step::Commit) {
            None => return Self::Cancelled,
            Some(r) if !r.success => return Self::NotCommitted,
            Some(_) => {}
        }
        match find(Step::Unlock) {
            Some(r) if r.success => Self::Committed,
            _ => Self::CommittedLockHeld,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Committed => Severity::Success,
            Self::CommittedLockHeld => Severity::Warning,
            _ => Severity::Failure,
        }
    }

    /// Short user-facing description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Committed => "configuration committed",
            Self::CommittedLockHeld => {
                "configuration committed but lock could not be released - device left locked"
            }
            Self::RenderFailed => "configuration could not be rendered",
            Self::ConnectFailed => "session could not be established",
            Self::LockFailed => "datastore lock refused - nothing applied",
            Self::NotApplied => "configuration rejected - not applied",
            Self::NotCommitted => "configuration applied but not committed",
            Self::Cancelled => "deployment cancelled",
        }
    }

    /// Actionable advice for the operator
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Committed => "No action needed",
            Self::CommittedLockHeld => "Release the datastore lock on the device manually",
            Self::RenderFailed => "Fix the template or host vars and deploy again",
            Self::ConnectFailed => "Check reachability and credentials, then deploy again",
            Self::LockFailed => "Another session may hold the lock; deploy again later",
            Self::NotApplied => "Fix the configuration and deploy again",
            Self::NotCommitted => "Check the commit error on the device and deploy again",
            Self::Cancelled => "Deploy again to finish the rollout",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Committed => "committed",
            Self::CommittedLockHeld => "committed-lock-held",
            Self::RenderFailed => "render-failed",
            Self::ConnectFailed => "connect-failed",
            Self::LockFailed => "lock-failed",
            Self::NotApplied => "not-applied",
            Self::NotCommitted => "not-committed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything that happened to one device during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device: DeviceTarget,
    /// Attempted steps, in execution order
    pub steps: Vec<StepResult>,
    pub classification: Classification,
    /// Why the device failed, when it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeviceOutcome {
    /// Outcome of a device that reached the transaction
    pub fn from_steps(device: DeviceTarget, steps: Vec<StepResult>) -> Self {
        let classification = Classification::from_steps(&steps);
        let reason = match classification {
            Classification::Committed => None,
            Classification::Cancelled => Some("run cancelled during the transaction".to_string()),
            _ => steps
                .iter()
                .find(|r| !r.success)
                .map(|r| format!("{} failed: {}", r.step, r.detail())),
        };

        Self {
            device,
            steps,
            classification,
            reason,
        }
    }

    /// Outcome of a device that never reached the transaction
    pub fn short_circuit(
        device: DeviceTarget,
        classification: Classification,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            device,
            steps: Vec::new(),
            classification,
            reason: Some(reason.into()),
        }
    }

    pub fn severity(&self) -> Severity {
        self.classification.severity()
    }

    pub fn is_success(&self) -> bool {
        self.severity() == Severity::Success
    }

    /// Result of a step, if it was attempted
    pub fn step(&self, step: Step) -> Option<&StepResult> {
        self.steps.iter().find(|r| r.step == step)
    }

    fn step_succeeded(&self, step: Step) -> Option<bool> {
        self.step(step).map(|r| r.success)
    }

    /// Did it lock? `None` when not attempted
    pub fn locked(&self) -> Option<bool> {
        self.step_succeeded(Step::Lock)
    }

    /// Did it apply?
    pub fn applied(&self) -> Option<bool> {
        self.step_succeeded(Step::Push)
    }

    /// Did it commit?
    pub fn committed(&self) -> Option<bool> {
        self.step_succeeded(Step::Commit)
    }

    /// Did it unlock?
    pub fn unlocked(&self) -> Option<bool> {
        self.step_succeeded(Step::Unlock)
    }

    /// The lock was granted and not released
    pub fn left_locked(&self) -> bool {
        self.locked() == Some(true) && self.unlocked() != Some(true)
    }
}

/// Counts per severity for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub total: usize,
    pub succeeded: usize,
    pub warnings: usize,
    pub failed: usize,
    pub left_locked: usize,
}

impl FleetSummary {
    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &DeviceOutcome) {
        self.total += 1;
        match outcome.severity() {
            Severity::Success => self.succeeded += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Failure => self.failed += 1,
        }
        if outcome.left_locked() {
            self.left_locked += 1;
        }
    }
}

/// Result of one orchestration run, one outcome per device in inventory order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// The run was cancelled before every device finished
    pub cancelled: bool,
    pub outcomes: Vec<DeviceOutcome>,
}

impl FleetReport {
    pub fn new(
        outcomes: Vec<DeviceOutcome>,
        cancelled: bool,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            started_at,
            elapsed_ms: millis(elapsed),
            cancelled,
            outcomes,
        }
    }

    pub fn summary(&self) -> FleetSummary {
        let mut summary = FleetSummary::default();
        for outcome in &self.outcomes {
            summary.add_outcome(outcome);
        }
        summary
    }

    /// No device ended in a failure-class outcome
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.severity() != Severity::Failure)
    }

    pub fn get(&self, device_name: &str) -> Option<&DeviceOutcome> {
        self.outcomes.iter().find(|o| o.device.name == device_name)
    }

    /// Devices whose lock was granted and never released
    pub fn left_locked(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| o.left_locked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    fn ok(step: Step) -> StepResult {
        StepResult::from_reply(step, RpcReply::ok("<ok/>"), Duration::ZERO)
    }

    fn rejected(step: Step) -> StepResult {
        StepResult::from_reply(
            step,
            RpcReply::rejected(
                "<rpc-error/>",
                vec![RpcError {
                    tag: "operation-failed".into(),
                    severity: "error".into(),
                    message: Some("boom".into()),
                }],
            ),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_classification_full_success() {
        let steps: Vec<_> = Step::ALL.iter().map(|s| ok(*s)).collect();
        assert_eq!(Classification::from_steps(&steps), Classification::Committed);
    }

    #[test]
    fn test_classification_distinguishes_failure_points() {
        assert_eq!(
            Classification::from_steps(&[rejected(Step::Lock)]),
            Classification::LockFailed
        );
        assert_eq!(
            Classification::from_steps(&[ok(Step::Lock), rejected(Step::Push), ok(Step::Unlock)]),
            Classification::NotApplied
        );
        assert_eq!(
            Classification::from_steps(&[
                ok(Step::Lock),
                ok(Step::Push),
                rejected(Step::Commit),
                ok(Step::Unlock)
            ]),
            Classification::NotCommitted
        );
        assert_eq!(
            Classification::from_steps(&[
                ok(Step::Lock),
                ok(Step::Push),
                ok(Step::Commit),
                rejected(Step::Unlock)
            ]),
            Classification::CommittedLockHeld
        );
    }

    #[test]
    fn test_classification_missing_steps_mean_cancelled() {
        assert_eq!(Classification::from_steps(&[]), Classification::Cancelled);
        assert_eq!(
            Classification::from_steps(&[ok(Step::Lock), ok(Step::Unlock)]),
            Classification::Cancelled
        );
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Classification::Committed.severity(), Severity::Success);
        assert_eq!(
            Classification::CommittedLockHeld.severity(),
            Severity::Warning
        );
        assert_eq!(Classification::NotCommitted.severity(), Severity::Failure);
        assert_eq!(Classification::RenderFailed.severity(), Severity::Failure);
    }

    #[test]
    fn test_reply_warnings_are_not_failures() {
        let reply = RpcReply::rejected(
            "<rpc-reply/>",
            vec![RpcError {
                tag: "partial-operation".into(),
                severity: "warning".into(),
                message: None,
            }],
        );
        let result = StepResult::from_reply(Step::Push, reply, Duration::from_millis(5));
        assert!(result.success);
        assert_eq!(result.detail(), "ok (1 warning(s))");
        assert_eq!(result.elapsed_ms, 5);
    }

    #[test]
    fn test_step_result_from_timeout() {
        let result = StepResult::from_error(
            Step::Commit,
            &ProtocolError::Timeout { secs: 60 },
            Duration::from_secs(60),
        );
        assert!(!result.success);
        assert!(matches!(
            result.status,
            StepStatus::Failed {
                timed_out: true,
                ..
            }
        ));
    }

    #[test]
    fn test_outcome_questions_and_left_locked() {
        let device = DeviceTarget::new("r1", "10.0.0.1");
        let outcome = DeviceOutcome::from_steps(
            device,
            vec![ok(Step::Lock), rejected(Step::Push), rejected(Step::Unlock)],
        );

        assert_eq!(outcome.locked(), Some(true));
        assert_eq!(outcome.applied(), Some(false));
        assert_eq!(outcome.committed(), None);
        assert_eq!(outcome.unlocked(), Some(false));
        assert!(outcome.left_locked());
        assert_eq!(outcome.classification, Classification::NotApplied);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("push failed: operation-failed: boom")
        );
    }

    #[test]
    fn test_summary_counts() {
        let committed = DeviceOutcome::from_steps(
            DeviceTarget::new("a", "1"),
            Step::ALL.iter().map(|s| ok(*s)).collect(),
        );
        let locked = DeviceOutcome::from_steps(
            DeviceTarget::new("b", "2"),
            vec![
                ok(Step::Lock),
                ok(Step::Push),
                ok(Step::Commit),
                rejected(Step::Unlock),
            ],
        );
        let render = DeviceOutcome::short_circuit(
            DeviceTarget::new("c", "3"),
            Classification::RenderFailed,
            "missing host vars",
        );

        let report = FleetReport::new(
            vec![committed, locked, render],
            false,
            Utc::now(),
            Duration::from_secs(1),
        );
        let summary = report.summary();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.left_locked, 1);
        assert!(!report.is_success());
        assert_eq!(report.left_locked().count(), 1);
    }

    #[test]
    fn test_datastore_parse() {
        assert_eq!("candidate".parse::<Datastore>(), Ok(Datastore::Candidate));
        assert_eq!(" Running ".parse::<Datastore>(), Ok(Datastore::Running));
        assert!("scratch".parse::<Datastore>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", Some("hunter2".into()));
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }
}
