// Pass result reporting. Every non-fatal problem in a pass surfaces
// here with the device name and a reason — nothing is silently dropped.

use serde::Serialize;

/// Which stage of per-device processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Load-time defect (placeholder, auth wiring) or auth failure.
    Auth,
    /// Discovery produced no usable endpoint set.
    Discovery,
    /// Artifact write failed; the prior artifact was left untouched.
    Render,
    /// Stale-artifact deletion failed.
    Cleanup,
}

/// One recorded per-device problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub device: String,
    pub stage: FailureStage,
    pub reason: String,
}

/// Outcome of one full reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Devices with full artifact pairs generated.
    pub succeeded: usize,
    /// Devices rendered with a fallback health-only fragment.
    pub degraded: usize,
    /// Stale artifact pairs deleted for removed devices.
    pub removed: usize,
    /// Every per-device problem encountered, sorted by device name.
    pub failures: Vec<DeviceFailure>,
}

impl PassSummary {
    /// Record a failure, keeping the list sorted for deterministic output.
    pub(crate) fn record(&mut self, device: &str, stage: FailureStage, reason: String) {
        self.failures.push(DeviceFailure {
            device: device.to_owned(),
            stage,
            reason,
        });
        self.failures
            .sort_by(|a, b| a.device.cmp(&b.device).then_with(|| a.reason.cmp(&b.reason)));
    }
}
