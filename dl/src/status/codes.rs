//! Status and suggestion codes
//!
//! Codes are partitioned into numeric bands. The band decides the
//! [`Category`]; the code itself decides the owning [`Phase`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline phase that owns a status code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Build,
    Deploy,
    StatusCheck,
    Sync,
    DevInit,
    Cleanup,
}

impl Phase {
    /// Code assigned when a failure in this phase cannot be classified
    pub fn unknown_code(self) -> StatusCode {
        match self {
            Phase::Build => StatusCode::BuildUnknown,
            Phase::Deploy => StatusCode::DeployUnknown,
            Phase::StatusCheck => StatusCode::StatusCheckUnknown,
            Phase::Sync => StatusCode::SyncUnknown,
            Phase::DevInit => StatusCode::DevInitUnknown,
            Phase::Cleanup => StatusCode::CleanupUnknown,
        }
    }

    /// Code assigned when this phase finishes cleanly, if it has one
    pub fn success_code(self) -> Option<StatusCode> {
        match self {
            Phase::Build => Some(StatusCode::BuildSuccess),
            Phase::Deploy => Some(StatusCode::DeploySuccess),
            Phase::StatusCheck => Some(StatusCode::StatusCheckSuccess),
            Phase::Sync => Some(StatusCode::SyncSuccess),
            Phase::DevInit | Phase::Cleanup => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Build => "build",
            Phase::Deploy => "deploy",
            Phase::StatusCheck => "status check",
            Phase::Sync => "sync",
            Phase::DevInit => "dev init",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Numeric band a status code falls into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    /// The zero value: no status recorded
    Ok,
    /// 200-250
    Success,
    /// Known-cause failure in a phase-specific band
    Failure,
    /// 500-600
    Unknown,
    /// 800-850
    Cancelled,
}

/// Status codes attached to pipeline state and actionable errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum StatusCode {
    #[default]
    Ok = 0,

    // === Build (100-199) ===
    BuildPushAccessDenied = 101,
    BuildProjectNotFound = 102,
    BuildDockerDaemonNotRunning = 103,
    BuildUserError = 104,
    BuildDockerfileNotFound = 115,
    BuildDockerCacheFromPullErr = 116,
    BuildDockerNoSpaceErr = 127,

    // === Success (200-250) ===
    StatusCheckSuccess = 200,
    BuildSuccess = 201,
    DeploySuccess = 202,
    SyncSuccess = 203,

    // === Status check (300-499) ===
    StatusCheckImagePullErr = 300,
    StatusCheckContainerCreating = 301,
    StatusCheckRunContainerErr = 302,
    StatusCheckContainerTerminated = 303,
    StatusCheckDeploymentRolloutPending = 304,
    StatusCheckContainerRestarting = 356,
    StatusCheckUnhealthy = 357,
    StatusCheckNodeMemoryPressure = 400,
    StatusCheckNodeDiskPressure = 401,
    StatusCheckKubectlConnectionErr = 409,
    StatusCheckPodInitializing = 451,

    // === Unknown (500-600) ===
    StatusCheckUnknown = 501,
    DeployUnknown = 504,
    SyncUnknown = 505,
    BuildUnknown = 506,
    DevInitUnknown = 507,
    CleanupUnknown = 508,

    // === Sync (601-699) ===
    SyncInitError = 601,

    // === Dev init (700-799) ===
    DevInitRegisterBuildDeps = 701,
    DevInitRegisterTestDeps = 702,
    DevInitRegisterDeployDeps = 703,
    DevInitRegisterConfigDep = 704,

    // === Cancellation (800-850) ===
    StatusCheckUserCancelled = 800,
    StatusCheckDeadlineExceeded = 801,
    BuildCancelled = 802,
    DeployCancelled = 803,
    SyncCancelled = 804,

    // === Deploy (1000-1099) ===
    DeployClusterConnectionErr = 1001,
    DeployDebugHelperRetrieveErr = 1002,
    DeployHelmUserErr = 1005,
    DeployNoMatchingBuild = 1006,
    DeployKubectlApplyErr = 1007,
}

impl StatusCode {
    /// Every defined code, in ascending numeric order
    pub const ALL: &'static [StatusCode] = &[
        StatusCode::Ok,
        StatusCode::BuildPushAccessDenied,
        StatusCode::BuildProjectNotFound,
        StatusCode::BuildDockerDaemonNotRunning,
        StatusCode::BuildUserError,
        StatusCode::BuildDockerfileNotFound,
        StatusCode::BuildDockerCacheFromPullErr,
        StatusCode::BuildDockerNoSpaceErr,
        StatusCode::StatusCheckSuccess,
        StatusCode::BuildSuccess,
        StatusCode::DeploySuccess,
        StatusCode::SyncSuccess,
        StatusCode::StatusCheckImagePullErr,
        StatusCode::StatusCheckContainerCreating,
        StatusCode::StatusCheckRunContainerErr,
        StatusCode::StatusCheckContainerTerminated,
        StatusCode::StatusCheckDeploymentRolloutPending,
        StatusCode::StatusCheckContainerRestarting,
        StatusCode::StatusCheckUnhealthy,
        StatusCode::StatusCheckNodeMemoryPressure,
        StatusCode::StatusCheckNodeDiskPressure,
        StatusCode::StatusCheckKubectlConnectionErr,
        StatusCode::StatusCheckPodInitializing,
        StatusCode::StatusCheckUnknown,
        StatusCode::DeployUnknown,
        StatusCode::SyncUnknown,
        StatusCode::BuildUnknown,
        StatusCode::DevInitUnknown,
        StatusCode::CleanupUnknown,
        StatusCode::SyncInitError,
        StatusCode::DevInitRegisterBuildDeps,
        StatusCode::DevInitRegisterTestDeps,
        StatusCode::DevInitRegisterDeployDeps,
        StatusCode::DevInitRegisterConfigDep,
        StatusCode::StatusCheckUserCancelled,
        StatusCode::StatusCheckDeadlineExceeded,
        StatusCode::BuildCancelled,
        StatusCode::DeployCancelled,
        StatusCode::SyncCancelled,
        StatusCode::DeployClusterConnectionErr,
        StatusCode::DeployDebugHelperRetrieveErr,
        StatusCode::DeployHelmUserErr,
        StatusCode::DeployNoMatchingBuild,
        StatusCode::DeployKubectlApplyErr,
    ];

    /// Numeric wire value
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    pub fn category(self) -> Category {
        match self.code() {
            0 => Category::Ok,
            200..=250 => Category::Success,
            500..=600 => Category::Unknown,
            800..=850 => Category::Cancelled,
            _ => Category::Failure,
        }
    }

    /// Phase band this code belongs to; `None` only for [`StatusCode::Ok`]
    pub fn phase(self) -> Option<Phase> {
        use StatusCode::*;
        let phase = match self {
            Ok => return None,
            BuildPushAccessDenied
            | BuildProjectNotFound
            | BuildDockerDaemonNotRunning
            | BuildUserError
            | BuildDockerfileNotFound
            | BuildDockerCacheFromPullErr
            | BuildDockerNoSpaceErr
            | BuildSuccess
            | BuildUnknown
            | BuildCancelled => Phase::Build,
            StatusCheckSuccess
            | StatusCheckImagePullErr
            | StatusCheckContainerCreating
            | StatusCheckRunContainerErr
            | StatusCheckContainerTerminated
            | StatusCheckDeploymentRolloutPending
            | StatusCheckContainerRestarting
            | StatusCheckUnhealthy
            | StatusCheckNodeMemoryPressure
            | StatusCheckNodeDiskPressure
            | StatusCheckKubectlConnectionErr
            | StatusCheckPodInitializing
            | StatusCheckUnknown
            | StatusCheckUserCancelled
            | StatusCheckDeadlineExceeded => Phase::StatusCheck,
            DeploySuccess
            | DeployUnknown
            | DeployCancelled
            | DeployClusterConnectionErr
            | DeployDebugHelperRetrieveErr
            | DeployHelmUserErr
            | DeployNoMatchingBuild
            | DeployKubectlApplyErr => Phase::Deploy,
            SyncSuccess | SyncUnknown | SyncInitError | SyncCancelled => Phase::Sync,
            DevInitUnknown
            | DevInitRegisterBuildDeps
            | DevInitRegisterTestDeps
            | DevInitRegisterDeployDeps
            | DevInitRegisterConfigDep => Phase::DevInit,
            CleanupUnknown => Phase::Cleanup,
        };
        Some(phase)
    }

    pub fn is_success(self) -> bool {
        self.category() == Category::Success
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self.category(),
            Category::Failure | Category::Unknown | Category::Cancelled
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde name so logs and wire output agree
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => write!(f, "{}({})", name, self.code()),
            _ => write!(f, "{}", self.code()),
        }
    }
}

/// Remediation hints attached to actionable errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SuggestionCode {
    #[default]
    Nil = 0,

    // Build
    AddDefaultRepo = 100,
    CheckDefaultRepo = 101,
    DockerAuthConfigure = 104,
    CheckGcloudProject = 105,
    CheckDockerRunning = 106,
    FixUserBuildErr = 107,
    FixCacheFromArtifactConfig = 109,
    FixDockerfilePath = 110,
    RunDockerPrune = 113,

    // Deploy
    CheckClusterConnection = 201,
    CheckMinikubeStatus = 202,
    InstallHelm = 203,
    FixHelmConfig = 205,
    CheckManifests = 206,

    // Status check
    CheckContainerLogs = 301,
    CheckReadinessProbe = 302,
    CheckContainerImage = 303,
    AddressNodeMemoryPressure = 304,
    AddressNodeDiskPressure = 305,
    CheckHostConnection = 408,

    // Sync
    CheckSyncRules = 601,

    // Dev init
    FixPipelineConfig = 701,

    OpenIssue = 900,
}

impl SuggestionCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
