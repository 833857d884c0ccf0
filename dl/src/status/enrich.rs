//! Error enrichment
//!
//! Producers report failures as plain text. [`enrich`] matches that text
//! against a per-phase table of known problems and returns an
//! [`ActionableErr`] carrying a status code and remediation suggestions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::codes::{Phase, StatusCode, SuggestionCode};

/// A single remediation hint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Suggestion {
    pub suggestion_code: SuggestionCode,
    pub action: String,
}

impl Suggestion {
    pub fn new(suggestion_code: SuggestionCode, action: impl Into<String>) -> Self {
        Self {
            suggestion_code,
            action: action.into(),
        }
    }
}

/// An error enriched with a status code and suggestions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionableErr {
    pub err_code: StatusCode,
    pub message: String,
    pub suggestions: Vec<Suggestion>,
}

impl ActionableErr {
    pub fn new(err_code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            err_code,
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

/// One row of the known-problem table
struct KnownProblem {
    phase: Phase,
    pattern: Regex,
    code: StatusCode,
    suggestions: &'static [(SuggestionCode, &'static str)],
}

impl KnownProblem {
    fn new(
        phase: Phase,
        pattern: &str,
        code: StatusCode,
        suggestions: &'static [(SuggestionCode, &'static str)],
    ) -> Self {
        Self {
            phase,
            pattern: Regex::new(pattern).expect("known problem pattern must compile"),
            code,
            suggestions,
        }
    }

    fn actionable(&self, message: &str) -> ActionableErr {
        let suggestions = self
            .suggestions
            .iter()
            .map(|(code, action)| Suggestion::new(*code, *action))
            .collect();
        ActionableErr::new(self.code, message).with_suggestions(suggestions)
    }
}

const CANCELLED: &str = r"(?i)context canceled|operation was canceled";

static KNOWN_PROBLEMS: LazyLock<Vec<KnownProblem>> = LazyLock::new(|| {
    use Phase::{Build, Deploy, DevInit, StatusCheck};
    use StatusCode as S;
    use SuggestionCode as G;

    vec![
        // === Build ===
        KnownProblem::new(
            Build,
            r"(?i)(unauthorized|denied|insufficient scopes).*push|push.*(unauthorized|denied)",
            S::BuildPushAccessDenied,
            &[
                (G::CheckDefaultRepo, "Check your default repository value"),
                (G::DockerAuthConfigure, "Try running `docker login` for the registry"),
            ],
        ),
        KnownProblem::new(
            Build,
            r"(?i)unknown: project|project .* not found",
            S::BuildProjectNotFound,
            &[(G::CheckGcloudProject, "Check your cloud project is set and exists")],
        ),
        KnownProblem::new(
            Build,
            r"(?i)cannot connect to the docker daemon|docker daemon is not running",
            S::BuildDockerDaemonNotRunning,
            &[(G::CheckDockerRunning, "Check the docker daemon is running")],
        ),
        KnownProblem::new(
            Build,
            r"(?i)no space left on device",
            S::BuildDockerNoSpaceErr,
            &[(G::RunDockerPrune, "Run `docker system prune` to free up space")],
        ),
        KnownProblem::new(
            Build,
            r"(?i)dockerfile.*(not found|no such file)|(cannot locate|unable to find) dockerfile",
            S::BuildDockerfileNotFound,
            &[(G::FixDockerfilePath, "Check the dockerfile path in your pipeline config")],
        ),
        KnownProblem::new(
            Build,
            r"(?i)cache.?from.*(pull|not found)",
            S::BuildDockerCacheFromPullErr,
            &[(G::FixCacheFromArtifactConfig, "Check the cacheFrom images of the artifact")],
        ),
        KnownProblem::new(Build, CANCELLED, S::BuildCancelled, &[]),
        // === Deploy ===
        KnownProblem::new(
            Deploy,
            r"(?i)minikube.*(stopped|not running|paused)",
            S::DeployClusterConnectionErr,
            &[
                (G::CheckMinikubeStatus, "Check if minikube is running with `minikube status`"),
                (G::CheckClusterConnection, "Check your connection for the cluster"),
            ],
        ),
        KnownProblem::new(
            Deploy,
            r"(?i)unable to connect to the server|connection refused|no such host",
            S::DeployClusterConnectionErr,
            &[(G::CheckClusterConnection, "Check your connection for the cluster")],
        ),
        KnownProblem::new(
            Deploy,
            r#"(?i)helm.*(executable file not found|not found in \$PATH|command not found)"#,
            S::DeployHelmUserErr,
            &[(G::InstallHelm, "Install helm and make sure it is on your PATH")],
        ),
        KnownProblem::new(
            Deploy,
            r"(?i)no build result.*(image|artifact)|no matching build",
            S::DeployNoMatchingBuild,
            &[(G::CheckManifests, "Check the image names referenced in your manifests")],
        ),
        KnownProblem::new(
            Deploy,
            r"(?i)kubectl apply|error validating data",
            S::DeployKubectlApplyErr,
            &[(G::CheckManifests, "Check your manifests are valid")],
        ),
        KnownProblem::new(Deploy, CANCELLED, S::DeployCancelled, &[]),
        // === Status check ===
        KnownProblem::new(
            StatusCheck,
            r"ErrImagePull|ImagePullBackOff",
            S::StatusCheckImagePullErr,
            &[(G::CheckContainerImage, "Check the container image name and registry access")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"CrashLoopBackOff",
            S::StatusCheckContainerRestarting,
            &[(G::CheckContainerLogs, "Check the container logs for the crash reason")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"(?i)readiness probe failed",
            S::StatusCheckUnhealthy,
            &[(G::CheckReadinessProbe, "Check the readiness probe of the container")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"(?i)memory pressure|insufficient memory",
            S::StatusCheckNodeMemoryPressure,
            &[(G::AddressNodeMemoryPressure, "Free memory on the node or lower resource requests")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"(?i)disk pressure",
            S::StatusCheckNodeDiskPressure,
            &[(G::AddressNodeDiskPressure, "Free disk space on the node")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"(?i)unable to connect to the server|connection refused",
            S::StatusCheckKubectlConnectionErr,
            &[(G::CheckHostConnection, "Check your connection to the cluster")],
        ),
        KnownProblem::new(
            StatusCheck,
            r"(?i)deadline exceeded|timed out",
            S::StatusCheckDeadlineExceeded,
            &[],
        ),
        KnownProblem::new(StatusCheck, CANCELLED, S::StatusCheckUserCancelled, &[]),
        // === Sync ===
        KnownProblem::new(
            Phase::Sync,
            r"(?i)(initializing|init) sync|sync.*init",
            S::SyncInitError,
            &[(G::CheckSyncRules, "Check the sync rules of the artifact")],
        ),
        KnownProblem::new(Phase::Sync, CANCELLED, S::SyncCancelled, &[]),
        // === Dev init ===
        KnownProblem::new(
            DevInit,
            r"(?i)(registering|register) build dep",
            S::DevInitRegisterBuildDeps,
            &[(G::FixPipelineConfig, "Check the artifact paths in your pipeline config")],
        ),
        KnownProblem::new(
            DevInit,
            r"(?i)(registering|register) test dep",
            S::DevInitRegisterTestDeps,
            &[(G::FixPipelineConfig, "Check the test paths in your pipeline config")],
        ),
        KnownProblem::new(
            DevInit,
            r"(?i)(registering|register) deploy dep",
            S::DevInitRegisterDeployDeps,
            &[(G::FixPipelineConfig, "Check the manifest paths in your pipeline config")],
        ),
        KnownProblem::new(
            DevInit,
            r"(?i)(registering|register) config dep",
            S::DevInitRegisterConfigDep,
            &[(G::FixPipelineConfig, "Check the pipeline config file is readable")],
        ),
    ]
});

/// Classify a raw error for a phase
///
/// The first known problem of `phase` whose pattern matches wins. No match
/// yields the phase's `*_UNKNOWN` code with no suggestions.
pub fn enrich(raw_error: &str, phase: Phase) -> ActionableErr {
    KNOWN_PROBLEMS
        .iter()
        .filter(|p| p.phase == phase)
        .find(|p| p.pattern.is_match(raw_error))
        .map(|p| p.actionable(raw_error))
        .unwrap_or_else(|| ActionableErr::new(phase.unknown_code(), raw_error))
}
