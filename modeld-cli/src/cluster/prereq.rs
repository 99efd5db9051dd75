//! Prerequisite checker for the local k3d cluster
//!
//! Validates that the binaries needed to provision a cluster are installed
//! with supported versions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use duct::cmd;
use semver::{Version, VersionReq};

/// A binary the local cluster depends on.
#[derive(Debug, Clone, Copy)]
pub struct BinarySpec {
    pub name: &'static str,
    /// Semver requirement, e.g. `">=5.0.0"`.
    pub version: &'static str,
    /// Arguments printing the version.
    pub version_args: &'static [&'static str],
    pub install_hint: &'static str,
}

pub const CLUSTER_BINARIES: [BinarySpec; 3] = [
    BinarySpec {
        name: "k3d",
        version: ">=5.0.0",
        version_args: &["version"],
        install_hint: "curl -s https://raw.githubusercontent.com/k3d-io/k3d/main/install.sh | bash",
    },
    BinarySpec {
        name: "kubectl",
        version: ">=1.20.0",
        version_args: &["version", "--client"],
        install_hint: "https://kubernetes.io/docs/tasks/tools/",
    },
    BinarySpec {
        name: "docker",
        version: ">=20.10.0",
        version_args: &["--version"],
        install_hint: "https://docs.docker.com/engine/install/",
    },
];

/// Result of the check of a single binary
#[derive(Debug)]
pub struct BinaryCheck {
    pub name: String,
    pub found: bool,
    pub installed_version: Option<String>,
    pub required_version: String,
    pub meets_requirement: bool,
    pub path: Option<PathBuf>,
    pub install_hint: String,
}

impl BinaryCheck {
    pub fn is_satisfied(&self) -> bool {
        self.found && self.meets_requirement
    }
}

#[derive(Debug)]
pub struct PrereqResult {
    pub checks: Vec<BinaryCheck>,
}

impl PrereqResult {
    pub fn all_met(&self) -> bool {
        self.checks.iter().all(BinaryCheck::is_satisfied)
    }

    pub fn missing(&self) -> Vec<&BinaryCheck> {
        self.checks.iter().filter(|b| !b.is_satisfied()).collect()
    }
}

/// Check if binary exists in PATH
fn find_binary(name: &str) -> Option<PathBuf> {
    cmd!("which", name)
        .stderr_null()
        .read()
        .ok()
        .map(|path| PathBuf::from(path.trim()))
        .filter(|path| !path.as_os_str().is_empty())
}

fn get_version(spec: &BinarySpec) -> Option<String> {
    let output = cmd(spec.name, spec.version_args.iter().copied())
        .stderr_to_stdout()
        .read()
        .ok()?;
    extract_version(&output)
}

/// Extract semantic version from version output
/// Handles formats such as:
///   "k3d version v5.6.0" -> "5.6.0"
///   "Client Version: v1.30.2" -> "1.30.2"
///   "Docker version 24.0.7, build afdd53b" -> "24.0.7"
fn extract_version(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"v?(\d+\.\d+\.\d+)").ok()?;
    re.captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn version_meets_requirement(installed: &str, requirement: &str) -> Result<bool> {
    let installed = Version::parse(installed.trim())
        .with_context(|| format!("Failed to parse installed version: {installed}"))?;
    let requirement = VersionReq::parse(requirement.trim())
        .with_context(|| format!("Failed to parse required version: {requirement}"))?;
    Ok(requirement.matches(&installed))
}

fn check_binary(spec: &BinarySpec) -> BinaryCheck {
    let path = find_binary(spec.name);
    let found = path.is_some();

    let (installed_version, meets_requirement) = if found {
        match get_version(spec) {
            Some(version) => {
                let meets = version_meets_requirement(&version, spec.version).unwrap_or(false);
                (Some(version), meets)
            }
            // found but the version output is unrecognized
            None => (Some("unknown".to_string()), true),
        }
    } else {
        (None, false)
    };

    BinaryCheck {
        name: spec.name.to_string(),
        found,
        installed_version,
        required_version: spec.version.to_string(),
        meets_requirement,
        path,
        install_hint: spec.install_hint.to_string(),
    }
}

/// Check every binary the local cluster needs.
pub fn check_prerequisites() -> PrereqResult {
    PrereqResult {
        checks: CLUSTER_BINARIES.iter().map(check_binary).collect(),
    }
}
