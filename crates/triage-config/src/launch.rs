//! How to launch the inference worker.
//!
//! The command is always an argument list handed to the OS as-is; nothing
//! goes through a shell, so image paths and model ids cannot inject
//! commands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An argument equal to this token expands to one `--volume host:container`
/// pair per configured binding.
pub const VOLUMES_PLACEHOLDER: &str = "{volumes}";

const DEFAULT_MODEL: &str = "Efficient-Large-Model/VILA1.5-3b";

/// Host directory mounted into the worker's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl VolumeBinding {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    fn as_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container.display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added to the inherited environment.
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeBinding>,
    /// How long to wait after spawning before checking for an early exit.
    pub startup_probe_ms: u64,
    /// How long `terminate` waits after SIGTERM before killing.
    pub terminate_grace_ms: u64,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        let args = [
            "run",
            "--runtime",
            "nvidia",
            "-i",
            VOLUMES_PLACEHOLDER,
            "--workdir",
            "/workspace/vila15_test",
            "dustynv/nano_llm:r36.2.0",
            "python3",
            "-m",
            "nano_llm.chat",
            "--api=mlc",
            "--model",
            DEFAULT_MODEL,
            "--max-context-len",
            "256",
            "--max-new-tokens",
            "64",
            "--interactive",
        ];

        let mut env = BTreeMap::new();
        env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        Self {
            program: "jetson-containers".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_dir: None,
            env,
            volumes: vec![
                VolumeBinding::new("/home/jetson/vila15_test", "/workspace/vila15_test"),
                VolumeBinding::new("/home/jetson/nanollm_project", "/workspace/nanollm_project"),
                VolumeBinding::new("/home/jetson/jetson-containers/data", "/data"),
            ],
            startup_probe_ms: 250,
            terminate_grace_ms: 5000,
        }
    }
}

impl LaunchSpec {
    /// Spec for running `program` directly with no volumes or extra env.
    pub fn direct(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: BTreeMap::new(),
            volumes: Vec::new(),
            ..Self::default()
        }
    }

    /// Final argument list with the volume placeholder expanded.
    pub fn command_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + self.volumes.len() * 2);
        for arg in &self.args {
            if arg == VOLUMES_PLACEHOLDER {
                for volume in &self.volumes {
                    out.push("--volume".to_string());
                    out.push(volume.as_arg());
                }
            } else {
                out.push(arg.clone());
            }
        }
        out
    }

    /// Human-readable command line for logs.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.command_args())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Path at which the worker sees `host_path`.
    ///
    /// Uses the first volume whose host directory contains the path;
    /// without a match the path is returned unchanged.
    pub fn container_path(&self, host_path: &Path) -> PathBuf {
        self.volumes
            .iter()
            .find_map(|v| {
                host_path
                    .strip_prefix(&v.host)
                    .ok()
                    .map(|rest| v.container.join(rest))
            })
            .unwrap_or_else(|| host_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volumes_expand_in_place() {
        let spec = LaunchSpec {
            program: "docker".into(),
            args: vec!["run".into(), VOLUMES_PLACEHOLDER.into(), "image".into()],
            volumes: vec![
                VolumeBinding::new("/a", "/x"),
                VolumeBinding::new("/b", "/y"),
            ],
            ..LaunchSpec::default()
        };
        assert_eq!(
            spec.command_args(),
            vec!["run", "--volume", "/a:/x", "--volume", "/b:/y", "image"]
        );
    }

    #[test]
    fn test_default_keeps_model_args() {
        let args = LaunchSpec::default().command_args();
        let model_pos = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_pos + 1], DEFAULT_MODEL);
        assert!(args.contains(&"--interactive".to_string()));
        assert!(!args.contains(&VOLUMES_PLACEHOLDER.to_string()));
    }

    #[test]
    fn test_container_path_maps_through_volume() {
        let spec = LaunchSpec::default();
        let mapped =
            spec.container_path(Path::new("/home/jetson/vila15_test/captured_images/w1.jpg"));
        assert_eq!(
            mapped,
            PathBuf::from("/workspace/vila15_test/captured_images/w1.jpg")
        );
    }

    #[test]
    fn test_container_path_passthrough_without_match() {
        let spec = LaunchSpec::direct("sh", vec![]);
        let path = Path::new("/tmp/wound_001.jpg");
        assert_eq!(spec.container_path(path), path);
    }

    #[test]
    fn test_display_command_has_no_placeholder() {
        let line = LaunchSpec::default().display_command();
        assert!(line.starts_with("jetson-containers run"));
        assert!(line.contains("--volume /home/jetson/nanollm_project:/workspace/nanollm_project"));
    }
}
