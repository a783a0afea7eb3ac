// Sandbox configuration
// Decision: Defaults target the .NET SDK/runtime images; everything is overridable via env
//
// Two phases share one working directory per run:
//   <work_dir>/<run id>/src        mounted read-only into the build container
//   <work_dir>/<run id>/artifacts  written by the build, mounted read-only into the run container

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BUILD_IMAGE: &str = "mcr.microsoft.com/dotnet/sdk:8.0";
pub const DEFAULT_RUN_IMAGE: &str = "mcr.microsoft.com/dotnet/runtime:8.0";

/// Project scaffold written next to the submitted source
pub const DEFAULT_PROJECT_FILE: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>net8.0</TargetFramework>
    <ImplicitUsings>enable</ImplicitUsings>
    <Nullable>enable</Nullable>
    <AssemblyName>Program</AssemblyName>
  </PropertyGroup>
</Project>
"#;

/// Resource caps and deadline of one phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseLimits {
    pub memory_mb: u64,
    pub cpus: f64,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

/// Strings the build classifier looks for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildMarkers {
    /// Case-insensitive; any stderr line containing it aborts the build
    pub error: String,
    /// Case-insensitive; expected somewhere in build stdout on success
    pub success: String,
    /// File the build leaves in artifacts on success
    pub sentinel: String,
}

impl Default for BuildMarkers {
    fn default() -> Self {
        Self {
            error: "error".to_string(),
            success: "Build succeeded".to_string(),
            sentinel: "Program.dll".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Parent of the per-run working directories
    pub work_dir: PathBuf,
    /// Docker CLI binary
    pub docker_bin: String,

    pub build_image: String,
    pub run_image: String,
    pub build_limits: PhaseLimits,
    pub run_limits: PhaseLimits,

    /// Scaffold file name and contents, written to `src`
    pub project_file_name: String,
    pub project_file_contents: String,
    /// File the submitted code is written to, inside `src`
    pub source_file_name: String,

    /// Mount point of `src` in the build container
    pub build_src_path: String,
    /// Mount point of `artifacts` in the build container
    pub build_artifacts_path: String,
    /// Mount point of `artifacts` in the run container
    pub run_app_path: String,
    pub build_command: Vec<String>,
    pub run_command: Vec<String>,

    pub markers: BuildMarkers,
    /// Lines kept per captured stream
    pub max_output_lines: usize,
    /// Run containers with `--network none`
    pub network_disabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("coderunner"),
            docker_bin: "docker".to_string(),
            build_image: DEFAULT_BUILD_IMAGE.to_string(),
            run_image: DEFAULT_RUN_IMAGE.to_string(),
            build_limits: PhaseLimits {
                memory_mb: 200,
                cpus: 1.0,
                timeout: Duration::from_secs(300),
            },
            run_limits: PhaseLimits {
                memory_mb: 100,
                cpus: 0.1,
                timeout: Duration::from_secs(30),
            },
            project_file_name: "Program.csproj".to_string(),
            project_file_contents: DEFAULT_PROJECT_FILE.to_string(),
            source_file_name: "Program.cs".to_string(),
            build_src_path: "/src".to_string(),
            build_artifacts_path: "/artifacts".to_string(),
            run_app_path: "/app".to_string(),
            // src is read-only, so the build works on a scratch copy
            build_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cp -r /src /tmp/build && dotnet publish /tmp/build/Program.csproj -c Release -o /artifacts --nologo".to_string(),
            ],
            run_command: vec!["dotnet".to_string(), "/app/Program.dll".to_string()],
            markers: BuildMarkers::default(),
            max_output_lines: 1000,
            network_disabled: true,
        }
    }
}

impl SandboxConfig {
    /// Create configuration from environment variables
    ///
    /// - `SANDBOX_WORK_DIR`, `SANDBOX_DOCKER_BIN`
    /// - `SANDBOX_BUILD_IMAGE`, `SANDBOX_RUN_IMAGE`
    /// - `SANDBOX_BUILD_MEMORY_MB`, `SANDBOX_BUILD_CPUS`, `SANDBOX_BUILD_TIMEOUT_SECS`
    /// - `SANDBOX_RUN_MEMORY_MB`, `SANDBOX_RUN_CPUS`, `SANDBOX_RUN_TIMEOUT_SECS`
    /// - `SANDBOX_MAX_OUTPUT_LINES`
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            work_dir: std::env::var("SANDBOX_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.work_dir),
            docker_bin: std::env::var("SANDBOX_DOCKER_BIN").unwrap_or(d.docker_bin),
            build_image: std::env::var("SANDBOX_BUILD_IMAGE").unwrap_or(d.build_image),
            run_image: std::env::var("SANDBOX_RUN_IMAGE").unwrap_or(d.run_image),
            build_limits: PhaseLimits {
                memory_mb: env_parse("SANDBOX_BUILD_MEMORY_MB").unwrap_or(d.build_limits.memory_mb),
                cpus: env_parse("SANDBOX_BUILD_CPUS").unwrap_or(d.build_limits.cpus),
                timeout: env_parse("SANDBOX_BUILD_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.build_limits.timeout),
            },
            run_limits: PhaseLimits {
                memory_mb: env_parse("SANDBOX_RUN_MEMORY_MB").unwrap_or(d.run_limits.memory_mb),
                cpus: env_parse("SANDBOX_RUN_CPUS").unwrap_or(d.run_limits.cpus),
                timeout: env_parse("SANDBOX_RUN_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.run_limits.timeout),
            },
            max_output_lines: env_parse("SANDBOX_MAX_OUTPUT_LINES").unwrap_or(d.max_output_lines),
            ..d
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_max_output_lines(mut self, lines: usize) -> Self {
        self.max_output_lines = lines;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_limits.timeout = timeout;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_limits.timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
