use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use rpc_protocol::{SerializationMode, Value, DEFAULT_MAX_FRAME_BYTES};

use crate::error::RpcError;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_millis(10_000);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(5_000);

/// On-disk defaults a host application can ship instead of hardcoding
/// timeout/retry/serialization settings at every call site
/// (`SPEC_FULL.md` AMBIENT — configuration). Parsed with `toml` + `serde`,
/// the same shape the teacher crate uses for its own persisted snapshots.
/// Explicit [`SpawnOptions`] builder calls always override values loaded
/// from here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub serialization: Option<String>,
    pub init_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

impl RpcConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RpcError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            RpcError::InvalidConfig(format!(
                "failed to read {}: {source}",
                path.as_ref().display()
            ))
        })?;
        toml::from_str(&raw)
            .map_err(|source| RpcError::InvalidConfig(format!("invalid config TOML: {source}")))
    }
}

/// Validated spawn-time configuration (spec.md §6), built via the
/// [`SpawnOptions`] builder in the same style as the teacher's
/// `CodexClientBuilder`.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    command: PathBuf,
    args: Vec<OsString>,
    init_args: Vec<Value>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Duration,
    retries: u32,
    serialization: SerializationMode,
    init_timeout: Duration,
    shutdown_timeout: Duration,
    max_frame_bytes: u32,
}

impl SpawnOptions {
    /// Starts a builder targeting the worker binary at `command`
    /// (the Rust lowering of `modulePath`: this crate hands a `Command`
    /// to spawn rather than resolving a dynamic import — see
    /// `SPEC_FULL.md` AMBIENT).
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            init_args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            // Rich is the default: portable mode's Date asymmetry (spec.md
            // §9 Open Questions) means a caller who hasn't thought about
            // codec choice should get full fidelity, not a silent downgrade.
            serialization: SerializationMode::Rich,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Seeds a builder from on-disk defaults. Every subsequent builder
    /// call overrides the corresponding field.
    pub fn with_defaults(command: impl Into<PathBuf>, config: &RpcConfig) -> Result<Self, RpcError> {
        let mut options = Self::new(command);
        if let Some(ms) = config.timeout_ms {
            options.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = config.retries {
            options.retries = retries;
        }
        if let Some(mode) = &config.serialization {
            options.serialization = mode
                .parse()
                .map_err(|reason| RpcError::InvalidConfig(format!("serialization: {reason}")))?;
        }
        if let Some(ms) = config.init_timeout_ms {
            options.init_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = config.shutdown_timeout_ms {
            options.shutdown_timeout = Duration::from_millis(ms);
        }
        Ok(options)
    }

    /// Appends one argument to the worker binary's command line.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Replaces the worker binary's argument list.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the constructor argument list passed through the spawn
    /// handshake's `Init` frame (spec.md §6 `args`).
    pub fn init_args(mut self, args: Vec<Value>) -> Self {
        self.init_args = args;
        self
    }

    /// Merges one environment variable onto the worker's environment
    /// (spec.md §6 `env`). Rust's `String` key/value types statically
    /// rule out the "non-string values" rejection spec.md calls for at
    /// runtime — there is no non-string case to reject.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the worker's working directory (spec.md §6 `cwd`). Must name
    /// an existing directory; checked in [`Self::build`].
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Per-call timeout (spec.md §6 `timeout`, default 30000ms). Must be
    /// positive; checked in [`Self::build`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Per-call retry budget (spec.md §6 `retries`, default 3).
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Codec mode, immutable for the worker's lifetime (spec.md §6
    /// `serialization`).
    pub fn serialization(mut self, mode: SerializationMode) -> Self {
        self.serialization = mode;
        self
    }

    /// Budget for the spawn handshake to observe `Ready` (spec.md §4.6).
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Budget for in-flight requests to settle during graceful shutdown
    /// before escalating to a forceful kill (spec.md §4.6).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Overrides the maximum frame payload size (spec.md §4.1).
    pub fn max_frame_bytes(mut self, max: u32) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Validates the configuration (spec.md §8 boundary behaviors:
    /// `timeout: 0`/negative timeout rejected, `cwd` must be an existing
    /// directory) and returns it ready to spawn.
    pub fn build(self) -> Result<Self, RpcError> {
        if self.timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "timeout must be positive".to_string(),
            ));
        }
        if let Some(cwd) = &self.cwd {
            let metadata = std::fs::metadata(cwd).map_err(|source| {
                RpcError::InvalidConfig(format!("cwd {}: {source}", cwd.display()))
            })?;
            if !metadata.is_dir() {
                return Err(RpcError::InvalidConfig(format!(
                    "cwd {} is not a directory",
                    cwd.display()
                )));
            }
        }
        Ok(self)
    }

    pub(crate) fn command(&self) -> &Path {
        &self.command
    }

    pub(crate) fn command_args(&self) -> &[OsString] {
        &self.args
    }

    pub(crate) fn init_args_value(&self) -> &[Value] {
        &self.init_args
    }

    pub(crate) fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub(crate) fn cwd_path(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn timeout_value(&self) -> Duration {
        self.timeout
    }

    pub fn retries_value(&self) -> u32 {
        self.retries
    }

    pub fn serialization_mode(&self) -> SerializationMode {
        self.serialization
    }

    pub(crate) fn init_timeout_value(&self) -> Duration {
        self.init_timeout
    }

    pub(crate) fn shutdown_timeout_value(&self) -> Duration {
        self.shutdown_timeout
    }

    pub(crate) fn max_frame_bytes_value(&self) -> u32 {
        self.max_frame_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_timeout() {
        let err = SpawnOptions::new("worker")
            .timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_nonexistent_cwd() {
        let err = SpawnOptions::new("worker")
            .cwd("/definitely/not/a/real/path")
            .build()
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidConfig(_)));
    }

    #[test]
    fn accepts_existing_directory_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let options = SpawnOptions::new("worker")
            .cwd(dir.path())
            .build()
            .unwrap();
        assert_eq!(options.cwd_path(), Some(dir.path()));
    }

    #[test]
    fn defaults_match_spec() {
        let options = SpawnOptions::new("worker").build().unwrap();
        assert_eq!(options.timeout_value(), Duration::from_millis(30_000));
        assert_eq!(options.retries_value(), 3);
    }

    #[test]
    fn config_file_seeds_then_builder_overrides() {
        let config = RpcConfig {
            timeout_ms: Some(1_000),
            retries: Some(1),
            serialization: Some("portable".to_string()),
            init_timeout_ms: None,
            shutdown_timeout_ms: None,
        };
        let options = SpawnOptions::with_defaults("worker", &config)
            .unwrap()
            .retries(9)
            .build()
            .unwrap();
        assert_eq!(options.timeout_value(), Duration::from_millis(1_000));
        assert_eq!(options.retries_value(), 9);
        assert_eq!(options.serialization_mode(), SerializationMode::Portable);
    }
}
