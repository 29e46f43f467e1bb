use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vidgen_comfyui::api::DEFAULT_REQUEST_TIMEOUT;
use vidgen_comfyui::monitor::MonitorLimits;
use vidgen_comfyui::readiness::ReadinessConfig;

/// Object storage settings for delivery.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage API base, e.g. `https://storage.bunnycdn.com`.
    pub endpoint: String,
    pub zone: String,
    /// Sent as the `AccessKey` header. Never logged.
    pub access_key: String,
    /// Public CDN host used to build the returned URL.
    pub cdn_host: String,
    /// Folder inside the zone that receives uploads.
    pub folder: String,
    pub upload_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://storage.bunnycdn.com".into(),
            zone: "mesulo".into(),
            access_key: String::new(),
            cdn_host: "mesulo.b-cdn.net".into(),
            folder: "runpod".into(),
            upload_timeout: Duration::from_secs(300),
        }
    }
}

/// Budgets for locating the generated video once execution ends.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactLookupConfig {
    /// How long to keep asking history while the prompt is absent.
    pub history_budget: Duration,
    pub history_interval: Duration,
    /// How long to keep rescanning the output directory.
    pub settle_budget: Duration,
    pub settle_interval: Duration,
    /// Maximum age of a file picked up by the directory scan.
    pub fallback_window: Duration,
}

impl Default for ArtifactLookupConfig {
    fn default() -> Self {
        Self {
            history_budget: Duration::from_secs(10),
            history_interval: Duration::from_secs(1),
            settle_budget: Duration::from_secs(10),
            settle_interval: Duration::from_secs(1),
            fallback_window: Duration::from_secs(300),
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching the stock container image.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// ComfyUI host (default: `127.0.0.1`).
    pub server_address: String,
    /// ComfyUI port (default: `8188`).
    pub comfyui_port: u16,
    /// Directory ComfyUI writes outputs into.
    pub output_dir: PathBuf,
    /// Overrides the embedded workflow templates when set.
    pub workflow_dir: Option<PathBuf>,
    /// Parent of the per-task working directories.
    pub work_root: PathBuf,
    /// Image used when a job supplies no primary image.
    pub default_image_path: PathBuf,
    pub download_timeout: Duration,
    /// Timeout for each workflow submission and history request.
    pub engine_request_timeout: Duration,
    pub readiness: ReadinessConfig,
    pub monitor: MonitorLimits,
    pub lookup: ArtifactLookupConfig,
    pub storage: StorageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".into(),
            comfyui_port: 8188,
            output_dir: PathBuf::from("/ComfyUI/output"),
            workflow_dir: None,
            work_root: std::env::temp_dir(),
            default_image_path: PathBuf::from("/example_image.png"),
            download_timeout: Duration::from_secs(120),
            engine_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            readiness: ReadinessConfig::default(),
            monitor: MonitorLimits::default(),
            lookup: ArtifactLookupConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                        |
    /// |-------------------------------|--------------------------------|
    /// | `SERVER_ADDRESS`              | `127.0.0.1`                    |
    /// | `COMFYUI_PORT`                | `8188`                         |
    /// | `COMFYUI_OUTPUT_DIR`          | `/ComfyUI/output`              |
    /// | `WORKFLOW_DIR`                | unset (embedded templates)     |
    /// | `WORK_ROOT`                   | system temp dir                |
    /// | `DEFAULT_IMAGE_PATH`          | `/example_image.png`           |
    /// | `DOWNLOAD_TIMEOUT_SECS`       | `120`                          |
    /// | `ENGINE_REQUEST_TIMEOUT_SECS` | `30`                           |
    /// | `READY_TIMEOUT_SECS`          | `180`                          |
    /// | `WS_CONNECT_TIMEOUT_SECS`     | `180`                          |
    /// | `MONITOR_MAX_MESSAGES`        | `600`                          |
    /// | `MONITOR_TIMEOUT_SECS`        | `1800`                         |
    /// | `FALLBACK_WINDOW_SECS`        | `300`                          |
    /// | `BUNNY_STORAGE_ENDPOINT`      | `https://storage.bunnycdn.com` |
    /// | `BUNNY_STORAGE_ZONE`          | `mesulo`                       |
    /// | `BUNNY_STORAGE_KEY`           | empty                          |
    /// | `BUNNY_CDN_HOST`              | `mesulo.b-cdn.net`             |
    /// | `BUNNY_FOLDER`                | `runpod`                       |
    /// | `UPLOAD_TIMEOUT_SECS`         | `300`                          |
    ///
    /// Unparseable numbers log a warning and keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let mut readiness = defaults.readiness;
        readiness.http.budget = env.secs("READY_TIMEOUT_SECS", readiness.http.budget);
        readiness.websocket.budget =
            env.secs("WS_CONNECT_TIMEOUT_SECS", readiness.websocket.budget);

        let monitor = MonitorLimits {
            max_messages: env.parsed("MONITOR_MAX_MESSAGES", defaults.monitor.max_messages),
            max_wait: env.secs("MONITOR_TIMEOUT_SECS", defaults.monitor.max_wait),
        };

        let lookup_config = ArtifactLookupConfig {
            fallback_window: env.secs("FALLBACK_WINDOW_SECS", defaults.lookup.fallback_window),
            ..defaults.lookup
        };

        let storage = StorageConfig {
            endpoint: env.string("BUNNY_STORAGE_ENDPOINT", defaults.storage.endpoint),
            zone: env.string("BUNNY_STORAGE_ZONE", defaults.storage.zone),
            access_key: env.string("BUNNY_STORAGE_KEY", defaults.storage.access_key),
            cdn_host: env.string("BUNNY_CDN_HOST", defaults.storage.cdn_host),
            folder: env.string("BUNNY_FOLDER", defaults.storage.folder),
            upload_timeout: env.secs("UPLOAD_TIMEOUT_SECS", defaults.storage.upload_timeout),
        };

        Self {
            server_address: env.string("SERVER_ADDRESS", defaults.server_address),
            comfyui_port: env.parsed("COMFYUI_PORT", defaults.comfyui_port),
            output_dir: env.path("COMFYUI_OUTPUT_DIR", defaults.output_dir),
            workflow_dir: env.non_empty("WORKFLOW_DIR").map(PathBuf::from),
            work_root: env.path("WORK_ROOT", defaults.work_root),
            default_image_path: env.path("DEFAULT_IMAGE_PATH", defaults.default_image_path),
            download_timeout: env.secs("DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout),
            engine_request_timeout: env.secs(
                "ENGINE_REQUEST_TIMEOUT_SECS",
                defaults.engine_request_timeout,
            ),
            readiness,
            monitor,
            lookup: lookup_config,
            storage,
        }
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.non_empty(key).unwrap_or(default)
    }

    fn path(&self, key: &str, default: PathBuf) -> PathBuf {
        self.non_empty(key).map(PathBuf::from).unwrap_or(default)
    }

    fn parsed<T: FromStr + Copy + std::fmt::Display>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.non_empty(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, %default, "Ignoring invalid environment value");
                default
            }
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parsed(key, default.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> PipelineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.server_address, "127.0.0.1");
        assert_eq!(config.comfyui_port, 8188);
        assert_eq!(config.output_dir, PathBuf::from("/ComfyUI/output"));
        assert!(config.workflow_dir.is_none());
        assert_eq!(config.download_timeout, Duration::from_secs(120));
        assert_eq!(config.engine_request_timeout, Duration::from_secs(30));
        assert_eq!(config.monitor.max_messages, 600);
        assert_eq!(config.monitor.max_wait, Duration::from_secs(1800));
        assert_eq!(config.lookup.fallback_window, Duration::from_secs(300));
        assert_eq!(config.storage.folder, "runpod");
        assert_eq!(config.storage.cdn_host, "mesulo.b-cdn.net");
        assert!(config.storage.access_key.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("SERVER_ADDRESS", "comfy.internal"),
            ("COMFYUI_PORT", "9000"),
            ("WORKFLOW_DIR", "/workflows"),
            ("READY_TIMEOUT_SECS", "30"),
            ("ENGINE_REQUEST_TIMEOUT_SECS", "45"),
            ("MONITOR_MAX_MESSAGES", "50"),
            ("BUNNY_STORAGE_KEY", "secret"),
            ("BUNNY_FOLDER", "staging"),
        ]);
        assert_eq!(config.server_address, "comfy.internal");
        assert_eq!(config.comfyui_port, 9000);
        assert_eq!(config.workflow_dir, Some(PathBuf::from("/workflows")));
        assert_eq!(config.readiness.http.budget, Duration::from_secs(30));
        assert_eq!(config.readiness.http.interval, Duration::from_secs(1));
        assert_eq!(config.engine_request_timeout, Duration::from_secs(45));
        assert_eq!(config.monitor.max_messages, 50);
        assert_eq!(config.storage.access_key, "secret");
        assert_eq!(config.storage.folder, "staging");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("COMFYUI_PORT", "not-a-port"),
            ("UPLOAD_TIMEOUT_SECS", "-5"),
            ("WORKFLOW_DIR", "   "),
        ]);
        assert_eq!(config.comfyui_port, 8188);
        assert_eq!(config.storage.upload_timeout, Duration::from_secs(300));
        assert!(config.workflow_dir.is_none());
    }
}
