use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: built-in defaults, then the TOML config file, then
/// `VIGIL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Length of every stored and probed signature.
    pub signature_dim: usize,
    /// Maximum Euclidean distance accepted as a match.
    pub match_tolerance: f32,
    /// Default observation window for `capture`.
    pub capture_secs: u64,
    /// Capture loop cadence.
    pub tick_ms: u64,
    /// Upper bound on a single wait for a frame.
    pub frame_timeout_ms: u64,
    /// Frames read before a signature probe gives up.
    pub probe_frames: u32,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    signature_dim: Option<usize>,
    match_tolerance: Option<f32>,
    capture_secs: Option<u64>,
    tick_ms: Option<u64>,
    frame_timeout_ms: Option<u64>,
    probe_frames: Option<u32>,
}

impl Config {
    pub fn defaults() -> Self {
        Self {
            db_path: data_dir().join("vigil.db"),
            signature_dim: 128,
            match_tolerance: vigil_core::matcher::DEFAULT_TOLERANCE,
            capture_secs: 60,
            tick_ms: 30,
            frame_timeout_ms: 250,
            probe_frames: 5,
        }
    }

    /// Load from the config file (if any) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("VIGIL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"));

        let mut config = Self::defaults();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            config.apply_file(&text, &path)?;
            tracing::debug!(path = %path.display(), "loaded config file");
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, text: &str, path: &Path) -> anyhow::Result<()> {
        let file: FileConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.signature_dim {
            self.signature_dim = v;
        }
        if let Some(v) = file.match_tolerance {
            self.match_tolerance = v;
        }
        if let Some(v) = file.capture_secs {
            self.capture_secs = v;
        }
        if let Some(v) = file.tick_ms {
            self.tick_ms = v;
        }
        if let Some(v) = file.frame_timeout_ms {
            self.frame_timeout_ms = v;
        }
        if let Some(v) = file.probe_frames {
            self.probe_frames = v;
        }
        Ok(())
    }

    /// Unparseable values are ignored and the previous value kept.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("VIGIL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.signature_dim = env_parse(&var, "VIGIL_SIGNATURE_DIM", self.signature_dim);
        self.match_tolerance = env_parse(&var, "VIGIL_MATCH_TOLERANCE", self.match_tolerance);
        self.capture_secs = env_parse(&var, "VIGIL_CAPTURE_SECS", self.capture_secs);
        self.tick_ms = env_parse(&var, "VIGIL_TICK_MS", self.tick_ms);
        self.frame_timeout_ms = env_parse(&var, "VIGIL_FRAME_TIMEOUT_MS", self.frame_timeout_ms);
        self.probe_frames = env_parse(&var, "VIGIL_PROBE_FRAMES", self.probe_frames);
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.signature_dim > 0, "signature_dim must be positive");
        anyhow::ensure!(
            self.match_tolerance.is_finite() && self.match_tolerance >= 0.0,
            "match_tolerance must be a non-negative number"
        );
        anyhow::ensure!(self.tick_ms > 0, "tick_ms must be positive");
        anyhow::ensure!(self.frame_timeout_ms > 0, "frame_timeout_ms must be positive");
        anyhow::ensure!(
            self.tick_ms <= self.frame_timeout_ms,
            "tick_ms ({}) must not exceed frame_timeout_ms ({})",
            self.tick_ms,
            self.frame_timeout_ms
        );
        Ok(())
    }

    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs(self.capture_secs)
    }

    pub fn capture_policy(&self) -> vigil_capture::CapturePolicy {
        vigil_capture::CapturePolicy {
            tick: Duration::from_millis(self.tick_ms),
            frame_timeout: Duration::from_millis(self.frame_timeout_ms),
        }
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(current)
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
        .join("vigil")
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::defaults();
        assert_eq!(c.signature_dim, 128);
        assert!((c.match_tolerance - 0.6).abs() < f32::EPSILON);
        assert_eq!(c.capture_duration(), Duration::from_secs(60));
        assert_eq!(c.capture_policy().tick, Duration::from_millis(30));
        assert_eq!(c.frame_timeout(), Duration::from_millis(250));
        assert!(c.db_path.ends_with("vigil/vigil.db"));
        c.validate().unwrap();
    }

    #[test]
    fn test_file_then_env_precedence() {
        let mut c = Config::defaults();
        c.apply_file(
            "db_path = \"/srv/vigil.db\"\nmatch_tolerance = 0.5\ncapture_secs = 10\n",
            Path::new("test.toml"),
        )
        .unwrap();
        c.apply_env(env(&[("VIGIL_CAPTURE_SECS", "5"), ("VIGIL_PROBE_FRAMES", "9")]));

        assert_eq!(c.db_path, PathBuf::from("/srv/vigil.db"));
        assert!((c.match_tolerance - 0.5).abs() < f32::EPSILON);
        assert_eq!(c.capture_secs, 5);
        assert_eq!(c.probe_frames, 9);
        assert_eq!(c.tick_ms, 30);
    }

    #[test]
    fn test_bad_env_value_is_ignored() {
        let mut c = Config::defaults();
        c.apply_env(env(&[("VIGIL_SIGNATURE_DIM", "lots"), ("VIGIL_TICK_MS", " 40 ")]));
        assert_eq!(c.signature_dim, 128);
        assert_eq!(c.tick_ms, 40);
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let mut c = Config::defaults();
        assert!(c.apply_file("tolerance = 1.0\n", Path::new("test.toml")).is_err());
    }

    #[test]
    fn test_validate_rejects_tick_above_frame_timeout() {
        let mut c = Config::defaults();
        c.apply_env(env(&[("VIGIL_TICK_MS", "300")]));
        assert!(c.validate().is_err());

        c.apply_env(env(&[("VIGIL_FRAME_TIMEOUT_MS", "300")]));
        c.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_dim() {
        let mut c = Config::defaults();
        c.signature_dim = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_apply_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(&path, "signature_dim = 4\n").unwrap();

        let mut c = Config::defaults();
        c.apply_file(&std::fs::read_to_string(&path).unwrap(), &path).unwrap();
        assert_eq!(c.signature_dim, 4);
    }
}
