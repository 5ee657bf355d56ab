//! converge エンジンの設定
//!
//! `converge.yaml` を探し、エンジンのデフォルト値に上書きを適用して
//! そのまま使えるエンジンの型を返す。

pub mod error;
pub mod file;

pub use error::*;
pub use file::{BudgetsFile, ClassifierFile, ConfigFile, ProfileFile, RateLimitFile};

use converge_engine::{
    Backoff, BudgetProfile, Budgets, ControlPlane, ErrorClassifier, MAX_DEADLINE, OperationClass,
    RateGate, Reconciler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// 設定ファイルの直接パス
pub const CONFIG_PATH_ENV: &str = "CONVERGE_CONFIG_PATH";

/// すべての期限に掛ける倍率
pub const TIMEOUT_SCALE_ENV: &str = "CONVERGE_TIMEOUT_SCALE";

/// `CONVERGE_TIMEOUT_SCALE` の上限値
pub const MAX_TIMEOUT_SCALE: f64 = 1000.0;

const CONFIG_FILE_NAME: &str = "converge.yaml";
const PROJECT_DIR_NAME: &str = ".converge";
const APP_DIR_NAME: &str = "converge";

/// グローバル設定ディレクトリ (`<config_dir>/converge`)。なければ作成する
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join(APP_DIR_NAME);

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 `CONVERGE_CONFIG_PATH` (直接パス指定)
/// 2. カレントディレクトリ: `./converge.yaml`
/// 3. `./.converge/converge.yaml`
/// 4. `<config_dir>/converge/converge.yaml` (グローバル設定)
///
/// どれも見つからなければ `Ok(None)` を返し、デフォルト値を使う。
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!(
            "{} points to {}, which does not exist; searching further",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;
    let candidates = [
        current_dir.join(CONFIG_FILE_NAME),
        current_dir.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME),
    ];
    if let Some(path) = candidates.into_iter().find(|p| p.is_file()) {
        return Ok(Some(path));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME);
        if global_config.is_file() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// `CONVERGE_TIMEOUT_SCALE` から期限の倍率を読む (未設定なら `None`)
pub fn timeout_scale_from_env() -> Result<Option<f64>> {
    let Ok(raw) = std::env::var(TIMEOUT_SCALE_ENV) else {
        return Ok(None);
    };
    let scale: f64 = raw.trim().parse().map_err(|_| {
        ConfigError::Invalid(format!("{} must be a number, got {:?}", TIMEOUT_SCALE_ENV, raw))
    })?;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be a positive number, got {}",
            TIMEOUT_SCALE_ENV, scale
        )));
    }
    if scale > MAX_TIMEOUT_SCALE {
        return Err(ConfigError::Invalid(format!(
            "{} must be at most {}, got {}",
            TIMEOUT_SCALE_ENV, MAX_TIMEOUT_SCALE, scale
        )));
    }
    Ok(Some(scale))
}

/// クライアント以外に [`Reconciler`] が必要とする設定一式
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub budgets: Budgets,
    pub classifier: ErrorClassifier,
    pub rate_interval: Duration,
    /// 読み込んだ設定ファイル (あれば)
    pub source: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            budgets: Budgets::default(),
            classifier: ErrorClassifier::default(),
            rate_interval: converge_engine::rate_limit::DEFAULT_INTERVAL,
            source: None,
        }
    }
}

impl EngineConfig {
    /// [`find_config_file`] が返すファイル (なければデフォルト値) を読み込み、
    /// `CONVERGE_TIMEOUT_SCALE` を適用する
    pub fn load() -> Result<Self> {
        let config = match find_config_file()? {
            Some(path) => Self::read(&path)?,
            None => {
                tracing::debug!("No {} found, using default budgets", CONFIG_FILE_NAME);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// 指定したファイルを読み込み、`CONVERGE_TIMEOUT_SCALE` を適用する
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::read(path.as_ref())?.with_env_overrides()
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = ConfigFile::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded converge config from {}", path.display());

        let mut config = Self::from_file(&file)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// パース済みのファイルをデフォルト値に上書きする
    pub fn from_file(file: &ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backoff) = file.backoff {
            validate_backoff(&backoff)?;
            config.budgets = config.budgets.with_backoff(backoff);
        }

        if let Some(read) = file.budgets.read {
            config.budgets.read.deadline = seconds("budgets.read", read)?;
        }
        for (class, profile) in [
            (OperationClass::Lightweight, &file.budgets.lightweight),
            (OperationClass::Provisioning, &file.budgets.provisioning),
            (
                OperationClass::HeavyProvisioning,
                &file.budgets.heavy_provisioning,
            ),
        ] {
            apply_profile(config.budgets.profile_mut(class), class, profile)?;
        }

        if let Some(rate_limit) = &file.rate_limit {
            config.rate_interval = Duration::from_millis(rate_limit.interval_ms);
        }

        config.classifier = build_classifier(&file.classifier);
        Ok(config)
    }

    /// `CONVERGE_TIMEOUT_SCALE` が設定されていれば全期限に掛ける
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(scale) = timeout_scale_from_env()? {
            tracing::info!("Scaling every deadline by {}", scale);
            self.budgets = self.budgets.scaled(scale);
        }
        Ok(self)
    }

    pub fn rate_gate(&self) -> Arc<RateGate> {
        Arc::new(RateGate::new(self.rate_interval))
    }

    /// この設定の予算と分類器、新しいレートゲートを持つ Reconciler を作る
    ///
    /// 同じ API を叩く Reconciler 同士はゲートを共有すること。
    /// その場合は戻り値に [`Reconciler::with_rate_gate`] を使う。
    pub fn reconciler<C: ControlPlane + ?Sized>(&self, client: Arc<C>) -> Reconciler<C> {
        Reconciler::new(client)
            .with_budgets(self.budgets)
            .with_classifier(Arc::new(self.classifier.clone()))
            .with_rate_gate(self.rate_gate())
    }
}

fn seconds(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!("{} must be at least 1 second", key)));
    }
    if secs > MAX_DEADLINE.as_secs() {
        return Err(ConfigError::Invalid(format!(
            "{} must be at most {} seconds, got {}",
            key,
            MAX_DEADLINE.as_secs(),
            secs
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn apply_profile(target: &mut BudgetProfile, class: OperationClass, file: &ProfileFile) -> Result<()> {
    if let Some(submit) = file.submit {
        target.submit.deadline = seconds(&format!("budgets.{}.submit", class), submit)?;
    }
    if let Some(poll) = file.poll {
        target.poll.deadline = seconds(&format!("budgets.{}.poll", class), poll)?;
    }
    if let Some(converge) = file.converge {
        target.converge.deadline = seconds(&format!("budgets.{}.converge", class), converge)?;
    }
    Ok(())
}

fn validate_backoff(backoff: &Backoff) -> Result<()> {
    match *backoff {
        Backoff::Fixed { .. } => Ok(()),
        Backoff::Exponential {
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        } => {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!(
                    "backoff.multiplier must be at least 1.0, got {}",
                    multiplier
                )));
            }
            if initial_delay_ms > max_delay_ms {
                return Err(ConfigError::Invalid(format!(
                    "backoff.initial_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                    initial_delay_ms, max_delay_ms
                )));
            }
            Ok(())
        }
    }
}

fn build_classifier(file: &ClassifierFile) -> ErrorClassifier {
    let builder = ErrorClassifier::builder();
    let builder = file
        .not_found
        .iter()
        .fold(builder, |b, code| b.not_found(code.as_str()));
    let builder = file.fatal.iter().fold(builder, |b, code| b.fatal(code.as_str()));
    file.retryable
        .iter()
        .fold(builder, |b, code| b.retryable(code.as_str()))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_engine::{Classification, ErrorPath, RemoteError};
    use serial_test::serial;
    use std::fs;

    const SAMPLE: &str = r#"
budgets:
  read: 60
  provisioning:
    poll: 1800
backoff:
  kind: exponential
  initial_delay_ms: 500
  max_delay_ms: 5000
  multiplier: 3.0
rate_limit:
  interval_ms: 200
classifier:
  retryable: ["FailedOperation.CdbInstanceLocked"]
  not_found: ["FailedOperation.InstanceDeleted"]
"#;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("converge"));
        assert!(config_dir.exists());
    }

    #[test]
    fn test_from_file_overrides_only_given_keys() {
        let file = ConfigFile::from_yaml(SAMPLE).unwrap();
        let config = EngineConfig::from_file(&file).unwrap();
        let defaults = Budgets::default();

        assert_eq!(config.budgets.read.deadline, Duration::from_secs(60));
        assert_eq!(config.budgets.provisioning.poll.deadline, Duration::from_secs(1800));
        assert_eq!(
            config.budgets.provisioning.submit.deadline,
            defaults.provisioning.submit.deadline
        );
        assert_eq!(
            config.budgets.heavy_provisioning.poll.deadline,
            defaults.heavy_provisioning.poll.deadline
        );
        assert_eq!(
            config.budgets.lightweight.converge.backoff,
            Backoff::Exponential {
                initial_delay_ms: 500,
                max_delay_ms: 5000,
                multiplier: 3.0
            }
        );
        assert_eq!(config.rate_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_classifier_extensions() {
        let file = ConfigFile::from_yaml(SAMPLE).unwrap();
        let config = EngineConfig::from_file(&file).unwrap();

        let deleted = RemoteError::new("FailedOperation.InstanceDeleted", "gone");
        assert_eq!(
            config.classifier.classify(&deleted, ErrorPath::DeleteConfirmation),
            Classification::Absent
        );
        let locked = RemoteError::new("FailedOperation.CdbInstanceLocked", "locked");
        assert_eq!(
            config.classifier.classify(&locked, ErrorPath::Validation),
            Classification::Retryable
        );
        // デフォルト値は残る
        let denied = RemoteError::new("AuthFailure.SignatureExpire", "expired");
        assert_eq!(
            config.classifier.classify(&denied, ErrorPath::Write),
            Classification::Fatal
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero = ConfigFile::from_yaml("budgets:\n  lightweight:\n    submit: 0\n").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&zero),
            Err(ConfigError::Invalid(msg)) if msg.contains("budgets.lightweight.submit")
        ));

        let shrinking = ConfigFile::from_yaml(
            "backoff:\n  kind: exponential\n  initial_delay_ms: 100\n  max_delay_ms: 1000\n  multiplier: 0.5\n",
        )
        .unwrap();
        assert!(matches!(
            EngineConfig::from_file(&shrinking),
            Err(ConfigError::Invalid(_))
        ));

        let huge =
            ConfigFile::from_yaml("budgets:\n  provisioning:\n    poll: 18446744073709551615\n")
                .unwrap();
        assert!(matches!(
            EngineConfig::from_file(&huge),
            Err(ConfigError::Invalid(msg)) if msg.contains("budgets.provisioning.poll")
        ));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("converge.yaml"), "{}").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().unwrap().ends_with("converge.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        let project_dir = temp_dir.path().join(".converge");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join("converge.yaml"), "{}").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().unwrap().ends_with(".converge/converge.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "{}").unwrap();

        let result = temp_env::with_var(CONFIG_PATH_ENV, Some(&custom), find_config_file);
        assert_eq!(result.unwrap(), Some(custom));
    }

    #[test]
    #[serial]
    fn test_load_from_applies_timeout_scale() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("converge.yaml");
        fs::write(&path, SAMPLE).unwrap();

        let config = temp_env::with_var(TIMEOUT_SCALE_ENV, Some("2.5"), || {
            EngineConfig::load_from(&path)
        })
        .unwrap();

        assert_eq!(config.budgets.read.deadline, Duration::from_secs(150));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    #[serial]
    fn test_bad_timeout_scale_is_rejected() {
        for raw in ["fast", "0", "-1", "NaN", "inf", "1e20", "1000.5"] {
            let result = temp_env::with_var(TIMEOUT_SCALE_ENV, Some(raw), timeout_scale_from_env);
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "{} should be rejected",
                raw
            );
        }
        let unset = temp_env::with_var_unset(TIMEOUT_SCALE_ENV, timeout_scale_from_env);
        assert_eq!(unset.unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_parse_error_names_the_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("converge.yaml");
        fs::write(&path, "budgets: [not, a, map]").unwrap();

        let err = temp_env::with_var_unset(TIMEOUT_SCALE_ENV, || EngineConfig::load_from(&path))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("converge.yaml"));
    }

    #[test]
    #[serial]
    fn test_load_without_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = temp_env::with_vars_unset([CONFIG_PATH_ENV, TIMEOUT_SCALE_ENV], || {
            find_config_file().map(|found| (found, EngineConfig::load()))
        });
        std::env::set_current_dir(original_dir).unwrap();

        let (found, config) = result.unwrap();
        // ホストにグローバル設定があるとここで拾われる
        if found.is_none() {
            let config = config.unwrap();
            assert_eq!(config.budgets, Budgets::default());
            assert!(config.source.is_none());
        }
    }

    #[test]
    fn test_reconciler_uses_configured_gate() {
        let file = ConfigFile::from_yaml(SAMPLE).unwrap();
        let config = EngineConfig::from_file(&file).unwrap();
        let client = Arc::new(converge_engine::testing::ScriptedControlPlane::new());

        let reconciler = config.reconciler(client);
        assert_eq!(reconciler.rate_gate().interval(), Duration::from_millis(200));
        assert_eq!(reconciler.budgets().read.deadline, Duration::from_secs(60));
    }
}
