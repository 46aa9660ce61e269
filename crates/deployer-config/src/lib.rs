pub mod error;

pub use error::*;

use deployer_cloud::{
    DatacenterDefaults, DeploymentSettings, NetworkDefaults, RetryConfig, ServiceDefaults,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 設定ファイルを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "DEPLOYER_CONFIG_PATH";

/// カレントディレクトリ・.deployer/ 内で探すファイル名 (優先順)
const CANDIDATES: [&str; 2] = ["deployer.yaml", ".deployer.yaml"];

/// Deployerの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("deployer");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// プロジェクトのdeployer.yamlを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 DEPLOYER_CONFIG_PATH (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: deployer.yaml, .deployer.yaml
/// 3. ./.deployer/ ディレクトリ内: deployer.yaml
/// 4. ~/.config/deployer/deployer.yaml (グローバル設定)
///
/// どこにも無ければ `Ok(None)`。呼び出し側はデフォルト設定を使う。
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    // 3. ./.deployer/ ディレクトリで検索
    let path = current_dir.join(".deployer").join("deployer.yaml");
    if path.is_file() {
        return Ok(Some(path));
    }

    // 4. グローバル設定ファイル (~/.config/deployer/deployer.yaml)
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("deployer").join("deployer.yaml");
        if global_config.is_file() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// リソースを作成・削除するバックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    /// インメモリのリハーサル用プロバイダー
    #[default]
    Sandbox,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(ProviderKind::Aws),
            "sandbox" => Ok(ProviderKind::Sandbox),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// 整合性待ちのリトライ設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 最初の試行を含む最大試行回数
    pub count: u32,
    /// 試行間の待ち時間 (ミリ秒)
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            count: retry.max_attempts,
            delay_ms: retry.delay.as_millis() as u64,
        }
    }
}

/// deployer.yaml の内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// デプロイメントスコープ名 (deployment タグの値)
    pub deployment: String,
    pub provider: ProviderKind,
    /// 未指定時は AWS SDK の標準の解決順に従う
    pub region: Option<String>,
    pub retry: RetrySection,
    pub datacenter: DatacenterDefaults,
    pub network: NetworkDefaults,
    pub service: ServiceDefaults,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            deployment: "default".to_string(),
            provider: ProviderKind::default(),
            region: None,
            retry: RetrySection::default(),
            datacenter: DatacenterDefaults::default(),
            network: NetworkDefaults::default(),
            service: ServiceDefaults::default(),
        }
    }
}

impl DeployerConfig {
    /// 設定ファイルを探して読み込む。見つからなければデフォルト設定。
    ///
    /// 戻り値の2番目は読み込んだファイルのパス
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        match find_config_file()? {
            Some(path) => Ok((Self::load_from(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// 指定パスの設定ファイルを読み込む
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        // 空ファイルはデフォルト設定として扱う
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// CLI フラグによる上書き
    pub fn with_overrides(mut self, deployment: Option<String>, provider: Option<ProviderKind>) -> Self {
        if let Some(deployment) = deployment {
            self.deployment = deployment;
        }
        if let Some(provider) = provider {
            self.provider = provider;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.deployment.trim().is_empty() {
            return Err(ConfigError::Invalid("deployment が空です".to_string()));
        }
        if self.retry.count == 0 {
            return Err(ConfigError::Invalid(
                "retry.count は 1 以上を指定してください".to_string(),
            ));
        }
        if self.datacenter.prefix > 32 || self.network.subnet_prefix > 32 {
            return Err(ConfigError::Invalid(
                "プレフィックス長は 0-32 で指定してください".to_string(),
            ));
        }
        if self.network.subnet_prefix < self.datacenter.prefix {
            return Err(ConfigError::Invalid(format!(
                "network.subnet_prefix (/{}) が datacenter.prefix (/{}) より大きなブロックです",
                self.network.subnet_prefix, self.datacenter.prefix
            )));
        }
        if self.datacenter.include_ranges.is_empty() {
            return Err(ConfigError::Invalid(
                "datacenter.include_ranges が空です".to_string(),
            ));
        }
        if self.network.subnets_per_network == 0 {
            return Err(ConfigError::Invalid(
                "network.subnets_per_network は 1 以上を指定してください".to_string(),
            ));
        }
        Ok(())
    }

    /// エンジンに渡す設定へ変換
    pub fn deployment_settings(&self) -> DeploymentSettings {
        DeploymentSettings {
            name: self.deployment.clone(),
            retry: RetryConfig::new(self.retry.count, Duration::from_millis(self.retry.delay_ms)),
            datacenter: self.datacenter.clone(),
            network: self.network.clone(),
            service: self.service.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deployer_cloud::Ipv4Cidr;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("deployer"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        // deployer.yamlを作成
        fs::write(temp_dir.path().join("deployer.yaml"), "deployment: test\n").unwrap();

        // テンポラリディレクトリに移動
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.unwrap().ends_with("deployer.yaml"));

        // 元のディレクトリに戻る
        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_visible_file_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        // deployer.yaml と .deployer.yaml の両方を作成
        fs::write(temp_dir.path().join("deployer.yaml"), "# visible").unwrap();
        fs::write(temp_dir.path().join(".deployer.yaml"), "# hidden").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap().unwrap();

        // deployer.yaml が優先される
        assert!(result.ends_with("deployer.yaml"));
        assert!(!result.ends_with(".deployer.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_deployer_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        // .deployer/ ディレクトリを作成
        let deployer_dir = temp_dir.path().join(".deployer");
        fs::create_dir(&deployer_dir).unwrap();
        fs::write(deployer_dir.join("deployer.yaml"), "# in deployer dir").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap().unwrap();
        assert!(result.ends_with(".deployer/deployer.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "deployment: custom\n").unwrap();

        // 環境変数を設定
        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        }

        let result = find_config_file().unwrap();
        assert_eq!(result, Some(config_path));

        // クリーンアップ
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_env_var_pointing_nowhere_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing.yaml");

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, missing.to_str().unwrap());
        }

        let result = find_config_file();
        assert!(matches!(result, Err(ConfigError::ConfigFileNotFound(path)) if path == missing));

        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_load_falls_back_to_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        // 空のディレクトリに移動
        std::env::set_current_dir(&temp_dir).unwrap();

        // グローバル設定が存在する環境では結果が変わるため、その場合は比較しない
        let (config, path) = DeployerConfig::load().unwrap();
        if path.is_none() {
            assert_eq!(config, DeployerConfig::default());
        }

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    fn test_load_full_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("deployer.yaml");
        fs::write(
            &path,
            r#"
deployment: staging
provider: aws
region: ap-northeast-1
retry:
  count: 20
  delay_ms: 500
datacenter:
  prefix: 20
  include_ranges: ["172.16.0.0/12"]
  exclude_ranges: ["172.16.0.0/16"]
network:
  subnet_prefix: 24
  subnets_per_network: 2
  availability_zones: [ap-northeast-1a, ap-northeast-1c]
service:
  capacity: 5
  instance_type: m5.large
"#,
        )
        .unwrap();

        let config = DeployerConfig::load_from(&path).unwrap();
        assert_eq!(config.deployment, "staging");
        assert_eq!(config.provider, ProviderKind::Aws);
        assert_eq!(config.region.as_deref(), Some("ap-northeast-1"));
        assert_eq!(config.datacenter.prefix, 20);
        assert_eq!(
            config.datacenter.exclude_ranges,
            vec!["172.16.0.0/16".parse::<Ipv4Cidr>().unwrap()]
        );
        assert_eq!(config.network.availability_zones.len(), 2);
        assert_eq!(config.service.instance_type.as_deref(), Some("m5.large"));

        let settings = config.deployment_settings();
        assert_eq!(settings.name, "staging");
        assert_eq!(settings.retry.max_attempts, 20);
        assert_eq!(settings.retry.delay, Duration::from_millis(500));
        assert_eq!(settings.service.capacity, 5);
        assert_eq!(settings.network.subnet_prefix, 24);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("deployer.yaml");
        fs::write(&path, "deployment: qa\nnetwork:\n  subnets_per_network: 2\n").unwrap();

        let config = DeployerConfig::load_from(&path).unwrap();
        assert_eq!(config.deployment, "qa");
        assert_eq!(config.provider, ProviderKind::Sandbox);
        assert_eq!(config.network.subnets_per_network, 2);
        assert_eq!(config.network.subnet_prefix, 28);
        assert_eq!(config.datacenter, DatacenterDefaults::default());
        assert_eq!(config.retry, RetrySection::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("deployer.yaml");
        fs::write(&path, "\n").unwrap();

        assert_eq!(DeployerConfig::load_from(&path).unwrap(), DeployerConfig::default());
    }

    #[test]
    fn test_bad_cidr_is_a_parse_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("deployer.yaml");
        fs::write(&path, "datacenter:\n  include_ranges: [\"10.0.0.1/8\"]\n").unwrap();

        let err = DeployerConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("deployer.yaml");
        fs::write(&path, "retry:\n  count: 0\n").unwrap();
        assert!(matches!(
            DeployerConfig::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, "datacenter:\n  prefix: 24\nnetwork:\n  subnet_prefix: 16\n").unwrap();
        assert!(matches!(
            DeployerConfig::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let config = DeployerConfig::default().with_overrides(Some("prod".to_string()), None);
        assert_eq!(config.deployment, "prod");
        assert_eq!(config.provider, ProviderKind::Sandbox);

        let config = config.with_overrides(None, Some(ProviderKind::Aws));
        assert_eq!(config.deployment, "prod");
        assert_eq!(config.provider, ProviderKind::Aws);
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("aws".parse::<ProviderKind>().unwrap(), ProviderKind::Aws);
        assert_eq!("Sandbox".parse::<ProviderKind>().unwrap(), ProviderKind::Sandbox);
        assert!(matches!(
            "gcp".parse::<ProviderKind>(),
            Err(ConfigError::UnknownProvider(name)) if name == "gcp"
        ));
    }
}
