use deployer_cloud::{CloudProvider, SandboxProvider};
use deployer_config::{DeployerConfig, ProviderKind};
use std::sync::Arc;
use tracing::debug;

/// 設定に従ってプロバイダーに接続する
pub async fn connect(config: &DeployerConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    debug!(provider = %config.provider, region = ?config.region, "connecting to provider");
    match config.provider {
        ProviderKind::Sandbox => Ok(Arc::new(SandboxProvider::new())),
        ProviderKind::Aws => connect_aws(config).await,
    }
}

#[cfg(feature = "aws-cloud")]
async fn connect_aws(config: &DeployerConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    let provider = deployer_cloud_aws::AwsProvider::from_env(config.region.as_deref()).await;
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "aws-cloud"))]
async fn connect_aws(_config: &DeployerConfig) -> anyhow::Result<Arc<dyn CloudProvider>> {
    anyhow::bail!(
        "AWS プロバイダーは無効です。`--features aws-cloud` を付けてビルドしてください"
    )
}
