pub mod config;
pub mod datacenter;
pub mod dns;
pub mod load_balancer;
pub mod nat;
pub mod network;
pub mod service;
pub mod teardown;

use deployer_cloud::{CloudProvider, Deployment, DeploymentSettings};
use deployer_config::DeployerConfig;
use serde::Serialize;
use std::sync::Arc;

/// コマンド共通の実行コンテキスト
pub struct Context {
    provider: Arc<dyn CloudProvider>,
    pub deployment: Deployment,
    /// 結果を JSON で出力するか
    pub json: bool,
}

impl Context {
    pub fn new(provider: Arc<dyn CloudProvider>, config: &DeployerConfig, json: bool) -> Self {
        Self {
            deployment: Deployment::new(provider.clone(), config.deployment_settings()),
            provider,
            json,
        }
    }

    /// 同じプロバイダーで設定だけ差し替えたデプロイメント
    pub fn deployment_with(&self, settings: DeploymentSettings) -> Deployment {
        Deployment::new(self.provider.clone(), settings)
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment.settings().name
    }

    /// JSON モードなら value を出力して true を返す
    pub fn emit_json<T: Serialize>(&self, value: &T) -> anyhow::Result<bool> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(self.json)
    }

    /// JSON モードでなければ進捗メッセージを表示
    pub fn progress(&self, message: impl AsRef<str>) {
        if !self.json {
            use colored::Colorize;
            println!("{}", message.as_ref().yellow());
        }
    }
}
