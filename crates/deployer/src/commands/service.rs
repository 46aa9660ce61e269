use super::Context;
use anyhow::Context as _;
use colored::Colorize;
use deployer_cloud::service::fit_instance_type;
use deployer_cloud::{ComputeService, ImageArtifact, InstanceRequirements, QualifiedName};
use std::path::PathBuf;

/// `service provision` のオプション
pub struct ProvisionOptions {
    pub image: String,
    pub playbook: Option<String>,
    pub user_data: Option<PathBuf>,
    pub load_balancer: Option<QualifiedName>,
    pub capacity: Option<u32>,
    pub instance_type: Option<String>,
    pub cpus: Option<u32>,
    pub memory: Option<f64>,
}

impl ProvisionOptions {
    fn artifact(&self) -> anyhow::Result<ImageArtifact> {
        if let Some(repo) = &self.playbook {
            return Ok(ImageArtifact::with_playbook(&self.image, repo));
        }
        let script = match &self.user_data {
            Some(path) => std::fs::read_to_string(path).with_context(|| {
                format!("ユーザーデータを読み込めません: {}", path.display())
            })?,
            None => String::new(),
        };
        Ok(ImageArtifact::new(&self.image, script))
    }

    /// --instance-type > --cpus/--memory > 設定ファイル の順
    fn instance_type(&self, configured: Option<&str>) -> anyhow::Result<Option<String>> {
        if let Some(fixed) = &self.instance_type {
            return Ok(Some(fixed.clone()));
        }
        let requirements = InstanceRequirements {
            cpus: self.cpus,
            memory_gib: self.memory,
            storage_gib: None,
        };
        if requirements.is_empty() {
            return Ok(configured.map(str::to_string));
        }
        Ok(Some(fit_instance_type(&requirements)?.to_string()))
    }
}

fn print_service(service: &ComputeService) {
    println!(
        "  {} (Auto Scaling グループ: {})",
        service.name.cyan().bold(),
        service.auto_scaling_group.dimmed()
    );
    if let Some(lc) = &service.launch_configuration {
        println!("    起動設定: {}", lc);
    }
    println!("    インスタンス数: {}", service.desired_capacity);
    println!("    サブネット: {}", service.subnet_ids.join(", "));
    if !service.load_balancers.is_empty() {
        println!("    ロードバランサー: {}", service.load_balancers.join(", "));
    }
    if let Some(group) = &service.security_group_id {
        println!("    セキュリティグループ: {}", group);
    }
}

pub async fn provision(
    ctx: &Context,
    name: &QualifiedName,
    options: ProvisionOptions,
) -> anyhow::Result<()> {
    let artifact = options.artifact()?;

    let mut settings = ctx.deployment.settings().clone();
    settings.service.instance_type =
        options.instance_type(settings.service.instance_type.as_deref())?;
    if let Some(capacity) = options.capacity {
        settings.service.capacity = capacity;
    }

    ctx.progress(format!(
        "サービス '{}' をイメージ {} で起動中...",
        name, artifact.image_id
    ));
    if let Some(instance_type) = &settings.service.instance_type
        && !ctx.json
    {
        println!("インスタンスタイプ: {}", instance_type.cyan());
    }

    let deployment = ctx.deployment_with(settings);
    let service = deployment
        .services()
        .provision(name, &artifact, options.load_balancer.as_ref())
        .await?;

    if ctx.emit_json(&service)? {
        return Ok(());
    }
    println!();
    println!("{}", "✓ サービスを起動しました".green().bold());
    print_service(&service);
    Ok(())
}

pub async fn discover(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    let found = ctx.deployment.services().discover(name).await?;
    if ctx.emit_json(&found)? {
        return Ok(());
    }
    match found {
        Some(service) => print_service(&service),
        None => println!(
            "{}",
            format!("ℹ サービス '{}' は存在しません", name).dimmed()
        ),
    }
    Ok(())
}

pub async fn allow(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("サービス '{}' を開放中...", name));
    let group = ctx.deployment.services().allow(name).await?;
    if ctx.emit_json(&group)? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ セキュリティグループ {} を開放しました", group.id)
            .green()
            .bold()
    );
    Ok(())
}

pub async fn destroy(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("サービス '{}' を削除中...", name));
    ctx.deployment.services().destroy(name).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": name.to_string() }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ サービス '{}' を削除しました", name).green().bold()
    );
    Ok(())
}
