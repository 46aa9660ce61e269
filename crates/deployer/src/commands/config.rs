use colored::Colorize;
use deployer_config::DeployerConfig;
use std::path::Path;

fn join<T: ToString>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// 有効な設定 (ファイル + 環境変数 + CLI フラグ) を表示
pub fn handle(config: &DeployerConfig, path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("{}", "有効な設定:".green().bold());
    match path {
        Some(path) => println!("  ファイル: {}", path.display().to_string().cyan()),
        None => println!("  ファイル: {}", "なし".dimmed()),
    }
    println!("  deployment: {}", config.deployment.cyan());
    println!("  provider: {}", config.provider.to_string().cyan());
    println!(
        "  region: {}",
        config.region.as_deref().unwrap_or("(SDK 既定)")
    );
    println!(
        "  retry: {} 回 / {}ms 間隔",
        config.retry.count, config.retry.delay_ms
    );

    println!();
    println!("{}", "datacenter:".bold());
    println!("  prefix: /{}", config.datacenter.prefix);
    println!("  include: {}", join(&config.datacenter.include_ranges));
    println!("  exclude: {}", join(&config.datacenter.exclude_ranges));

    println!();
    println!("{}", "network:".bold());
    println!("  subnet_prefix: /{}", config.network.subnet_prefix);
    println!(
        "  subnets_per_network: {}",
        config.network.subnets_per_network
    );
    println!(
        "  availability_zones: {}",
        join(&config.network.availability_zones)
    );

    println!();
    println!("{}", "service:".bold());
    println!("  capacity: {}", config.service.capacity);
    println!(
        "  instance_type: {}",
        config.service.instance_type.as_deref().unwrap_or("(要件から選択)")
    );

    Ok(())
}
