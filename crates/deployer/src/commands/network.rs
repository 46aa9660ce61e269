use super::Context;
use colored::Colorize;
use deployer_cloud::{Network, QualifiedName};

fn print_network(network: &Network) {
    println!(
        "  {} (datacenter: {})",
        network.name.cyan().bold(),
        network.datacenter_id.dimmed()
    );
    for subnet in &network.subnets {
        println!(
            "    • {} {} [{}] route-table: {}",
            subnet.id,
            subnet.cidr.to_string().green(),
            subnet.availability_zone,
            subnet.route_table_id.as_deref().unwrap_or("-").dimmed()
        );
    }
}

pub async fn provision(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("ネットワーク '{}' を作成中...", name));
    let network = ctx.deployment.networks().provision(name).await?;
    if ctx.emit_json(&network)? {
        return Ok(());
    }
    println!();
    println!("{}", "✓ ネットワークを作成しました".green().bold());
    print_network(&network);
    Ok(())
}

pub async fn discover(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    let found = ctx.deployment.networks().discover(name).await?;
    if ctx.emit_json(&found)? {
        return Ok(());
    }
    match found {
        Some(network) => print_network(&network),
        None => println!(
            "{}",
            format!("ℹ ネットワーク '{}' は存在しません", name).dimmed()
        ),
    }
    Ok(())
}

pub async fn expose(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("ネットワーク '{}' を公開中...", name));
    let gateway_id = ctx.deployment.networks().expose(name).await?;
    if ctx.emit_json(&serde_json::json!({ "network": name.to_string(), "internet_gateway": gateway_id }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ '{}' をインターネットゲートウェイ {} 経由で公開しました", name, gateway_id)
            .green()
            .bold()
    );
    Ok(())
}

pub async fn destroy(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("ネットワーク '{}' を削除中...", name));
    ctx.deployment.networks().destroy(name).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": name.to_string() }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ ネットワーク '{}' を削除しました", name).green().bold()
    );
    Ok(())
}

pub async fn colocated(ctx: &Context, subnets: &[String]) -> anyhow::Result<()> {
    let same = ctx.deployment.networks().colocated(subnets).await?;
    if ctx.emit_json(&serde_json::json!({ "subnets": subnets, "colocated": same }))? {
        return Ok(());
    }
    if same {
        println!("{}", "✓ 同じデータセンターにあります".green());
    } else {
        println!("{}", "⚠ 異なるデータセンターにまたがっています".yellow());
    }
    Ok(())
}
