use super::Context;
use colored::Colorize;
use deployer_cloud::{ManagedLoadBalancer, QualifiedName};

fn print_load_balancer(lb: &ManagedLoadBalancer) {
    println!("  {} ({})", lb.name.cyan().bold(), lb.balancer_name.dimmed());
    println!("    DNS: {}", lb.dns_name.green());
    if let Some(fqdn) = &lb.fqdn {
        println!("    CNAME: {}", fqdn.green());
    }
    println!("    サブネット: {}", lb.subnet_ids.join(", "));
    if let Some(group) = &lb.security_group_id {
        println!("    セキュリティグループ: {}", group);
    }
}

pub async fn provision(
    ctx: &Context,
    name: &QualifiedName,
    dns: Option<&str>,
) -> anyhow::Result<()> {
    ctx.progress(format!("ロードバランサー '{}' を作成中...", name));
    let lb = ctx.deployment.load_balancers().provision(name, dns).await?;
    if ctx.emit_json(&lb)? {
        return Ok(());
    }
    println!();
    println!("{}", "✓ ロードバランサーを作成しました".green().bold());
    print_load_balancer(&lb);
    Ok(())
}

pub async fn discover(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    let found = ctx.deployment.load_balancers().discover(name).await?;
    if ctx.emit_json(&found)? {
        return Ok(());
    }
    match found {
        Some(lb) => print_load_balancer(&lb),
        None => println!(
            "{}",
            format!("ℹ ロードバランサー '{}' は存在しません", name).dimmed()
        ),
    }
    Ok(())
}

pub async fn expose(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("ロードバランサー '{}' を開放中...", name));
    let group = ctx.deployment.load_balancers().expose(name).await?;
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
    ctx.progress(format!("ロードバランサー '{}' を削除中...", name));
    ctx.deployment.load_balancers().destroy(name).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": name.to_string() }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ ロードバランサー '{}' を削除しました", name)
            .green()
            .bold()
    );
    Ok(())
}
