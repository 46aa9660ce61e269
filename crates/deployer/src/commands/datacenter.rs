use super::Context;
use colored::Colorize;
use deployer_cloud::{Datacenter, Ipv4Cidr};

fn print_datacenter(dc: &Datacenter) {
    println!(
        "  {} {} ({})",
        dc.name.cyan().bold(),
        dc.cidr.to_string().green(),
        dc.id.dimmed()
    );
}

pub async fn provision(
    ctx: &Context,
    name: &str,
    prefix: Option<u8>,
    include: Vec<Ipv4Cidr>,
    mut exclude: Vec<Ipv4Cidr>,
) -> anyhow::Result<()> {
    ctx.progress(format!("データセンター '{}' を作成中...", name));

    let defaults = &ctx.deployment.settings().datacenter;
    let prefix = prefix.unwrap_or(defaults.prefix);
    let include = if include.is_empty() {
        defaults.include_ranges.clone()
    } else {
        include
    };
    exclude.extend(defaults.exclude_ranges.iter().copied());

    let dc = ctx
        .deployment
        .datacenters()
        .provision(name, prefix, &include, &exclude)
        .await?;

    if ctx.emit_json(&dc)? {
        return Ok(());
    }
    println!();
    println!("{}", "✓ データセンターを作成しました".green().bold());
    print_datacenter(&dc);
    Ok(())
}

pub async fn discover(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let found = ctx.deployment.datacenters().discover(name).await?;
    if ctx.emit_json(&found)? {
        return Ok(());
    }
    match found {
        Some(dc) => print_datacenter(&dc),
        None => println!(
            "{}",
            format!("ℹ データセンター '{}' は存在しません", name).dimmed()
        ),
    }
    Ok(())
}

pub async fn destroy(ctx: &Context, name: &str) -> anyhow::Result<()> {
    ctx.progress(format!("データセンター '{}' を削除中...", name));
    ctx.deployment.datacenters().destroy(name).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": name }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ データセンター '{}' を削除しました", name).green().bold()
    );
    Ok(())
}

pub async fn list(ctx: &Context) -> anyhow::Result<()> {
    let datacenters = ctx.deployment.datacenters().list().await?;
    if ctx.emit_json(&datacenters)? {
        return Ok(());
    }
    if datacenters.is_empty() {
        println!(
            "{}",
            format!(
                "ℹ デプロイメント '{}' にデータセンターはありません",
                ctx.deployment_name()
            )
            .dimmed()
        );
        return Ok(());
    }
    println!(
        "{}",
        format!("データセンター ({}):", datacenters.len()).bold()
    );
    for dc in &datacenters {
        print_datacenter(dc);
    }
    Ok(())
}
