use super::Context;
use colored::Colorize;
use deployer_cloud::QualifiedName;
use deployer_cloud::resource::NatGateway;

fn print_gateways(gateways: &[NatGateway]) {
    for gateway in gateways {
        println!(
            "  • {} subnet: {} state: {:?}",
            gateway.id.cyan(),
            gateway.subnet_id,
            gateway.state
        );
    }
}

pub async fn provision(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("'{}' に NAT ゲートウェイを作成中...", name));
    let gateways = ctx.deployment.nat_gateways().provision(name).await?;
    if ctx.emit_json(&gateways)? {
        return Ok(());
    }
    println!();
    println!(
        "{}",
        format!("✓ NAT ゲートウェイを {} 個作成しました", gateways.len())
            .green()
            .bold()
    );
    print_gateways(&gateways);
    Ok(())
}

pub async fn discover(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    let gateways = ctx.deployment.nat_gateways().discover(name).await?;
    if ctx.emit_json(&gateways)? {
        return Ok(());
    }
    if gateways.is_empty() {
        println!(
            "{}",
            format!("ℹ '{}' に NAT ゲートウェイはありません", name).dimmed()
        );
    } else {
        print_gateways(&gateways);
    }
    Ok(())
}

pub async fn destroy(ctx: &Context, name: &QualifiedName) -> anyhow::Result<()> {
    ctx.progress(format!("'{}' の NAT ゲートウェイを削除中...", name));
    ctx.deployment.nat_gateways().destroy(name).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": name.to_string() }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ '{}' の NAT ゲートウェイを削除しました", name)
            .green()
            .bold()
    );
    Ok(())
}
