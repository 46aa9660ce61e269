use super::Context;
use colored::Colorize;
use deployer_cloud::DnsRecord;

fn print_record(record: &DnsRecord) {
    println!(
        "  {} → {} (zone: {})",
        record.fqdn.cyan().bold(),
        record.target.green(),
        record.hosted_zone_id.dimmed()
    );
}

pub async fn provision(ctx: &Context, fqdn: &str, target: &str) -> anyhow::Result<()> {
    ctx.progress(format!("CNAME {} → {} を作成中...", fqdn, target));
    let record = ctx.deployment.dns().provision(fqdn, target).await?;
    if ctx.emit_json(&record)? {
        return Ok(());
    }
    println!();
    println!("{}", "✓ DNSレコードを作成しました".green().bold());
    print_record(&record);
    Ok(())
}

pub async fn discover(ctx: &Context, fqdn: &str) -> anyhow::Result<()> {
    let found = ctx.deployment.dns().discover(fqdn).await?;
    if ctx.emit_json(&found)? {
        return Ok(());
    }
    match found {
        Some(record) => print_record(&record),
        None => println!(
            "{}",
            format!("ℹ DNSレコード '{}' は存在しません", fqdn).dimmed()
        ),
    }
    Ok(())
}

pub async fn destroy(ctx: &Context, fqdn: &str) -> anyhow::Result<()> {
    ctx.progress(format!("DNSレコード '{}' を削除中...", fqdn));
    ctx.deployment.dns().destroy(fqdn).await?;
    if ctx.emit_json(&serde_json::json!({ "destroyed": fqdn }))? {
        return Ok(());
    }
    println!(
        "{}",
        format!("✓ DNSレコード '{}' を削除しました", fqdn)
            .green()
            .bold()
    );
    Ok(())
}
