use super::Context;
use colored::Colorize;
use std::io::Write;

fn confirm(deployment: &str) -> anyhow::Result<bool> {
    print!(
        "デプロイメント '{}' の全リソースを削除します。よろしいですか？ [y/N]: ",
        deployment
    );
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub async fn handle(ctx: &Context, yes: bool) -> anyhow::Result<()> {
    // JSON モードでは対話できないので --yes 必須
    if ctx.json && !yes {
        anyhow::bail!("--json では --yes を指定してください");
    }
    if !yes && !confirm(ctx.deployment_name())? {
        println!("{}", "中止しました".dimmed());
        return Ok(());
    }

    ctx.progress(format!(
        "デプロイメント '{}' を削除中...",
        ctx.deployment_name()
    ));
    let report = ctx.deployment.teardown().destroy_deployment().await?;

    if !ctx.emit_json(&report)? {
        println!();
        for step in &report.destroyed {
            println!("  {} [{}] {}", "✓".green(), step.stage, step.target);
        }
        for step in &report.failed {
            println!(
                "  {} [{}] {}: {}",
                "✗".red(),
                step.stage,
                step.target,
                step.error.as_deref().unwrap_or("unknown error")
            );
        }
        println!();
        if report.is_success() {
            println!(
                "{}",
                format!(
                    "✓ 削除完了 ({} 件, {}ms)",
                    report.destroyed.len(),
                    report.duration_ms
                )
                .green()
                .bold()
            );
        }
    }

    if let Some(stage) = report.halted_at {
        anyhow::bail!(
            "ステージ '{}' で {} 件の削除に失敗したため中断しました",
            stage,
            report.failed.len()
        );
    }
    if !report.is_success() {
        anyhow::bail!("{} 件の削除に失敗しました", report.failed.len());
    }
    Ok(())
}
