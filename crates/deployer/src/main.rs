mod commands;
mod provider;

use clap::{Parser, Subcommand};
use colored::Colorize;
use deployer_cloud::{Ipv4Cidr, QualifiedName};
use deployer_config::{DeployerConfig, ProviderKind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "ネットワークから DNS まで、クラウド環境を組み立てて片付ける", long_about = None)]
struct Cli {
    /// デプロイメントスコープ名 (設定ファイルの deployment を上書き)
    #[arg(short, long, global = true, env = "DEPLOYER_DEPLOYMENT")]
    deployment: Option<String>,

    /// プロバイダー (aws, sandbox)。sandbox はインメモリのリハーサル
    #[arg(short, long, global = true, env = "DEPLOYER_PROVIDER")]
    provider: Option<ProviderKind>,

    /// 結果を JSON で出力
    #[arg(long, global = true)]
    json: bool,

    /// デバッグログを表示
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// データセンター (VPC) を操作
    #[command(subcommand)]
    Datacenter(DatacenterCommands),
    /// ネットワーク (サブネット群) を操作
    #[command(subcommand)]
    Network(NetworkCommands),
    /// ロードバランサーを操作
    #[command(subcommand)]
    Lb(LoadBalancerCommands),
    /// NATゲートウェイを操作
    #[command(subcommand)]
    Nat(NatCommands),
    /// コンピュートサービス (Auto Scaling グループ) を操作
    #[command(subcommand)]
    Service(ServiceCommands),
    /// DNSレコード (CNAME) を操作
    #[command(subcommand)]
    Dns(DnsCommands),
    /// デプロイメント内の全リソースを葉から順に削除
    Teardown {
        /// 確認なしで実行
        #[arg(short, long)]
        yes: bool,
    },
    /// 有効な設定を表示
    Config,
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum DatacenterCommands {
    /// データセンターを作成し、アドレスブロックを割り当てる
    Provision {
        /// データセンター名 (例: dc-a)
        name: String,
        /// 割り当てるブロックのプレフィックス長
        #[arg(long)]
        prefix: Option<u8>,
        /// 割り当て元のアドレス範囲 (複数指定可)
        #[arg(long = "include")]
        include: Vec<Ipv4Cidr>,
        /// 避けるアドレス範囲 (複数指定可)
        #[arg(long = "exclude")]
        exclude: Vec<Ipv4Cidr>,
    },
    /// データセンターを検索
    Discover { name: String },
    /// データセンターを削除
    Destroy { name: String },
    /// デプロイメント内のデータセンター一覧
    List,
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// ネットワークを作成 (データセンターが無ければ一緒に作成)
    Provision {
        /// <datacenter>.<network> (例: dc-a.public)
        name: QualifiedName,
    },
    /// ネットワークを検索
    Discover { name: QualifiedName },
    /// インターネットゲートウェイ経由で外部に公開
    Expose { name: QualifiedName },
    /// ネットワークを削除 (空になったデータセンターも削除)
    Destroy { name: QualifiedName },
    /// サブネットが同じデータセンターにあるか確認
    Colocated {
        /// サブネット ID
        #[arg(required = true)]
        subnets: Vec<String>,
    },
}

#[derive(Subcommand)]
enum LoadBalancerCommands {
    /// ロードバランサーを作成
    Provision {
        name: QualifiedName,
        /// ロードバランサーを指す CNAME (例: shop.example.com)
        #[arg(long)]
        dns: Option<String>,
    },
    /// ロードバランサーを検索
    Discover { name: QualifiedName },
    /// セキュリティグループを開放
    Expose { name: QualifiedName },
    /// ロードバランサーを削除
    Destroy { name: QualifiedName },
}

#[derive(Subcommand)]
enum NatCommands {
    /// サブネットごとに NAT ゲートウェイを作成
    Provision { name: QualifiedName },
    /// NAT ゲートウェイを検索
    Discover { name: QualifiedName },
    /// NAT ゲートウェイを削除
    Destroy { name: QualifiedName },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// イメージから Auto Scaling グループを起動
    Provision {
        name: QualifiedName,
        /// 起動するイメージ ID
        #[arg(long)]
        image: String,
        /// 初回起動時に ansible-pull するプレイブックのリポジトリ
        #[arg(long, conflicts_with = "user_data")]
        playbook: Option<String>,
        /// ユーザーデータとして渡すスクリプト
        #[arg(long)]
        user_data: Option<PathBuf>,
        /// 登録先のロードバランサー
        #[arg(long)]
        load_balancer: Option<QualifiedName>,
        /// インスタンス数
        #[arg(long)]
        capacity: Option<u32>,
        /// インスタンスタイプ (指定しない場合は要件から選択)
        #[arg(long, conflicts_with_all = ["cpus", "memory"])]
        instance_type: Option<String>,
        /// 必要な vCPU 数
        #[arg(long)]
        cpus: Option<u32>,
        /// 必要なメモリ (GiB)
        #[arg(long)]
        memory: Option<f64>,
    },
    /// サービスを検索
    Discover { name: QualifiedName },
    /// セキュリティグループを開放
    Allow { name: QualifiedName },
    /// サービスを削除
    Destroy { name: QualifiedName },
}

#[derive(Subcommand)]
enum DnsCommands {
    /// CNAME を作成 (ホストゾーンが無ければ作成)
    Provision {
        /// 完全修飾ドメイン名
        fqdn: String,
        /// 向き先
        target: String,
    },
    /// CNAME を検索
    Discover { fqdn: String },
    /// CNAME を削除 (空になったホストゾーンも削除)
    Destroy { fqdn: String },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("deployer {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config, config_path) = DeployerConfig::load()?;
    let config = config.with_overrides(cli.deployment.clone(), cli.provider);
    config.validate()?;

    if !cli.json {
        match &config_path {
            Some(path) => eprintln!("{} {}", "設定ファイル:".dimmed(), path.display()),
            None => eprintln!("{}", "設定ファイルなし (デフォルト設定)".dimmed()),
        }
        eprintln!(
            "{} {}  {} {}",
            "デプロイメント:".dimmed(),
            config.deployment.cyan(),
            "プロバイダー:".dimmed(),
            config.provider.to_string().cyan()
        );
        if config.provider == ProviderKind::Sandbox {
            eprintln!(
                "{}",
                "⚠ sandbox はインメモリのリハーサルです。結果は保存されません".yellow()
            );
        }
    }

    if matches!(cli.command, Commands::Config) {
        return commands::config::handle(&config, config_path.as_deref(), cli.json);
    }

    let ctx = commands::Context::new(provider::connect(&config).await?, &config, cli.json);

    match cli.command {
        Commands::Datacenter(cmd) => match cmd {
            DatacenterCommands::Provision {
                name,
                prefix,
                include,
                exclude,
            } => commands::datacenter::provision(&ctx, &name, prefix, include, exclude).await,
            DatacenterCommands::Discover { name } => commands::datacenter::discover(&ctx, &name).await,
            DatacenterCommands::Destroy { name } => commands::datacenter::destroy(&ctx, &name).await,
            DatacenterCommands::List => commands::datacenter::list(&ctx).await,
        },
        Commands::Network(cmd) => match cmd {
            NetworkCommands::Provision { name } => commands::network::provision(&ctx, &name).await,
            NetworkCommands::Discover { name } => commands::network::discover(&ctx, &name).await,
            NetworkCommands::Expose { name } => commands::network::expose(&ctx, &name).await,
            NetworkCommands::Destroy { name } => commands::network::destroy(&ctx, &name).await,
            NetworkCommands::Colocated { subnets } => {
                commands::network::colocated(&ctx, &subnets).await
            }
        },
        Commands::Lb(cmd) => match cmd {
            LoadBalancerCommands::Provision { name, dns } => {
                commands::load_balancer::provision(&ctx, &name, dns.as_deref()).await
            }
            LoadBalancerCommands::Discover { name } => {
                commands::load_balancer::discover(&ctx, &name).await
            }
            LoadBalancerCommands::Expose { name } => {
                commands::load_balancer::expose(&ctx, &name).await
            }
            LoadBalancerCommands::Destroy { name } => {
                commands::load_balancer::destroy(&ctx, &name).await
            }
        },
        Commands::Nat(cmd) => match cmd {
            NatCommands::Provision { name } => commands::nat::provision(&ctx, &name).await,
            NatCommands::Discover { name } => commands::nat::discover(&ctx, &name).await,
            NatCommands::Destroy { name } => commands::nat::destroy(&ctx, &name).await,
        },
        Commands::Service(cmd) => match cmd {
            ServiceCommands::Provision {
                name,
                image,
                playbook,
                user_data,
                load_balancer,
                capacity,
                instance_type,
                cpus,
                memory,
            } => {
                let options = commands::service::ProvisionOptions {
                    image,
                    playbook,
                    user_data,
                    load_balancer,
                    capacity,
                    instance_type,
                    cpus,
                    memory,
                };
                commands::service::provision(&ctx, &name, options).await
            }
            ServiceCommands::Discover { name } => commands::service::discover(&ctx, &name).await,
            ServiceCommands::Allow { name } => commands::service::allow(&ctx, &name).await,
            ServiceCommands::Destroy { name } => commands::service::destroy(&ctx, &name).await,
        },
        Commands::Dns(cmd) => match cmd {
            DnsCommands::Provision { fqdn, target } => {
                commands::dns::provision(&ctx, &fqdn, &target).await
            }
            DnsCommands::Discover { fqdn } => commands::dns::discover(&ctx, &fqdn).await,
            DnsCommands::Destroy { fqdn } => commands::dns::destroy(&ctx, &fqdn).await,
        },
        Commands::Teardown { yes } => commands::teardown::handle(&ctx, yes).await,
        Commands::Config | Commands::Version => Ok(()),
    }
}
