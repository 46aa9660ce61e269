use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "DEPLOYER_CONFIG_PATH で指定された設定ファイルが見つかりません: {0}\n\
        指定を外すと以下の場所を順に探します:\n\
        - カレントディレクトリ: deployer.yaml, .deployer.yaml\n\
        - ./.deployer/ ディレクトリ\n\
        - ~/.config/deployer/deployer.yaml"
    )]
    ConfigFileNotFound(PathBuf),

    #[error("設定ファイルの解析に失敗しました ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("不正な設定値: {0}")]
    Invalid(String),

    #[error("不明なプロバイダー '{0}' (aws または sandbox を指定してください)")]
    UnknownProvider(String),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
