use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "klogmux")]
#[command(about = "Tail logs from many Kubernetes pods as one merged, templated stream")]
pub struct Cli {
    /// Path to the log sources configuration file (YAML or JSON)
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Kubeconfig path (defaults to the inferred cluster configuration)
    #[arg(long)]
    pub kubeconfig: Option<String>,

    /// Keep re-discovering pods and streaming until interrupted
    #[arg(short, long)]
    pub follow: bool,

    /// Merge all streams globally ordered by line timestamp
    #[arg(short, long)]
    pub sort: bool,

    /// Print the effective configuration (tags, matched sources) and exit
    #[arg(long)]
    pub info: bool,

    /// Number of discovery workers
    #[arg(short = 'w', long, default_value_t = 10)]
    pub workers: usize,

    /// Seconds between re-discovery passes in follow mode
    #[arg(short = 'r', long, default_value_t = 20)]
    pub refresh_seconds: u64,

    /// Only stream sources with these names (comma separated, empty = all)
    #[arg(long, value_delimiter = ',')]
    pub name: Vec<String>,

    /// Only stream sources carrying all of these tags
    #[arg(short = 't', long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Only stream sources carrying at least one of these tags
    #[arg(long, value_delimiter = ',')]
    pub tags_any: Vec<String>,

    /// Number of most recent lines to fetch per pod
    #[arg(long)]
    pub tail: Option<i64>,

    /// Only return logs newer than this many seconds
    #[arg(long)]
    pub since: Option<i64>,

    /// Only return logs after this RFC3339 timestamp
    #[arg(long)]
    pub since_time: Option<String>,

    /// Enable debug diagnostics on stderr
    #[arg(short, long)]
    pub debug: bool,
}
