use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "ccproxy", about = "Request-routing reverse proxy for LLM APIs")]
pub(crate) struct Cli {
    /// Directory holding ccproxy.yaml and the host config.yaml.
    #[arg(long, default_value = ".ccproxy")]
    pub(crate) config_dir: PathBuf,
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 4000)]
    pub(crate) port: u16,
}
