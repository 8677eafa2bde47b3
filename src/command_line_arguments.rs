use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "hostmux", about, author, version, long_about = None)]
pub struct HostmuxArguments {
    #[arg(short = 'c', long = "config", default_value = "./hostmux.json", help = "Path to the configuration file")]
    pub(crate) config_path: String,
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub(crate) verbose: bool,
    #[arg(short = 'w', long = "watch", help = "Watch the configuration file for changes")]
    pub(crate) watch_config: bool,
    #[arg(long = "check", help = "Validate the configuration and certificates, then exit")]
    pub(crate) check: bool,
}
