use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "upstack", version)]
#[command(about = "upstack - start long-running commands in dependency-ordered groups")]
pub struct Cli {
    /// Config file path (defaults to upstack.json / upstack.yaml / upstack.yml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Command line to execute before reading from stdin, commands separated
    /// by '&'. Example: "start group web & status"
    #[arg(short, long)]
    pub input: Option<String>,

    /// Show verbose debug output
    #[arg(short, long)]
    pub verbose: bool,
}
