mod cmd;
mod envconfig;

use clap::{Args, Parser, Subcommand};
use envconfig::EnvConfig;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rankmodel")]
#[command(version = "0.5.0")]
#[command(about = "Convert imported models into ranking expressions and evaluate them", long_about = None)]
struct Cli {
    /// Application package root (overrides RANKMODEL_APP_ROOT)
    #[arg(long, global = true)]
    app: Option<PathBuf>,
    /// Log filter (overrides RANKMODEL_LOG)
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Model path under models/
    #[arg(long)]
    model: String,
    #[arg(long)]
    signature: Option<String>,
    #[arg(long)]
    output: Option<String>,
    /// Rank profile description in JSON
    #[arg(long)]
    profile: Option<PathBuf>,
}

impl From<TargetArgs> for cmd::Target {
    fn from(args: TargetArgs) -> Self {
        cmd::Target {
            model: args.model,
            signature: args.signature,
            output: args.output,
            profile: args.profile,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a model output and print the resulting expression
    Convert {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Convert a model output and evaluate it
    Eval {
        #[command(flatten)]
        target: TargetArgs,
        /// Function to evaluate, the converted expression by default
        #[arg(long)]
        function: Option<String>,
        /// Binds a slot to a tensor literal, as slot=literal
        #[arg(long = "bind")]
        bindings: Vec<String>,
        /// JSON lines of slot bindings, evaluated in parallel
        #[arg(long)]
        rows: Option<PathBuf>,
    },
    /// List the stored conversion artifacts of a model
    Show {
        #[arg(long)]
        model: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = EnvConfig::from_env().with_overrides(cli.app, cli.log);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log))
        .with_writer(std::io::stderr)
        .init();

    let root = config.app_root.as_path();
    let result = match cli.command {
        Commands::Convert { target } => cmd::convert(root, &target.into()),
        Commands::Eval {
            target,
            function,
            bindings,
            rows,
        } => cmd::eval(root, &target.into(), function.as_deref(), &bindings, rows.as_deref()),
        Commands::Show { model } => cmd::show(root, &model),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
