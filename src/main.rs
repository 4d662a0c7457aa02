#![warn(clippy::all)]
use aws::SignedTransport;
use clap::{CommandFactory, Parser};
use commands::Commands;
use config::Config;
use log::debug;
use prelude::*;
use reserved_instances::Ec2;

mod aws;
mod commands;
mod config;
mod credentials;
mod error;
mod parsers;
mod prelude;
mod reserved_instances;
mod xml;

#[derive(Parser)]
#[command(version, about = "Manage EC2 reserved instances", long_about = None)]
pub struct Cli {
    /// AWS profile (environment credentials are used when omitted)
    #[arg(short, long, global = true)]
    pub profile: Option<String>,
    /// AWS region
    #[arg(short, long, global = true)]
    pub region: Option<String>,
    /// EC2 endpoint url
    #[arg(long, global = true)]
    pub endpoint: Option<String>,
    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
    #[command(subcommand)]
    pub command: Commands,
}

fn ec2(cli: &Cli, cfg: &Config) -> Result<Ec2<SignedTransport>> {
    let profile = cli
        .profile
        .clone()
        .or_else(|| Some(cfg.profile.clone()).filter(|p| p != "default"));
    let mut credential = credentials::get_credentials(profile.as_deref())?;
    if let Some(region) = cli.region.clone().not_empty().or_else(|| cfg.region.clone()) {
        credential.region = region;
    }
    ensure!(
        !credential.region.is_empty(),
        "No region configured for {}, use --region or set it in {:?}",
        credential.profile,
        Config::config_path()
    );
    let endpoint = cfg.endpoint_for(&credential.region);
    debug!("Using {endpoint} as {}", credential.profile);
    Ok(Ec2::new(SignedTransport {
        credential,
        endpoint,
        api_version: cfg.api_version.clone(),
        service_name: "ec2",
    }))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new().filter_level(cli.verbose.log_level_filter()).init();
    let mut cfg = Config::load().wrap_err("Can't load config")?;
    if cli.endpoint.is_some() {
        cfg.endpoint = cli.endpoint.clone().not_empty();
    }
    match &cli.command {
        Commands::Describe(args) => Commands::describe(args, &ec2(&cli, &cfg)?),
        Commands::Offerings(args) => Commands::offerings(args, &ec2(&cli, &cfg)?),
        Commands::Purchase(args) if args.dry_run => {
            Commands::dry_run(args);
            Ok(())
        }
        Commands::Purchase(args) => Commands::purchase(args, &cfg, &ec2(&cli, &cfg)?),
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "ec2ri", &mut std::io::stdout());
            Ok(())
        }
    }
}
