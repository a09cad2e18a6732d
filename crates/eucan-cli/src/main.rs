use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "eucan-cli")]
#[command(about = "Imports source catalogues into the EUCAN-Connect catalogue")]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import source catalogues, all of them unless codes are given
    Import {
        #[arg(long = "catalogue", value_name = "CODE")]
        catalogues: Vec<String>,
    },
    /// List the configured source catalogues
    Catalogues,
}

fn init_tracing(verbose: u8) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command.unwrap_or(Commands::Import { catalogues: Vec::new() }) {
        Commands::Import { catalogues } => {
            let summary = eucan_sync::run_import_from_env(&catalogues).await?;
            tracing::info!(run_id = %summary.run_id, "import run recorded");
            println!(
                "import complete: run_id={} catalogues={} succeeded={} with_warnings={} failed={}",
                summary.run_id,
                summary.catalogues,
                summary.succeeded,
                summary.with_warnings,
                summary.failed
            );
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Catalogues => {
            for catalogue in eucan_sync::list_catalogues_from_env().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    catalogue.code, catalogue.catalogue_type, catalogue.description, catalogue.url
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_accepts_repeated_catalogue_codes() {
        let cli = Cli::try_parse_from(["eucan-cli", "-vv", "import", "--catalogue", "lc", "--catalogue", "M"])
            .expect("args");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Import { catalogues }) => assert_eq!(catalogues, vec!["lc", "M"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
