use std::path::PathBuf;

use admix_data_provider::{
    DatasetProvider, FeatureConverter, ProvidersConfig, Record, Registry,
    DEFAULT_NUM_RECORDS_TO_INSPECT,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// TOML file describing tasks, mixtures and dataset options.
    #[arg(long, short, env = "ADMIX_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env, default_value_t = Level::WARN)]
    log_level: Level,

    #[arg(long, value_enum, default_value_t = LogOutput::Console)]
    log_output: LogOutput,
}

#[derive(Clone, Debug, Copy, ValueEnum, PartialEq)]
enum LogOutput {
    Console,
    Json,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Resolved proportion of every leaf task of each mixture.
    Proportions {
        /// Only this mixture.
        mixture: Option<String>,
    },
    /// Records of a task after each step of its preprocessing chain.
    Steps {
        task: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_NUM_RECORDS_TO_INSPECT)]
        num_records: usize,
    },
    /// The first records of a task or mixture, as JSON lines.
    Sample {
        provider: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        num_records: usize,
    },
    // Prints the help, optionally as markdown. Used for docs generation.
    #[clap(hide = true)]
    PrintAllHelp {
        #[arg(long, required = true)]
        markdown: bool,
    },
}

fn init_logging(output: LogOutput, level: Level) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;
    let subscriber = tracing_subscriber::registry();
    let subscriber = match output {
        LogOutput::Console => subscriber.with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter)
                .boxed(),
        ),
        LogOutput::Json => subscriber.with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .flatten_event(true)
                .with_current_span(true)
                .with_filter(filter)
                .boxed(),
        ),
    };
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_records(records: &[Record]) -> Result<()> {
    for record in records {
        println!("{}", serde_json::to_string(record)?);
    }
    Ok(())
}

fn print_proportions(registry: &mut Registry, names: Vec<String>) -> Result<()> {
    for name in names {
        let provider = registry.get(&name)?;
        let Some(mixture) = provider.as_mixture() else {
            continue;
        };
        let shares: Vec<(String, f64)> = mixture
            .leaf_tasks()
            .iter()
            .map(|task| (task.name().to_owned(), mixture.get_proportion(task)))
            .collect();
        let total: f64 = shares.iter().map(|(_, p)| p).sum();
        println!("{name} (total proportion {})", mixture.total_proportion());
        for (task, proportion) in shares {
            let share = if total > 0.0 { proportion / total } else { 0.0 };
            println!("  {task:<32} {proportion:>10.4} {:>7.2}%", share * 100.0);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Commands::PrintAllHelp { markdown } = args.command {
        // This is a required argument for the time being.
        assert!(markdown);

        let () = clap_markdown::print_help_markdown::<Args>();

        return Ok(());
    }

    init_logging(args.log_output, args.log_level)?;

    let Some(config_path) = args.config else {
        bail!("a config file is required, pass --config or set ADMIX_CONFIG");
    };

    let (config, base_dir) = ProvidersConfig::from_path(&config_path)?;
    let mut registry = config
        .build_registry(&base_dir)
        .with_context(|| format!("failed to load providers from {}", config_path.display()))?;
    let converter = config.feature_converter();
    let converter = converter.as_ref().map(|c| c as &dyn FeatureConverter);
    info!(
        config = %config_path.display(),
        providers = ?registry.names(),
        "loaded providers"
    );

    match args.command {
        Commands::Proportions { mixture } => {
            let names = match mixture {
                Some(name) => vec![name],
                None => config.mixtures.iter().map(|m| m.name.clone()).collect(),
            };
            print_proportions(&mut registry, names)?;
        }
        Commands::Steps { task, num_records } => {
            let task = registry.get_task(&task)?;
            let ops = task.operations(&config.options, converter);
            let steps = task.get_dataset_by_step(num_records, &config.options, converter)?;
            for (k, records) in steps.iter().enumerate() {
                let op = match k.checked_sub(1) {
                    None => "raw",
                    Some(i) => ops[i].name(),
                };
                println!("# step {k}: {op}");
                print_records(records)?;
            }
        }
        Commands::Sample {
            provider,
            num_records,
        } => {
            let provider = registry.get(&provider)?;
            let records = provider
                .get_dataset(&config.options, converter)?
                .take(num_records)
                .collect::<Result<Vec<_>>>()?;
            print_records(&records)?;
        }
        Commands::PrintAllHelp { .. } => {}
    }

    Ok(())
}
