//! medsig: translate abbreviated prescription sigs into English and structured
//! form, then check the dosing against drug references.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use medsig_ai::{Pipeline, RunSummary};
use medsig_store::{Collection, OutputTable, read_output_rows, read_prescriptions};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod display;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(name = "medsig", version)]
#[command(about = "Retrieval-grounded prescription sig translation and validation")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CollectionArg {
    Sig,
    Med,
    All,
}

impl CollectionArg {
    fn collections(self) -> &'static [Collection] {
        match self {
            Self::Sig => &[Collection::SigExamples],
            Self::Med => &[Collection::MedicalKnowledge],
            Self::All => &Collection::ALL,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Embed the corpora in the data directory into vector indexes.
    BuildIndexes {
        #[arg(long, value_enum, default_value_t = CollectionArg::All)]
        collection: CollectionArg,
        /// Add only new documents instead of replacing the index.
        #[arg(long)]
        no_rebuild: bool,
    },
    /// Translate a single sig.
    Translate { sig: String },
    /// Validate English instructions for a drug.
    Validate {
        #[arg(long)]
        drug: String,
        english: String,
    },
    /// Process every prescription in the input CSV.
    Run {
        /// Defaults to <data-dir>/input_sigs.csv.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Defaults to <data-dir>/output_sigs.csv; replaced at the start of the run.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Pause between records.
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },
    /// Print the persisted output table.
    Show {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    info!("medsig v{}", env!("CARGO_PKG_VERSION"));

    let settings = cli.settings;
    match cli.command {
        Command::BuildIndexes {
            collection,
            no_rebuild,
        } => build_indexes(&settings, collection, !no_rebuild).await,
        Command::Translate { sig } => translate(&settings, &sig).await,
        Command::Validate { drug, english } => validate(&settings, &drug, &english).await,
        Command::Run {
            input,
            output,
            pause_ms,
        } => {
            let input = input.unwrap_or_else(|| settings.input_path());
            let output = output.unwrap_or_else(|| settings.output_path());
            run(&settings, &input, &output, Duration::from_millis(pause_ms)).await
        }
        Command::Show { output } => {
            let output = output.unwrap_or_else(|| settings.output_path());
            show(&output)
        }
    }
}

async fn build_indexes(
    settings: &Settings,
    which: CollectionArg,
    rebuild: bool,
) -> anyhow::Result<()> {
    let backends = settings.backends()?;
    display::print_header(&format!(
        "Building {} index(es) in {}",
        backends.store.backend().name(),
        settings.vector_dir.display()
    ));
    for &collection in which.collections() {
        let corpus = settings.data_dir.join(collection.corpus_file());
        let stats = backends
            .store
            .build(collection, &corpus, rebuild)
            .await
            .with_context(|| format!("building {collection} from {}", corpus.display()))?;
        display::print_build_stats(&stats);
    }
    Ok(())
}

async fn translate(settings: &Settings, sig: &str) -> anyhow::Result<()> {
    let backends = settings.backends()?;
    let (result, examples) = settings
        .translator(&backends)
        .translate(sig)
        .await
        .with_context(|| format!("translating {sig:?}"))?;
    display::print_header(&format!("Sig: {sig}"));
    display::print_translation(&examples, &result);
    Ok(())
}

async fn validate(settings: &Settings, drug: &str, english: &str) -> anyhow::Result<()> {
    let backends = settings.backends()?;
    let (result, references) = settings
        .validator(&backends)
        .validate(drug, english)
        .await
        .with_context(|| format!("validating instructions for {drug}"))?;
    display::print_header(&format!("{drug}: {english}"));
    display::print_validation(&references, &result);
    Ok(())
}

async fn run(settings: &Settings, input: &Path, output: &Path, pause: Duration) -> anyhow::Result<()> {
    if !input.exists() {
        bail!("input file {} does not exist", input.display());
    }
    let records = read_prescriptions(input)
        .with_context(|| format!("reading prescriptions from {}", input.display()))?;

    let backends = settings.backends()?;
    let pipeline = Pipeline::new(settings.translator(&backends), settings.validator(&backends));
    let mut table = OutputTable::create(output)
        .with_context(|| format!("creating output table {}", output.display()))?;

    display::print_header("Starting sig translation + validation run");
    println!(
        "Reading {} prescriptions from {}...",
        records.len(),
        input.display()
    );

    let total = records.len();
    let finished = tokio::select! {
        result = pipeline.run(&records, &mut table, pause, |outcome| display::print_record(outcome, total)) => Some(result?),
        _ = tokio::signal::ctrl_c() => None,
    };

    report_run(finished, &table, total)
}

/// Final banner for a finished run; an interrupted run is an error.
fn report_run(
    finished: Option<RunSummary>,
    table: &OutputTable,
    total: usize,
) -> anyhow::Result<()> {
    let Some(summary) = finished else {
        if table.is_empty() {
            warn!(output = ?table.path(), "interrupted before any row was written");
        } else {
            warn!(
                written = table.len(),
                output = ?table.path(),
                "interrupted; rows written so far are kept"
            );
        }
        bail!("run interrupted after {} of {total} records", table.len());
    };
    display::print_header(&format!(
        "Done: {} processed, {} OK, {} NOT_OK. Results in {}",
        summary.processed,
        summary.ok,
        summary.not_ok,
        table.path().display()
    ));
    Ok(())
}

fn show(output: &Path) -> anyhow::Result<()> {
    if !output.exists() {
        bail!(
            "output file {} does not exist; run `medsig run` first",
            output.display()
        );
    }
    let rows = read_output_rows(output)
        .with_context(|| format!("reading output table {}", output.display()))?;
    display::print_header(&format!("Translated + validated prescriptions ({})", output.display()));
    display::print_output_table(&rows);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use settings::{EmbedderKind, IndexKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(["medsig", "translate", "1 tab po qd x5d"]).unwrap();
        assert_eq!(cli.settings.temperature, 0.1);
        assert_eq!(cli.settings.sig_k, 3);
        assert_eq!(cli.settings.med_k, 3);
        assert_eq!(cli.settings.index, IndexKind::Flat);
        assert_eq!(cli.settings.retry_policy().max_attempts, Some(5));
        assert!(matches!(cli.command, Command::Translate { ref sig } if sig == "1 tab po qd x5d"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "medsig",
            "build-indexes",
            "--collection",
            "med",
            "--no-rebuild",
            "--embedder",
            "hashing",
            "--unbounded-retries",
            "--translate-timeout-secs",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.settings.embedder, EmbedderKind::Hashing);
        let policy = cli.settings.retry_policy();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.timeout, Some(Duration::from_secs(30)));
        match cli.command {
            Command::BuildIndexes {
                collection,
                no_rebuild,
            } => {
                assert_eq!(collection.collections(), &[Collection::MedicalKnowledge]);
                assert!(no_rebuild);
            }
            _ => panic!("expected build-indexes"),
        }
    }

    #[test]
    fn interrupted_run_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let table = OutputTable::create(&tmp.path().join("output_sigs.csv")).unwrap();

        let err = report_run(None, &table, 10).unwrap_err();
        assert_eq!(err.to_string(), "run interrupted after 0 of 10 records");

        let summary = RunSummary {
            processed: 10,
            ok: 6,
            not_ok: 4,
        };
        assert!(report_run(Some(summary), &table, 10).is_ok());
    }

    #[test]
    fn run_paths_default_into_data_dir() {
        let cli = Cli::try_parse_from(["medsig", "--data-dir", "/tmp/medsig", "run"]).unwrap();
        assert_eq!(cli.settings.input_path(), PathBuf::from("/tmp/medsig/input_sigs.csv"));
        assert_eq!(cli.settings.output_path(), PathBuf::from("/tmp/medsig/output_sigs.csv"));
    }
}
