//! Command-line interface for bpmc.

use bpmc_kripke::{
    verify_sets, ConvertConfig, Converter, KripkeError, Preprocessing, SpecificationSet,
    Structure, StutterConfig, StutterOptimizer, DEFAULT_MAX_SIZE,
};
use bpmc_net::{NetError, PetriNet};
use bpmc_smv::Formulas;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to access {path}: {message}")]
    IoError { path: String, message: String },

    #[error("invalid JSON: {message}")]
    #[diagnostic(code(bpmc::json_error))]
    JsonError {
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("invalid net: {message}")]
    #[diagnostic(code(bpmc::net_error))]
    NetError { message: String },

    #[error("build error: {message}")]
    #[diagnostic(code(bpmc::build_error))]
    BuildError { message: String },

    #[error("encode error: {message}")]
    EncodeError { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl CliError {
    fn from_json_error(e: &serde_json::Error, source: Arc<String>, filename: &str) -> Self {
        let offset = line_column_offset(&source, e.line(), e.column());
        CliError::JsonError {
            message: e.to_string(),
            src: NamedSource::new(filename, source),
            span: (offset, 0).into(),
        }
    }

    fn io(path: &Path, e: std::io::Error) -> Self {
        CliError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<NetError> for CliError {
    fn from(e: NetError) -> Self {
        CliError::NetError {
            message: e.to_string(),
        }
    }
}

impl From<KripkeError> for CliError {
    fn from(e: KripkeError) -> Self {
        CliError::BuildError {
            message: e.to_string(),
        }
    }
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "bpmc", version)]
#[command(about = "Kripke structure builder for business-process nets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the Kripke structure of a net and print its size
    Build {
        /// Net description (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        opts: BuildOptions,

        /// Keep only these propositions before reducing
        #[arg(long, value_name = "AP")]
        restrict: Vec<String>,

        /// Write the structure as an SMV module
        #[arg(long, value_name = "OUTPUT")]
        smv: Option<PathBuf>,
    },

    /// Build one reduced structure per specification set and write SMV modules
    Verify {
        /// Net description (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        opts: BuildOptions,

        /// Specification sets (JSON array)
        #[arg(long, value_name = "SETS")]
        sets: PathBuf,

        /// Directory for the generated SMV modules
        #[arg(long, value_name = "DIR", default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Args)]
struct BuildOptions {
    /// Maximum number of states
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE)]
    max_states: usize,

    /// Maximum number of atomic propositions
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE)]
    max_propositions: usize,

    /// Number of worker threads (0 = use all available)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Distinguish states by marking as well as by propositions
    #[arg(long)]
    tag_markings: bool,

    /// Expose a data variable's bindings as propositions
    #[arg(long, value_name = "VAR")]
    observe: Vec<String>,

    /// Reduce modulo stutter equivalence
    #[arg(long)]
    optimize: bool,

    /// Initial partition used by the reduction
    #[arg(long, value_enum, default_value = "flat")]
    preprocess: PreprocessArg,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PreprocessArg {
    Flat,
    Tree,
}

impl BuildOptions {
    fn convert_config(&self) -> ConvertConfig {
        ConvertConfig {
            max_states: self.max_states,
            max_propositions: self.max_propositions,
            num_threads: self.threads,
            tag_markings: self.tag_markings,
            observed_variables: self.observe.clone(),
            ..ConvertConfig::default()
        }
    }

    fn stutter_config(&self) -> Option<StutterConfig> {
        if !self.optimize {
            return None;
        }
        let preprocessing = match self.preprocess {
            PreprocessArg::Flat => Preprocessing::Flat,
            PreprocessArg::Tree => Preprocessing::ReachabilityTree,
        };
        Some(StutterConfig { preprocessing })
    }
}

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    let verbose = match &cli.command {
        Commands::Build { opts, .. } | Commands::Verify { opts, .. } => opts.verbose,
    };
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Build {
            file,
            opts,
            restrict,
            smv,
        } => cmd_build(&file, &opts, &restrict, smv.as_deref()),
        Commands::Verify {
            file,
            opts,
            sets,
            out_dir,
        } => cmd_verify(&file, &opts, &sets, &out_dir),
    };

    if let Err(e) = result {
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}

fn cmd_build(
    file: &Path,
    opts: &BuildOptions,
    restrict: &[String],
    smv: Option<&Path>,
) -> CliResult<()> {
    let net = load_net(file)?;
    net.check_observed(&opts.observe)?;

    println!("net {}", net.name());
    println!(
        "  {} places, {} transitions",
        net.num_places(),
        net.num_transitions()
    );

    let start = Instant::now();
    let mut structure = Converter::new(&net, opts.convert_config()).convert()?;
    println!("  Built: {}", structure.stats());

    if !restrict.is_empty() {
        let keep: BTreeSet<String> = restrict.iter().cloned().collect();
        structure.restrict_propositions(&keep);
        info!(propositions = structure.propositions().len(), "restricted");
    }

    if let Some(config) = opts.stutter_config() {
        let report = StutterOptimizer::new(config).optimize(&mut structure)?;
        println!("  Reduced: {}", report);
    }
    println!("  Time: {:.2}s", start.elapsed().as_secs_f64());

    if let Some(path) = smv {
        write_smv(path, &structure, Formulas::default())?;
        println!("  SMV module written to {}", path.display());
    }
    Ok(())
}

fn cmd_verify(file: &Path, opts: &BuildOptions, sets: &Path, out_dir: &Path) -> CliResult<()> {
    let net = load_net(file)?;
    let sets = load_sets(sets)?;
    net.check_observed(&opts.observe)?;
    for set in &sets {
        net.check_observed(&set.observe)?;
    }
    fs::create_dir_all(out_dir).map_err(|e| CliError::io(out_dir, e))?;

    info!(net = net.name(), sets = sets.len(), "verifying");
    let stutter = opts.stutter_config();
    let results = verify_sets(
        net.name(),
        &net,
        &opts.convert_config(),
        stutter.as_ref(),
        &sets,
    );

    println!("net {}", net.name());
    let mut failed = 0;
    for result in results {
        let model = match result {
            Ok(model) => model,
            Err(e) => {
                failed += 1;
                println!("  {}: FAILED ({})", e.set, e.source);
                continue;
            }
        };
        let path = out_dir.join(format!(
            "{}.{}.smv",
            file_stem(net.name()),
            file_stem(&model.set.name)
        ));
        let formulas = Formulas {
            ltl: &model.set.ltl,
            ctl: &model.set.ctl,
        };
        match write_smv(&path, &model.structure, formulas) {
            Ok(()) => println!(
                "  {}: {} -> {}",
                model.set.name,
                model.structure.stats(),
                path.display()
            ),
            Err(e) => {
                failed += 1;
                println!("  {}: FAILED ({})", model.set.name, e);
            }
        }
    }

    if failed > 0 {
        return Err(CliError::Other {
            message: format!("{} of {} specification sets failed", failed, sets.len()),
        });
    }
    Ok(())
}

fn read_source(path: &Path) -> CliResult<(String, Arc<String>)> {
    let source = fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    Ok((path.display().to_string(), Arc::new(source)))
}

fn load_net(path: &Path) -> CliResult<PetriNet> {
    let (filename, source) = read_source(path)?;
    PetriNet::from_json(&source).map_err(|e| match e {
        NetError::Json(err) => CliError::from_json_error(&err, source.clone(), &filename),
        other => other.into(),
    })
}

fn load_sets(path: &Path) -> CliResult<Vec<SpecificationSet>> {
    let (filename, source) = read_source(path)?;
    serde_json::from_str(&source)
        .map_err(|e| CliError::from_json_error(&e, source.clone(), &filename))
}

fn write_smv(path: &Path, structure: &Structure, formulas: Formulas<'_>) -> CliResult<()> {
    let text = bpmc_smv::encode(structure, formulas).map_err(|e| CliError::EncodeError {
        message: e.to_string(),
    })?;
    fs::write(path, text).map_err(|e| CliError::io(path, e))
}

/// Byte offset of a 1-based line/column pair as reported by serde_json.
fn line_column_offset(source: &str, line: usize, column: usize) -> usize {
    let start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (start + column.saturating_sub(1)).min(source.len())
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_column_offset() {
        let source = "{\n  \"a\": x\n}";
        assert_eq!(line_column_offset(source, 1, 1), 0);
        assert_eq!(line_column_offset(source, 2, 8), 9);
        assert_eq!(line_column_offset(source, 9, 9), source.len());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("start-and-end"), "start-and-end");
        assert_eq!(file_stem("a b/c"), "a_b_c");
    }

    #[test]
    fn test_stutter_config_only_when_optimizing() {
        let cli = Cli::parse_from(["bpmc", "build", "net.json", "--preprocess", "tree"]);
        let Commands::Build { opts, .. } = cli.command else {
            panic!("expected build");
        };
        assert!(opts.stutter_config().is_none());

        let cli = Cli::parse_from(["bpmc", "build", "net.json", "--optimize", "--preprocess", "tree"]);
        let Commands::Build { opts, .. } = cli.command else {
            panic!("expected build");
        };
        let config = opts.stutter_config().unwrap();
        assert_eq!(config.preprocessing, Preprocessing::ReachabilityTree);
        assert_eq!(opts.convert_config().max_states, DEFAULT_MAX_SIZE);
    }
}
