use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use localjudge::{
    BatchReport, CompilationResult, Config, Orchestrator, Problem, ProblemStore, RunEvent,
    RunResult, TestCase, Verdict,
};

#[derive(Parser)]
#[command(name = "localjudge")]
#[command(about = "Compile a solution and judge it against its test cases", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file without running it
    Compile { source: PathBuf },

    /// Compile once, then run every test case
    Run {
        source: PathBuf,

        /// Problem JSON; defaults to the problem saved for the source file
        #[arg(short, long)]
        problem: Option<PathBuf>,

        /// Save the problem next to the source for later runs
        #[arg(long)]
        save: bool,
    },

    /// Run one test against the existing artifact, without compiling
    RunOne {
        source: PathBuf,

        /// File fed to standard input
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// File with the expected output
        #[arg(short, long)]
        expected: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };
    let orchestrator = Orchestrator::native(&config)?;

    let success = match cli.command {
        Commands::Compile { source } => {
            let result = orchestrator.compile(&source).await?;
            print_compilation(&result);
            result.success
        }
        Commands::Run {
            source,
            problem,
            save,
        } => {
            let store = ProblemStore::new(config.save_location.clone());
            let problem = load_problem(&store, &source, problem.as_deref()).await?;
            if save {
                store.save(&source, &problem).await?;
            }
            run_all(&orchestrator, problem).await?.all_passed()
        }
        Commands::RunOne {
            source,
            input,
            expected,
        } => {
            let test_case = TestCase::new(
                1,
                read_optional(input.as_deref()).await?,
                read_optional(expected.as_deref()).await?,
            );
            let result = orchestrator.run_one(&source, &test_case).await?;
            print_result(&result);
            result.verdict == Verdict::Passed
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn load_problem(
    store: &ProblemStore,
    source: &Path,
    problem_path: Option<&Path>,
) -> Result<Problem, Box<dyn std::error::Error>> {
    let mut problem = match problem_path {
        Some(path) => Problem::from_json(&tokio::fs::read_to_string(path).await?)?,
        None => match store.load(source).await? {
            Some(problem) => problem,
            None => {
                tracing::warn!("No saved problem for {}, using an empty test", source.display());
                Problem::local(source)
            }
        },
    };
    problem.source_path = source.to_path_buf();
    Ok(problem)
}

async fn read_optional(path: Option<&Path>) -> std::io::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => Ok(String::new()),
    }
}

async fn run_all(
    orchestrator: &Orchestrator,
    problem: Problem,
) -> Result<BatchReport, Box<dyn std::error::Error>> {
    let total = problem.tests.len();
    let mut handle = orchestrator.run_all(problem)?;
    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            RunEvent::Compiling => println!("Compiling..."),
            RunEvent::Compiled(result) => print_compilation(&result),
            RunEvent::Started { .. } => {}
            RunEvent::Finished(result) => print_result(&result),
            RunEvent::Completed(report) => {
                println!(
                    "{}/{} passed{}",
                    report.passed(),
                    total,
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                return Ok(report);
            }
        }
    }

    Err(Box::new(localjudge::JudgeError::Aborted(handle.run_id())))
}

fn print_compilation(result: &CompilationResult) {
    if result.success {
        if !result.stdout.is_empty() {
            println!("{}", result.stdout.trim_end());
        }
        return;
    }
    println!("Compilation failed (exit code {})", result.exit_code);
    if !result.stderr.is_empty() {
        println!("{}", result.stderr.trim_end());
    }
}

fn print_result(result: &RunResult) {
    println!(
        "Test {}: {:?} ({} ms)",
        result.test_case_id, result.verdict, result.elapsed_ms
    );
    if result.verdict != Verdict::Passed && !result.stderr.is_empty() {
        println!("  stderr: {}", result.stderr.trim_end());
    }
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
