//! Unmerge Simulator CLI
//!
//! Run merger resolution scenarios with deterministic seeds.

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use unmerge_core::{DisambiguatorKind, ExtractorKind, ResolverConfig};
use unmerge_sim::scenarios::ScenarioId;
use unmerge_sim::{ScenarioResult, ScenarioRunner, SimError, SimExport};

/// Unmerge deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "unmerge-sim")]
#[command(about = "Run deterministic merger resolution scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (crossing, convoy, swarm, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Frames to simulate per scenario
    #[arg(short, long, default_value = "20")]
    frames: usize,

    /// Feature extractor (possible_coms, merger_coms, kmeans)
    #[arg(short, long, default_value = "kmeans")]
    extractor: String,

    /// Arc disambiguator (greedy, model)
    #[arg(short, long, default_value = "model")]
    disambiguator: String,

    /// JSON file with resolver configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run (graph, mergers, metrics) to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(path: Option<&str>) -> Result<ResolverConfig, SimError> {
    match path {
        Some(path) => Ok(ResolverConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => Ok(ResolverConfig::default()),
    }
}

fn run_with_export(runner: &ScenarioRunner, scenario: ScenarioId, path: &str) -> Result<ScenarioResult, SimError> {
    let run = runner.execute(scenario)?;
    let export = SimExport::from_run(
        &run,
        runner.extractor().name(),
        runner.disambiguator().name(),
    )?;
    export.write_to_file(path)?;
    info!("Exported {} frames and {} mergers to {}", export.frames.len(), export.mergers.len(), path);
    Ok(run.result)
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Unmerge Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: crossing, convoy, swarm, all");
            std::process::exit(1);
        })]
    };

    let extractor = ExtractorKind::from_name(&args.extractor).unwrap_or_else(|| {
        eprintln!("Error: Unknown extractor: {}", args.extractor);
        eprintln!("Available extractors: possible_coms, merger_coms, kmeans");
        std::process::exit(1);
    });
    let disambiguator = DisambiguatorKind::from_name(&args.disambiguator).unwrap_or_else(|| {
        eprintln!("Error: Unknown disambiguator: {}", args.disambiguator);
        eprintln!("Available disambiguators: greedy, model");
        std::process::exit(1);
    });

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed)
            .with_frames(args.frames)
            .with_extractor(extractor)
            .with_disambiguator(disambiguator)
            .with_config(config.clone())
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        match run_with_export(&runner_for(base_seed), scenarios[0], export_path) {
            Ok(result) if result.passed => {
                info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base_seed, export_path);
            }
            Ok(result) => {
                error!(
                    "✗ {} FAILED: {}",
                    scenarios[0].name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
                std::process::exit(1);
            }
            Err(e) => {
                error!("✗ {} aborted: {}", scenarios[0].name(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED: {} mergers, {} nodes created, {} arcs dropped",
                        scenario.name(),
                        seed,
                        result.mergers,
                        result.children_created,
                        result.arcs_deactivated
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "extractor": extractor.name(),
            "disambiguator": disambiguator.name(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "frames": r.frames,
                    "detections": r.detections,
                    "mergers": r.mergers,
                    "children_created": r.children_created,
                    "resolution_failures": r.resolution_failures,
                    "arcs_deactivated": r.arcs_deactivated,
                    "disambiguation_failures": r.disambiguation_failures,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
