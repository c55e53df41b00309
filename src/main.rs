//! StepRunner CLI Entry Point
//!
//! Loads definitions from YAML/JSON files (or built-in templates), runs
//! them and prints each run's status and summary.
//!
//! # Usage
//!
//! ```bash
//! # Run a definition
//! steprunner lead-followup.yaml --input '{"score": 85}'
//!
//! # Run several definitions side by side
//! steprunner a.yaml b.json --parallel 2
//!
//! # Run a built-in template
//! steprunner --template daily-report
//!
//! # Show the step type catalog
//! steprunner --list-types
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;

use steprunner::execution::{DefaultExecutor, Execution, RunStatus, StepRegistry};
use steprunner::workflow::{builtin_templates, find_template, TemplateOverrides};
use steprunner::{load_definition, Definition, Engine, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    definition_paths: Vec<String>,
    template: Option<String>,
    input: Value,
    max_parallel: usize,
    step_latency: Duration,
    list_types: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            definition_paths: Vec::new(),
            template: None,
            input: Value::Object(Default::default()),
            max_parallel: num_cpus::get(),
            step_latency: Duration::ZERO,
            list_types: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Step-Based Workflow Engine");
    println!();
}

fn print_usage() {
    println!("Usage: steprunner [OPTIONS] [DEFINITION_FILE]...");
    println!();
    println!("Arguments:");
    println!("  [DEFINITION_FILE]   Definition file (.yaml, .yml or .json)");
    println!();
    println!("Options:");
    println!("  --input JSON        Run input as a JSON object (default: {{}})");
    println!("  --template ID       Run a built-in template");
    println!("  --parallel N        Maximum concurrent runs (default: CPU count)");
    println!("  --latency-ms N      Simulated time spent on each step (default: 0)");
    println!("  --list-types        Show the step type catalog and templates");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  steprunner lead-followup.yaml --input '{{\"score\": 85}}'");
    println!("  steprunner a.yaml b.json --parallel 2");
    println!("  steprunner --template daily-report");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--list-types" => {
                config.list_types = true;
            }
            "--input" => {
                i += 1;
                let raw = args
                    .get(i)
                    .ok_or_else(|| "--input requires a JSON argument".to_string())?;
                config.input = serde_json::from_str(raw)
                    .map_err(|e| format!("Invalid input JSON: {}", e))?;
            }
            "--template" => {
                i += 1;
                let id = args
                    .get(i)
                    .ok_or_else(|| "--template requires a template id".to_string())?;
                config.template = Some(id.clone());
            }
            "--parallel" => {
                i += 1;
                let raw = args
                    .get(i)
                    .ok_or_else(|| "--parallel requires a number argument".to_string())?;
                config.max_parallel = raw
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("Invalid parallel value: {}", raw))?;
            }
            "--latency-ms" => {
                i += 1;
                let raw = args
                    .get(i)
                    .ok_or_else(|| "--latency-ms requires a number argument".to_string())?;
                let millis: u64 = raw
                    .parse()
                    .map_err(|_| format!("Invalid latency value: {}", raw))?;
                config.step_latency = Duration::from_millis(millis);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => config.definition_paths.push(arg.clone()),
        }
        i += 1;
    }

    if !config.list_types && config.template.is_none() && config.definition_paths.is_empty() {
        return Err("No definition file or template given".to_string());
    }

    Ok(config)
}

fn print_catalog() {
    println!("{}", "Step types:".bold());
    for info in StepRegistry::new().catalog() {
        println!("  {} {:<12} {}", info.icon, info.tag, info.description);
    }
    println!();
    println!("{}", "Templates:".bold());
    for template in builtin_templates() {
        println!("  {} {:<20} {}", template.icon, template.id, template.description);
    }
}

/// Collects the definitions named on the command line.
fn collect_definitions(config: &Config) -> Result<Vec<Definition>, Box<dyn std::error::Error>> {
    let mut definitions = Vec::new();

    if let Some(id) = &config.template {
        let template =
            find_template(id).ok_or_else(|| format!("Unknown template: {}", id))?;
        definitions.push(template.instantiate(TemplateOverrides::default()));
    }

    for path in &config.definition_paths {
        info!("Loading definition: {}", path);
        let definition = load_definition(path).map_err(|e| {
            error!("Failed to load definition: {}", e);
            format!("Could not load definition from '{}': {}", path, e)
        })?;
        info!("Definition loaded: {} ({} steps)", definition.name, definition.steps.len());
        definitions.push(definition);
    }

    Ok(definitions)
}

fn status_label(status: RunStatus) -> colored::ColoredString {
    let text = status.as_str().to_uppercase();
    match status {
        RunStatus::Completed => text.green().bold(),
        RunStatus::Failed => text.red().bold(),
        RunStatus::Cancelled => text.yellow().bold(),
        _ => text.normal(),
    }
}

fn print_run(run: &Execution) {
    println!();
    println!(
        "{} {} [{}]",
        status_label(run.status),
        run.definition_name.bold(),
        run.id
    );
    if let Some(summary) = &run.summary {
        println!("  {}", summary.text);
    }
    if let Some(err) = &run.error {
        println!("  {}", err.red());
    }
    print!("{}", run.logs.timing_report());
}

/// Main application entry point.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    if config.list_types {
        print_catalog();
        if config.template.is_none() && config.definition_paths.is_empty() {
            return Ok(true);
        }
        println!();
    }

    let engine = Engine::in_memory(Arc::new(
        DefaultExecutor::new().with_latency(config.step_latency),
    ));
    let mut queue = Vec::new();
    for definition in collect_definitions(&config)? {
        queue.push(engine.definitions().create(definition)?);
    }

    let workers = config.max_parallel.min(queue.len()).max(1);
    info!("Running {} definition(s) on {} worker(s)", queue.len(), workers);

    let queue = Arc::new(Mutex::new(queue));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let engine = engine.clone();
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let input = config.input.clone();
            thread::spawn(move || loop {
                let next = match queue.lock() {
                    Ok(mut q) => q.pop(),
                    Err(_) => None,
                };
                let Some(definition_id) = next else { break };
                let result = engine
                    .start_run(&definition_id, input.clone())
                    .and_then(|run_id| engine.get_run(&run_id));
                if tx.send((definition_id, result)).is_err() {
                    break;
                }
            })
        })
        .collect();
    drop(tx);

    let mut all_completed = true;
    for (definition_id, result) in rx {
        match result {
            Ok(run) => {
                all_completed &= run.status == RunStatus::Completed;
                print_run(&run);
            }
            Err(e) => {
                all_completed = false;
                error!("Run of {} was rejected: {}", definition_id, e);
            }
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("A run worker panicked");
            all_completed = false;
        }
    }

    Ok(all_completed)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
