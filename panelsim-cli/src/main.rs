//! Panelsim CLI - import PDF schematics and simulate them from the command line.

use clap::{Parser, Subcommand, ValueEnum};
use panelsim::{
    CancelToken, Circuit, CircuitId, ClientId, ConfidenceReport, EngineConfig, Interpretation,
    OrgId, PanelsimCore, PanelsimError, Severity, SimulationResult, SqliteCircuitStore, Upload,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "panelsim")]
#[command(about = "Import electrical schematics from PDF and simulate them", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database holding circuits and simulation history
    #[arg(long, global = true, value_name = "PATH", default_value = "panelsim.db")]
    db: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Recognition ruleset (JSON), overrides the configured one
    #[arg(long, global = true, value_name = "PATH")]
    ruleset: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "human")]
    format: OutputFormat,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret a PDF schematic without storing it
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Import a PDF schematic as a circuit
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Owning organization
        #[arg(long)]
        org: String,

        /// Client the circuit belongs to
        #[arg(long)]
        client: Option<String>,
    },

    /// List the circuits of an organization, most recent first
    List {
        #[arg(long)]
        org: String,
    },

    /// Show a stored circuit
    Show {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(long)]
        org: String,
    },

    /// Simulate a stored circuit and record the result
    Simulate {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(long)]
        org: String,

        /// Exit with error code if violations found at this severity or higher
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,
    },

    /// Simulation history of a circuit, most recent first
    History {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(long)]
        org: String,
    },

    /// Show the recognition ruleset in use
    Rules,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripts
    Json,
}

#[derive(Clone, ValueEnum)]
enum FailOn {
    Warning,
    Fault,
}

impl FailOn {
    fn threshold(&self) -> Severity {
        match self {
            FailOn::Warning => Severity::Warning,
            FailOn::Fault => Severity::Fault,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    process::exit(exit_code);
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<i32, PanelsimError> {
    match &cli.command {
        Commands::Inspect { file } => {
            let core = PanelsimCore::in_memory(engine_config(cli)?)?;
            let interpretation = core.inspect(&read_upload(file)?, &CancelToken::new())?;
            match cli.format {
                OutputFormat::Human => print_interpretation(&interpretation),
                OutputFormat::Json => print_json(&interpretation),
            }
            Ok(0)
        }
        Commands::Import { file, org, client } => {
            let core = open_core(cli)?;
            let outcome = core.import(
                &OrgId::new(org),
                &read_upload(file)?,
                client.as_ref().map(ClientId::new),
                &CancelToken::new(),
            )?;
            match cli.format {
                OutputFormat::Human => {
                    println!(
                        "Imported circuit {} '{}' ({} components, {} connections)",
                        outcome.circuit.id,
                        outcome.circuit.name,
                        outcome.circuit.components.len(),
                        outcome.circuit.connections.len()
                    );
                    print_report(&outcome.report);
                }
                OutputFormat::Json => print_json(&outcome),
            }
            Ok(0)
        }
        Commands::List { org } => {
            let circuits = open_core(cli)?.list(&OrgId::new(org))?;
            match cli.format {
                OutputFormat::Human => {
                    if circuits.is_empty() {
                        println!("No circuits");
                    }
                    for circuit in &circuits {
                        println!(
                            "{:>6}  {:<32} {:>4} components  {}",
                            circuit.id,
                            circuit.name,
                            circuit.components.len(),
                            circuit.created_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                OutputFormat::Json => print_json(&circuits),
            }
            Ok(0)
        }
        Commands::Show { id, org } => {
            let circuit = open_core(cli)?.get(&OrgId::new(org), CircuitId(*id))?;
            match cli.format {
                OutputFormat::Human => print_circuit(&circuit),
                OutputFormat::Json => print_json(&circuit),
            }
            Ok(0)
        }
        Commands::Simulate { id, org, fail_on } => {
            let result =
                open_core(cli)?.simulate(&OrgId::new(org), CircuitId(*id), &CancelToken::new())?;
            match cli.format {
                OutputFormat::Human => print_result(&result),
                OutputFormat::Json => print_json(&result),
            }
            let failed = fail_on.as_ref().is_some_and(|level| {
                let threshold = level.threshold();
                result.violations.iter().any(|v| v.severity >= threshold)
            });
            Ok(if failed { 1 } else { 0 })
        }
        Commands::History { id, org } => {
            let history = open_core(cli)?.history(&OrgId::new(org), CircuitId(*id))?;
            match cli.format {
                OutputFormat::Human => {
                    if history.is_empty() {
                        println!("No simulations recorded");
                    }
                    for result in &history {
                        println!(
                            "{}  {}  {:<7} {} violations",
                            result.computed_at.format("%Y-%m-%d %H:%M:%S"),
                            result.id,
                            result.status,
                            result.violations.len()
                        );
                    }
                }
                OutputFormat::Json => print_json(&history),
            }
            Ok(0)
        }
        Commands::Rules => {
            let core = PanelsimCore::in_memory(engine_config(cli)?)?;
            let ruleset = core.ruleset();
            match cli.format {
                OutputFormat::Human => {
                    println!("Ruleset: {}", ruleset.name);
                    if let Some(description) = &ruleset.description {
                        println!("  {}", description);
                    }
                    println!("  Attach radius: {} pt\n", ruleset.attach_radius);
                    println!("Component rules:");
                    for rule in &ruleset.component_rules {
                        println!(
                            "  {:<18} {:<20} {}",
                            rule.kind,
                            rule.name.as_deref().unwrap_or("-"),
                            rule.pattern
                        );
                    }
                    println!("\nConnection rules:");
                    for rule in &ruleset.connection_rules {
                        println!("  {:<20} {}", rule.name.as_deref().unwrap_or("-"), rule.pattern);
                    }
                }
                OutputFormat::Json => print_json(ruleset),
            }
            Ok(0)
        }
    }
}

fn engine_config(cli: &Cli) -> Result<EngineConfig, PanelsimError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ruleset) = &cli.ruleset {
        config.ruleset_path = Some(ruleset.clone());
    }
    Ok(config)
}

fn open_core(cli: &Cli) -> Result<PanelsimCore, PanelsimError> {
    let store = SqliteCircuitStore::open(&cli.db)?;
    PanelsimCore::new(engine_config(cli)?, Arc::new(store))
}

/// Content type comes from the file extension
fn read_upload(path: &Path) -> Result<Upload, PanelsimError> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    let content_type = if is_pdf {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    Ok(Upload {
        name,
        content_type: content_type.to_string(),
        bytes,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: cannot serialize output: {}", e),
    }
}

fn print_interpretation(interpretation: &Interpretation) {
    let draft = &interpretation.draft;
    println!("\nDocument: {}", draft.name);
    println!("{}", "─".repeat(60));

    println!("\n  Components ({}):", draft.components.len());
    for component in &draft.components {
        let rated: Vec<String> = component
            .rated
            .named_values()
            .iter()
            .filter_map(|(name, value)| value.map(|v| format!("{}={}", name, v)))
            .collect();
        println!(
            "    {:<8} {:<18} {}{}",
            component.id,
            component.kind,
            component.label.as_deref().map(|l| format!("'{}' ", l)).unwrap_or_default(),
            rated.join(" ")
        );
    }

    println!("\n  Connections ({}):", draft.connections.len());
    for connection in &draft.connections {
        println!(
            "    {:<8} {} -> {}",
            connection.id, connection.source, connection.target
        );
    }

    print_report(&interpretation.report);
}

fn print_report(report: &ConfidenceReport) {
    println!(
        "\n  Confidence: {:.0}% ({}/{} text blocks recognised)",
        report.confidence() * 100.0,
        report.recognized_blocks,
        report.total_blocks
    );
    for block in &report.unmatched {
        println!("    unmatched p{}: {}", block.page, block.text);
    }
    for conflict in &report.component_conflicts {
        println!(
            "    conflict {}.{}: kept {}, discarded {}",
            conflict.component_id, conflict.attribute, conflict.kept, conflict.discarded
        );
    }
    for conflict in &report.connection_conflicts {
        println!(
            "    conflict {} -> {}: kept first conductor",
            conflict.source, conflict.target
        );
    }
    for rejected in &report.rejected_connections {
        println!(
            "    rejected {} -> {}: {}",
            rejected.source, rejected.target, rejected.reason
        );
    }
    for ignored in &report.ignored_attributes {
        println!(
            "    ignored {} on {}: {}",
            ignored.attribute, ignored.subject, ignored.value
        );
    }
}

fn print_circuit(circuit: &Circuit) {
    println!("\nCircuit {}: {}", circuit.id, circuit.name);
    println!("{}", "─".repeat(60));
    println!("  Organization: {}", circuit.organization_id);
    if let Some(client) = &circuit.client_id {
        println!("  Client:       {}", client);
    }
    println!("  Created:      {}", circuit.created_at.to_rfc3339());

    let stats = circuit.graph_stats();
    println!(
        "  Shape:        {} sources, {} loads, {} islands{}",
        stats.source_count,
        stats.load_count,
        stats.island_count,
        if stats.has_cycles { ", meshed" } else { "" }
    );

    println!("\n  Components:");
    for component in &circuit.components {
        println!("    {:<8} {}", component.id, component.kind);
    }
    println!("\n  Connections:");
    for connection in &circuit.connections {
        println!(
            "    {:<8} {} -> {}",
            connection.id, connection.source, connection.target
        );
    }
}

fn print_result(result: &SimulationResult) {
    println!("\nSimulation {} of circuit {}", result.id, result.circuit_id);
    println!("{}", "─".repeat(60));
    println!(
        "  Status: {} ({} iterations{})",
        result.status,
        result.iterations,
        if result.converged { "" } else { ", not converged" }
    );

    println!("\n  Components:");
    for (id, reading) in &result.components {
        println!(
            "    {:<8} {:>8.2} V {:>8.2} A  {}",
            id, reading.voltage_v, reading.current_a, reading.status
        );
    }

    if result.violations.is_empty() {
        println!("\n  No violations");
        return;
    }
    println!("\n  Violations:");
    for violation in &result.violations {
        println!(
            "    [{}] {}: {}",
            violation.severity, violation.kind, violation.message
        );
    }
}
