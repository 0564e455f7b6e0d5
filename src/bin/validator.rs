//! Extended JSON Schema Validator CLI
//!
//! Loads schemas, then validates documents against them, including the
//! cross-document relational keywords.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use extended_json_validator::{
    DocumentSource, ExtensibleValidator, GuessMode, SchemaSource, ValidateOptions, ValidatorConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ejsv-validate")]
#[command(about = "Validate JSON/YAML documents against extended JSON Schemas")]
struct Cli {
    /// Schema files or directories
    #[arg(required = true)]
    schemas: Vec<PathBuf>,

    /// Document files or directories to validate
    #[arg(short, long, num_args = 1..)]
    documents: Vec<PathBuf>,

    /// Configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Cache directory for key providers
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Try every loaded schema on documents without a schema hint
    #[arg(long, conflicts_with = "use_schemas")]
    guess_schema: bool,

    /// Try only these schemas on documents without a schema hint
    #[arg(long, num_args = 1..)]
    use_schemas: Vec<String>,

    /// Validate each element of top-level arrays as its own document
    #[arg(long)]
    iterate_arrays: bool,

    /// Invalidate caches before validating
    #[arg(long)]
    invalidate: bool,

    /// Warm up caches before validating
    #[arg(long)]
    warm_up: bool,

    /// Write a JSON report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Never write to the cache directory
    #[arg(long)]
    read_only: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = ValidatorConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }
    if cli.read_only {
        config.read_only_cache = true;
    }

    let mut validator = ExtensibleValidator::new(config)?;
    let sources: Vec<SchemaSource> = cli.schemas.into_iter().map(SchemaSource::Path).collect();
    let stats = validator.load_schemas(&sources)?;
    println!("📚 Schemas: {}", stats);

    let mut schema_report = Vec::new();
    let mut schema_failures = !validator.rejected_schemas().is_empty();
    for rejected in validator.rejected_schemas() {
        println!("  ❌ {}", rejected.source);
        for error in &rejected.errors {
            println!("     └─ {}", error);
        }
        schema_report.push(serde_json::json!({"source": rejected.source, "errors": rejected.errors}));
    }
    for record in validator.schemas() {
        let errors: Vec<_> = record.all_errors().cloned().collect();
        if errors.is_empty() {
            println!("  ✅ {}", record.uri);
        } else {
            schema_failures = true;
            println!("  ❌ {} ({})", record.uri, record.source);
            for error in &errors {
                println!("     └─ {}", error);
            }
        }
        schema_report.push(serde_json::json!({
            "source": record.source,
            "schema_id": record.uri,
            "schema_hash": record.content_hash,
            "errors": errors,
        }));
    }
    for cycle in validator.reference_cycles() {
        println!("  🔁 $ref cycle: {}", cycle.join(" -> "));
    }

    if cli.documents.is_empty() {
        write_report(cli.report.as_ref(), &schema_report, &[])?;
        return Ok(if schema_failures { 3 } else { 0 });
    }

    if validator.valid_document_schemas(false).is_empty() {
        eprintln!("❌ No schema was successfully loaded");
        return Ok(1);
    }

    if cli.invalidate {
        info!("Invalidating caches");
        validator.invalidate_caches();
    }
    if cli.warm_up {
        info!("Warming up caches");
        validator.warm_up_caches();
    }

    let guess = if !cli.use_schemas.is_empty() {
        GuessMode::Only(cli.use_schemas)
    } else if cli.guess_schema {
        GuessMode::All
    } else {
        GuessMode::Off
    };
    let options = ValidateOptions {
        guess,
        iterate_arrays: cli.iterate_arrays,
        schema_key_paths: None,
    };

    let documents = cli.documents.into_iter().map(DocumentSource::Path).collect();
    let mut exit_code = 0;
    let mut document_report = Vec::new();
    let mut run = validator.validate_documents(documents, options)?;
    for report in run.by_ref() {
        if report.is_valid() {
            println!("✅ {}", report.file);
        } else {
            exit_code = 2;
            println!("❌ {}", report.file);
            for error in &report.errors {
                println!("   └─ {}", error);
            }
        }
        document_report.push(serde_json::to_value(&report)?);
    }
    println!();
    println!("📊 Documents: {}", run.stats());

    write_report(cli.report.as_ref(), &schema_report, &document_report)?;
    Ok(exit_code)
}

fn write_report(
    path: Option<&PathBuf>,
    schemas: &[serde_json::Value],
    documents: &[serde_json::Value],
) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let report = serde_json::json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "schemas": schemas,
        "documents": documents,
    });
    fs::write(path, serde_json::to_string_pretty(&report)?)
        .with_context(|| format!("writing report to {}", path.display()))?;
    println!("📄 Report written to {}", path.display());
    Ok(())
}
