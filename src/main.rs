//! Strata CLI
//!
//! Entry point for the `strata` command-line tool.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process;
use strata::loader::{self, SourceBinding};
use strata::sweep;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Layered experiment-configuration composer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load configuration sources and report their declared targets and
    /// bindings without composing anything
    Check {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Configuration source files to inspect
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Advance a grid-search sweep and print the current combination
    Sweep {
        /// Path to the sweep progress file
        #[arg(long)]
        progress: PathBuf,

        /// One axis of candidate values, comma separated; repeatable
        #[arg(long = "axis")]
        axis: Vec<String>,

        /// TOML file declaring the axes (axes = [[...], [...]])
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { json, sources } => {
            run_check(json, sources);
        }
        Commands::Sweep {
            progress,
            axis,
            spec,
            json,
        } => {
            run_sweep(progress, axis, spec, json);
        }
    }
}

fn run_check(json: bool, sources: Vec<PathBuf>) {
    let mut reports = Vec::new();
    for path in &sources {
        match loader::load(path) {
            Ok(source) => reports.push(source),
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
    }

    if json {
        let value = Value::Array(reports.iter().map(source_report).collect());
        match serde_json::to_string_pretty(&value) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    for source in &reports {
        println!("{}", source.path().display());
        println!("  target: {}", source.target());
        println!("  digest: {}", &source.digest()[..12]);
        for (name, binding) in source.bindings() {
            match binding {
                SourceBinding::Plain(value) => println!("  {} = {}", name, value),
                SourceBinding::Computed(attr) => {
                    let kind = if attr.memoize() { "cached" } else { "computed" };
                    println!("  {} = <{}>", name, kind);
                }
            }
        }
    }
}

fn source_report(source: &strata::Source) -> Value {
    let mut bindings = serde_json::Map::new();
    for (name, binding) in source.bindings() {
        let entry = match binding {
            SourceBinding::Plain(value) => value.clone(),
            SourceBinding::Computed(attr) => serde_json::json!({
                "computed": { "memoize": attr.memoize() }
            }),
        };
        bindings.insert(name.clone(), entry);
    }
    serde_json::json!({
        "path": source.path().to_string_lossy(),
        "target": source.target(),
        "digest": source.digest(),
        "bindings": bindings,
    })
}

fn run_sweep(progress: PathBuf, axis: Vec<String>, spec: Option<PathBuf>, json: bool) {
    let axes = match collect_axes(axis, spec) {
        Ok(axes) => axes,
        Err(message) => {
            eprintln!("error: {}", message);
            process::exit(1);
        }
    };

    match sweep::advance(&progress, &axes) {
        Ok(combination) => {
            if json {
                println!("{}", Value::Array(combination));
            } else {
                let parts: Vec<String> = combination
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                println!("{}", parts.join(" "));
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    }
}

fn collect_axes(axis: Vec<String>, spec: Option<PathBuf>) -> Result<Vec<Vec<Value>>, String> {
    if let Some(spec_path) = spec {
        if !axis.is_empty() {
            return Err("pass either --axis or --spec, not both".to_string());
        }
        let text = std::fs::read_to_string(&spec_path)
            .map_err(|e| format!("cannot read {}: {}", spec_path.display(), e))?;
        let parsed: SweepSpec = toml::from_str(&text)
            .map_err(|e| format!("cannot parse {}: {}", spec_path.display(), e))?;
        return Ok(parsed
            .axes
            .into_iter()
            .map(|axis| axis.into_iter().map(toml_to_json).collect())
            .collect());
    }

    if axis.is_empty() {
        return Err("at least one --axis (or --spec) is required".to_string());
    }
    Ok(axis
        .iter()
        .map(|tokens| tokens.split(',').map(parse_axis_value).collect())
        .collect())
}

/// Axis declaration file for `strata sweep --spec`.
#[derive(serde::Deserialize)]
struct SweepSpec {
    axes: Vec<Vec<toml::Value>>,
}

/// Parse one axis token: JSON scalars pass through, anything else is a
/// string ("1e-5" is a number, "adam" a string).
fn parse_axis_value(token: &str) -> Value {
    serde_json::from_str(token.trim()).unwrap_or_else(|_| Value::String(token.trim().to_string()))
}

/// Convert TOML values to JSON values.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            Value::Object(map)
        }
    }
}
