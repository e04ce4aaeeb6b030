use std::fs;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use frontier_alpha::logging::init_logging;
use frontier_alpha::portfolio::OptimizeRequest;
use frontier_alpha::portfolio::PortfolioEngine;
use frontier_alpha::portfolio::PortfolioEngineConfig;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "frontier-alpha")]
#[command(about = "Mean-variance portfolio optimization over historical returns")]
struct Args {
  /// Request JSON (one object or an array of objects); `-` reads stdin
  #[arg(default_value = "-")]
  request: String,

  /// Engine configuration JSON
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log level (trace, debug, info, warn, error)
  #[arg(short, long, default_value = "info")]
  log_level: String,

  /// Pretty-print the response
  #[arg(short, long)]
  pretty: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Input {
  Batch(Vec<OptimizeRequest>),
  Single(OptimizeRequest),
}

fn read_request(source: &str) -> anyhow::Result<String> {
  if source == "-" {
    let mut buf = String::new();
    std::io::stdin()
      .read_to_string(&mut buf)
      .context("failed to read request from stdin")?;
    Ok(buf)
  } else {
    fs::read_to_string(source).with_context(|| format!("failed to read request file {source}"))
  }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PortfolioEngineConfig> {
  let Some(path) = path else {
    return Ok(PortfolioEngineConfig::default());
  };
  let raw = fs::read_to_string(path)
    .with_context(|| format!("failed to read config {}", path.display()))?;
  serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
  let out = if pretty {
    serde_json::to_string_pretty(value)?
  } else {
    serde_json::to_string(value)?
  };
  println!("{out}");
  Ok(())
}

fn main() -> anyhow::Result<()> {
  let args = Args::parse();
  init_logging(&args.log_level)?;

  let engine = PortfolioEngine::new(load_config(args.config.as_deref())?);
  let raw = read_request(&args.request)?;
  let input: Input = serde_json::from_str(&raw).context("malformed optimize request")?;

  match input {
    Input::Single(request) => {
      let response = engine.optimize_request(&request)?;
      emit(&response, args.pretty)?;
    }
    Input::Batch(requests) => {
      tracing::info!(requests = requests.len(), "optimizing batch");
      let responses: Vec<serde_json::Value> = engine
        .optimize_batch(&requests)
        .into_iter()
        .map(|r| match r {
          Ok(response) => serde_json::to_value(response)
            .unwrap_or_else(|e| json!({ "error": e.to_string() })),
          Err(e) => json!({ "error": e.to_string() }),
        })
        .collect();
      emit(&responses, args.pretty)?;
    }
  }

  Ok(())
}
