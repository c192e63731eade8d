use absint_js::analyze;
use absint_js::config::AnalysisConfig;
use absint_js::err::AnalysisError;
use absint_js::Report;
use clap::ArgAction;
use clap::Parser;
use serde_json::json;
use std::fs;
use std::fs::File;
use std::io::stdin;
use std::io::stdout;
use std::io::Read;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "absint-js", about = "Abstract interpreter for deobfuscating JavaScript")]
struct Cli {
  /// Script to analyse; omit for stdin.
  #[arg(short, long)]
  input: Option<PathBuf>,

  /// Report destination; omit for stdout.
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// JSON file with analysis settings; flags below override it.
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Loop iterations unrolled before widening.
  #[arg(long)]
  max_iter: Option<usize>,

  /// Active calls per call site before recursion is widened.
  #[arg(long)]
  max_recursion: Option<usize>,

  /// Do not renumber heap ids when joining states.
  #[arg(long)]
  no_unify: bool,

  /// Interpret branches that are never taken, for their annotations.
  #[arg(long)]
  process_not_taken: bool,

  /// Treat every switch discriminant as unknown.
  #[arg(long)]
  merge_switch: bool,

  /// Keep references to objects that carry no information instead of unlinking them.
  #[arg(long)]
  keep_top_objects: bool,

  /// Emit the report as JSON.
  #[arg(long)]
  json: bool,

  /// More log output on stderr; repeat for more detail. `RUST_LOG` takes precedence.
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,
}

fn install_subscriber(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn exit_with_error(message: impl AsRef<str>) -> ! {
  eprintln!("error: {}", message.as_ref());
  process::exit(1);
}

fn load_config(args: &Cli) -> AnalysisConfig {
  let mut config = match args.config.as_ref() {
    Some(p) => {
      let raw = fs::read_to_string(p)
        .unwrap_or_else(|err| exit_with_error(format!("failed to read {}: {err}", p.display())));
      serde_json::from_str(&raw)
        .unwrap_or_else(|err| exit_with_error(format!("invalid config {}: {err}", p.display())))
    }
    None => AnalysisConfig::default(),
  };
  if let Some(max_iter) = args.max_iter {
    config = config.with_max_iter(max_iter);
  };
  if let Some(max_recursion) = args.max_recursion {
    config = config.with_max_recursion(max_recursion);
  };
  if args.no_unify {
    config = config.with_unify(false);
  };
  if args.process_not_taken {
    config = config.with_process_not_taken(true);
  };
  if args.merge_switch {
    config = config.with_merge_switch(true);
  };
  if args.keep_top_objects {
    config = config.with_unlink_top_objects(false);
  };
  config
}

fn render_text(report: &Report, source: &str) -> String {
  let stats = &report.stats;
  let mut out = String::new();
  out.push_str(&format!("end value: {}\n", report.end_value));
  out.push_str(&format!("steps: {}\n", stats.steps));
  out.push_str(&format!("static values: {}\n", stats.static_values));
  out.push_str(&format!("beta reductions: {}\n", stats.beta_reductions));
  out.push_str(&format!(
    "functions: {} ({} dead)\n",
    stats.functions, stats.dead_functions
  ));
  out.push_str(&format!("unrolled loops: {}\n", stats.unrolled_loops));
  out.push_str(&format!("sub-programs: {}\n", stats.sub_programs));
  for (_, ann) in report.annotations.sorted() {
    let (Some(span), Some(value)) = (ann.span, ann.static_value.as_ref()) else {
      continue;
    };
    if value.is_top() {
      continue;
    };
    // Nodes of `eval`'d code carry offsets into their own text.
    let Some(text) = source.get(span.start..span.end) else {
      continue;
    };
    let text = text.lines().next().unwrap_or_default();
    out.push_str(&format!("{}..{}\t{text}\t=> {value}\n", span.start, span.end));
  }
  out
}

fn render_json(report: &Report) -> String {
  let annotations = report
    .annotations
    .sorted()
    .into_iter()
    .map(|(_, ann)| ann)
    .collect::<Vec<_>>();
  let doc = json!({
    "endValue": report.end_value,
    "stats": report.stats,
    "annotations": annotations,
  });
  serde_json::to_string_pretty(&doc).unwrap_or_else(|err| exit_with_error(err.to_string()))
}

fn main() {
  let args = Cli::parse();
  install_subscriber(args.verbose);
  let config = load_config(&args);

  let mut input = Vec::new();
  let read_result = match args.input.as_ref() {
    Some(p) => File::open(p).and_then(|mut f| f.read_to_end(&mut input)),
    None => stdin().read_to_end(&mut input),
  };
  if let Err(err) = read_result {
    exit_with_error(format!("failed to read input: {err}"));
  };

  let report = match analyze(&input, config) {
    Ok(report) => report,
    Err(err @ AnalysisError::Fatal { .. }) => {
      if let Some(context) = err.context() {
        eprintln!("{context}");
      };
      exit_with_error(err.to_string());
    }
    Err(err) => exit_with_error(err.to_string()),
  };
  let rendered = if args.json {
    render_json(&report)
  } else {
    render_text(&report, &String::from_utf8_lossy(&input))
  };
  let write_result = match args.output.as_ref() {
    Some(p) => File::create(p).and_then(|mut file| file.write_all(rendered.as_bytes())),
    None => stdout().write_all(rendered.as_bytes()),
  };
  if let Err(err) = write_result {
    exit_with_error(format!("failed to write output: {err}"));
  };
}
