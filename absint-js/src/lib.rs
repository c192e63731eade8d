use annotate::Annotation;
use annotate::Annotations;
use annotate::Stats;
use config::AnalysisConfig;
use domain::object::PropKey;
use domain::value::AbstractValue;
use err::AnalysisError;
use heap::State;
use parse_js::parse::toplevel::TopLevelMode;
use parse_js::session::Session;
use plugin::Plugins;

pub mod annotate;
pub mod config;
pub mod domain;
pub mod err;
pub mod heap;
pub mod interp;
pub mod plugin;
pub mod util;

pub use interp::Interpreter;

/// Everything an analysis run produces.
#[derive(Clone, Debug)]
pub struct Report {
  /// Value of the last expression statement evaluated.
  pub end_value: AbstractValue,
  pub state: State,
  pub annotations: Annotations,
  pub stats: Stats,
}

impl Report {
  /// Final value of a global variable, if it was ever defined.
  pub fn global(&self, name: &str) -> Option<AbstractValue> {
    let global = self.state.objects.get(&self.state.global_ref)?;
    let key = PropKey::name(name);
    global.has_own(&key).then(|| global.get(&key))
  }

  /// Annotations of the nodes spanning exactly `start..end` of the analysed source.
  pub fn annotations_at(&self, start: usize, end: usize) -> Vec<&Annotation> {
    self
      .annotations
      .sorted()
      .into_iter()
      .filter(|(_, ann)| ann.span.is_some_and(|s| s.start == start && s.end == end))
      .map(|(_, ann)| ann)
      .collect()
  }
}

/// Analyses UTF-8 JavaScript code with the default plugins.
///
/// # Examples
///
/// ```
/// use absint_js::analyze;
/// use absint_js::config::AnalysisConfig;
/// use absint_js::domain::value::AbstractValue;
///
/// let code = "var a = 1; a + 1;";
/// let report = analyze(code.as_bytes(), AnalysisConfig::default()).unwrap();
/// assert_eq!(report.end_value, AbstractValue::num(2.0));
/// ```
pub fn analyze(source: &[u8], config: AnalysisConfig) -> Result<Report, AnalysisError> {
  analyze_with(source, config, Plugins::default_registry())
}

/// Analyses UTF-8 JavaScript code with a custom plugin registry.
pub fn analyze_with(
  source: &[u8],
  config: AnalysisConfig,
  plugins: &Plugins,
) -> Result<Report, AnalysisError> {
  let session = Session::new();
  let bytes: &[u8] = session.get_allocator().alloc_slice_copy(source);
  let source_str = std::str::from_utf8(bytes).map_err(AnalysisError::InvalidUtf8)?;
  let top_level = parse_js::parse(&session, bytes, TopLevelMode::Global).map_err(|err| {
    AnalysisError::Syntax {
      offset: err.source.start(),
      message: err.to_string(),
    }
  })?;
  let mut interpreter = Interpreter::new(&session, source_str, plugins, config);
  let end_value = interpreter.run(top_level)?;
  let (state, annotations, stats) = interpreter.into_parts();
  Ok(Report {
    end_value,
    state,
    annotations,
    stats,
  })
}
