//! Byte filters applied to assets and rendered pages.
//!
//! A filter turns one byte buffer into another. Filters are addressed by a
//! spec in configuration, either a bare name (`"cssmin"`) or an argument
//! list whose first entry names the filter (`["exec", "tidy", "-q"]`). The
//! [`FilterRegistry`] maps names to constructors and builds each configured
//! filter once when the configuration is loaded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use thiserror::Error;

/// Error produced while building or running a filter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilterError {
    #[error("unknown filter \"{0}\"")]
    Unknown(String),
    #[error("filter \"{name}\": {message}")]
    Invalid { name: String, message: String },
    #[error("exec {command}: {message}")]
    Exec { command: String, message: String },
    #[error("cssmin: {0}")]
    Css(String),
    #[error("htmlmin: {0}")]
    Html(String),
    #[error("jsmin: {0}")]
    Js(String),
}

/// Transformation over a byte buffer.
pub trait Filter: Send + Sync {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError>;
}

/// Filter that returns its input unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Filter for Identity {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        Ok(input.to_vec())
    }
}

/// Filter spec as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Name(String),
    Args(Vec<String>),
}

impl FilterSpec {
    /// Registered filter name this spec refers to.
    pub fn name(&self) -> &str {
        match self {
            FilterSpec::Name(name) => name,
            FilterSpec::Args(args) => args.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Arguments after the filter name.
    pub fn args(&self) -> &[String] {
        match self {
            FilterSpec::Name(_) => &[],
            FilterSpec::Args(args) => args.get(1..).unwrap_or(&[]),
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::Name(name) => write!(f, "{}", name),
            FilterSpec::Args(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

/// Constructor for a named filter, given the arguments after its name.
pub type FilterConstructor = fn(&[String]) -> Result<Arc<dyn Filter>, FilterError>;

/// Name to constructor table.
#[derive(Clone)]
pub struct FilterRegistry {
    constructors: HashMap<String, FilterConstructor>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("exec", Exec::construct);
        registry.register("cssmin", CssMin::construct);
        registry.register("htmlmin", HtmlMin::construct);
        registry.register("jsmin", JsMin::construct);
        registry
    }
}

impl FilterRegistry {
    /// Registry with no filters at all.
    pub fn empty() -> Self {
        Self { constructors: HashMap::new() }
    }

    pub fn register(&mut self, name: &str, constructor: FilterConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build the filter a spec describes.
    pub fn build(&self, spec: &FilterSpec) -> Result<Arc<dyn Filter>, FilterError> {
        let constructor = self
            .constructors
            .get(spec.name())
            .ok_or_else(|| FilterError::Unknown(spec.name().to_string()))?;
        constructor(spec.args())
    }

    /// Build a keyed collection of filters, e.g. page filters keyed by
    /// output extension.
    pub fn build_all(
        &self,
        specs: &HashMap<String, FilterSpec>,
    ) -> Result<FilterCollection, FilterError> {
        let mut filters = HashMap::new();
        for (key, spec) in specs {
            filters.insert(key.clone(), self.build(spec)?);
        }
        Ok(FilterCollection { filters })
    }
}

/// Filters addressed by string key. Missing keys resolve to [`Identity`].
#[derive(Clone, Default)]
pub struct FilterCollection {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, filter: Arc<dyn Filter>) {
        self.filters.insert(key.to_string(), filter);
    }

    pub fn get(&self, key: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(key)
    }

    /// Apply the filter registered under `key`, or pass through.
    pub fn apply(&self, key: &str, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        match self.filters.get(key) {
            Some(filter) => filter.apply(input),
            None => Identity.apply(input),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Runs an external command with the input on stdin and returns its stdout.
#[derive(Debug, Clone)]
pub struct Exec {
    program: String,
    args: Vec<String>,
}

impl Exec {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self { program: program.to_string(), args: args.to_vec() }
    }

    fn construct(args: &[String]) -> Result<Arc<dyn Filter>, FilterError> {
        match args.split_first() {
            Some((program, rest)) => Ok(Arc::new(Exec::new(program, rest))),
            None => Err(FilterError::Invalid {
                name: "exec".to_string(),
                message: "missing command".to_string(),
            }),
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn error(&self, message: impl fmt::Display) -> FilterError {
        FilterError::Exec { command: self.command_line(), message: message.to_string() }
    }
}

impl Filter for Exec {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.error(e))?;

        // Feed stdin from a separate thread so a chatty child cannot block
        // on a full stdout pipe while we are still writing.
        let stdin = child.stdin.take();
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            // A child that exits without reading stdin breaks the pipe; its
            // exit status below is what matters.
            let _ = writer.join();
            output
        });

        let output = output.map_err(|e| self.error(e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.error(format!("{}: {}", output.status, stderr.trim())));
        }
        Ok(output.stdout)
    }
}

/// CSS minifier backed by lightningcss.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMin;

impl CssMin {
    fn construct(_args: &[String]) -> Result<Arc<dyn Filter>, FilterError> {
        Ok(Arc::new(CssMin))
    }
}

impl Filter for CssMin {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};

        let css = std::str::from_utf8(input).map_err(|e| FilterError::Css(e.to_string()))?;
        let mut sheet = StyleSheet::parse(css, ParserOptions::default())
            .map_err(|e| FilterError::Css(e.to_string()))?;
        sheet.minify(MinifyOptions::default()).map_err(|e| FilterError::Css(e.to_string()))?;
        let printed = sheet
            .to_css(PrinterOptions { minify: true, ..PrinterOptions::default() })
            .map_err(|e| FilterError::Css(e.to_string()))?;
        Ok(printed.code.into_bytes())
    }
}

/// HTML minifier. Drops comments and collapses whitespace outside `<pre>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMin;

impl HtmlMin {
    fn construct(_args: &[String]) -> Result<Arc<dyn Filter>, FilterError> {
        Ok(Arc::new(HtmlMin))
    }
}

impl Filter for HtmlMin {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        let html = std::str::from_utf8(input).map_err(|e| FilterError::Html(e.to_string()))?;
        let minified = html_minifier::minify(html).map_err(|e| FilterError::Html(e.to_string()))?;
        Ok(minified.into_bytes())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsMin;

impl JsMin {
    fn construct(_args: &[String]) -> Result<Arc<dyn Filter>, FilterError> {
        Ok(Arc::new(JsMin))
    }
}

impl Filter for JsMin {
    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        let js = std::str::from_utf8(input).map_err(|e| FilterError::Js(e.to_string()))?;
        Ok(minifier::js::minify(js).to_string().into_bytes())
    }
}
