//! Layouts and the template renderer.
//!
//! Layouts live in `layouts/`, one file per layout named by its file stem.
//! A layout may carry front matter whose `layout` key names a parent layout;
//! rendering wraps content in the page's layout, then in that layout's parent
//! and so on until a layout without a parent (or with parent `none`).
//!
//! # Template syntax
//!
//! ```text
//! {{ content }}                 content being wrapped
//! {{ page.title }}              front matter of the page being rendered
//! {{ site.name }}               site.toml values and [properties]
//! {{ asset "site.css" }}        URL of a materialized asset, or a buffered asset's text
//! {{ static "img/logo.png" }}   URL below the static prefix
//! {{ xml page.title }}          XML-escaped value
//! {{ json page.title }}         JSON string escapes, without the quotes
//! {{ include "nav.html" }}      text of includes/nav.html
//! {{ truncate 40 page.title }}  at most 40 characters, then "..."
//! {{ abspaths content }}        site.url prefixed to src="/..." and href="/..."
//! {{ lastindex site.posts }}    index of the last element of a list
//! {{ each page.posts }}<a href="{{ item.url }}">{{ item.title }}</a>{{ end }}
//! ```
//!
//! Lookups that find nothing render as an empty string.

use crate::build::{AssetIndex, AssetRef};
use crate::content::metafile::{get_str, parse_meta, split, value_text, Meta, Split};
use crate::content::{is_ignored, ContentError};
use crate::sitemap::escape_xml;
use crate::urls::{abs_paths, join_url, slash_path};
use serde_yaml::{Mapping, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

/// Parent name meaning "no parent".
pub const NO_LAYOUT: &str = "none";

/// Include texts keyed by `/`-separated path below `includes/`.
pub type Includes = HashMap<String, String>;

/// Error produced while loading or rendering templates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RenderError {
    #[error("template {template}: {message}")]
    Parse { template: String, message: String },
    #[error("layout \"{0}\" not found")]
    UnknownLayout(String),
    #[error("layout cycle detected: {0}")]
    LayoutCycle(String),
    #[error("template {template}: asset \"{name}\" not found")]
    UnknownAsset { template: String, name: String },
    #[error("template {template}: include \"{name}\" not found")]
    UnknownInclude { template: String, name: String },
    #[error("template {template}: {message}")]
    Function { template: String, message: String },
    #[error(transparent)]
    Load(#[from] ContentError),
}

/// Renders content inside a named template.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, meta: &Meta, content: &str) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Asset,
    Static,
    Xml,
    Json,
    Include,
    Truncate,
    AbsPaths,
    LastIndex,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "asset" => Func::Asset,
            "static" => Func::Static,
            "xml" => Func::Xml,
            "json" => Func::Json,
            "include" => Func::Include,
            "truncate" => Func::Truncate,
            "abspaths" => Func::AbsPaths,
            "lastindex" => Func::LastIndex,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Func::Asset => "asset",
            Func::Static => "static",
            Func::Xml => "xml",
            Func::Json => "json",
            Func::Include => "include",
            Func::Truncate => "truncate",
            Func::AbsPaths => "abspaths",
            Func::LastIndex => "lastindex",
        }
    }

    fn accepts(self, args: &[Arg]) -> bool {
        match self {
            Func::Truncate => matches!(args, [Arg::Number(_), _]),
            Func::LastIndex => matches!(args, [Arg::Path(_)]),
            _ => args.len() == 1,
        }
    }

    fn usage(self) -> &'static str {
        match self {
            Func::Truncate => "a character count and a value",
            Func::LastIndex => "a variable",
            _ => "one argument",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Literal(String),
    Number(usize),
    Path(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Path(Vec<String>),
    Call(Func, Vec<Arg>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Expr(Expr),
    Each { path: Vec<String>, body: Vec<Node> },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

fn parse_error(template: &str, message: impl Into<String>) -> RenderError {
    RenderError::Parse { template: template.to_string(), message: message.into() }
}

impl Template {
    pub fn parse(name: &str, source: &str) -> Result<Self, RenderError> {
        let mut open: Vec<(Vec<String>, Vec<Node>)> = Vec::new();
        let mut nodes = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                nodes.push(Node::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| parse_error(name, "unclosed {{"))?;
            let tag = after[..end].trim();
            rest = &after[end + 2..];

            if let Some(path) = tag.strip_prefix("each ") {
                open.push((parse_path(name, path.trim())?, std::mem::take(&mut nodes)));
            } else if tag == "end" {
                let (path, outer) =
                    open.pop().ok_or_else(|| parse_error(name, "{{ end }} without {{ each }}"))?;
                let body = std::mem::replace(&mut nodes, outer);
                nodes.push(Node::Each { path, body });
            } else {
                nodes.push(Node::Expr(parse_expr(name, tag)?));
            }
        }
        if !rest.is_empty() {
            nodes.push(Node::Text(rest.to_string()));
        }
        if !open.is_empty() {
            return Err(parse_error(name, "{{ each }} without {{ end }}"));
        }
        Ok(Self { name: name.to_string(), nodes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, scope: Scope<'_>) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render_nodes(&self.nodes, scope, &mut out)?;
        Ok(out)
    }

    fn render_nodes(&self, nodes: &[Node], scope: Scope<'_>, out: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Expr(expr) => out.push_str(&self.eval(expr, scope)?),
                Node::Each { path, body } => {
                    if let Some(Value::Sequence(items)) = scope.resolve(path) {
                        for item in items {
                            self.render_nodes(body, Scope { item: Some(item), ..scope }, out)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, scope: Scope<'_>) -> Result<String, RenderError> {
        match expr {
            Expr::Path(path) => Ok(scope.text(path)),
            Expr::Call(func, args) => self.call(*func, args, scope),
        }
    }

    fn call(&self, func: Func, args: &[Arg], scope: Scope<'_>) -> Result<String, RenderError> {
        match (func, args) {
            (Func::Truncate, [Arg::Number(n), value]) => Ok(truncate(&scope.arg_text(value), *n)),
            (Func::LastIndex, [Arg::Path(path)]) => self.last_index(path, scope),
            (Func::Xml, [arg]) => Ok(escape_xml(&scope.arg_text(arg))),
            (Func::Json, [arg]) => self.json(&scope.arg_text(arg)),
            (Func::Static, [arg]) => Ok(join_url(scope.static_url, &scope.arg_text(arg))),
            (Func::AbsPaths, [arg]) => Ok(abs_paths(scope.site_url(), &scope.arg_text(arg))),
            (Func::Asset, [arg]) => {
                let name = scope.arg_text(arg);
                match scope.assets.get(&name) {
                    Some(AssetRef::Url(url)) => Ok(url.clone()),
                    Some(AssetRef::Inline(text)) => Ok(text.clone()),
                    None => Err(RenderError::UnknownAsset { template: self.name.clone(), name }),
                }
            }
            (Func::Include, [arg]) => {
                let name = scope.arg_text(arg);
                match scope.includes.get(&name) {
                    Some(text) => Ok(text.clone()),
                    None => Err(RenderError::UnknownInclude { template: self.name.clone(), name }),
                }
            }
            _ => Err(self.function_error(format!("{} takes {}", func.name(), func.usage()))),
        }
    }

    fn json(&self, text: &str) -> Result<String, RenderError> {
        let encoded = serde_json::to_string(text).map_err(|e| self.function_error(format!("json: {}", e)))?;
        Ok(encoded[1..encoded.len() - 1].to_string())
    }

    fn last_index(&self, path: &[String], scope: Scope<'_>) -> Result<String, RenderError> {
        let len = match scope.resolve(path) {
            Some(Value::Sequence(items)) => items.len(),
            Some(Value::Mapping(map)) => map.len(),
            Some(Value::String(s)) => s.len(),
            _ => return Err(self.function_error(format!("lastindex of non-list value {}", path.join(".")))),
        };
        Ok((len as i64 - 1).to_string())
    }

    fn function_error(&self, message: String) -> RenderError {
        RenderError::Function { template: self.name.clone(), message }
    }
}

/// First `n` characters of `text` followed by `...`, or `text` if it is no longer.
pub fn truncate(text: &str, n: usize) -> String {
    match text.char_indices().nth(n) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn parse_expr(template: &str, tag: &str) -> Result<Expr, RenderError> {
    let Some((name, rest)) = tag.split_once(char::is_whitespace) else {
        return Ok(Expr::Path(parse_path(template, tag)?));
    };
    let func = Func::from_name(name)
        .ok_or_else(|| parse_error(template, format!("unknown function \"{}\"", name)))?;
    let args = split_args(template, rest)?
        .into_iter()
        .map(|arg| parse_arg(template, arg))
        .collect::<Result<Vec<_>, _>>()?;
    if !func.accepts(&args) {
        return Err(parse_error(template, format!("{} takes {}", func.name(), func.usage())));
    }
    Ok(Expr::Call(func, args))
}

/// Split function arguments at whitespace, keeping quoted strings whole.
fn split_args<'a>(template: &str, s: &'a str) -> Result<Vec<&'a str>, RenderError> {
    let mut args = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let end = match rest.strip_prefix('"') {
            Some(quoted) => quoted.find('"').ok_or_else(|| parse_error(template, "unclosed string"))? + 2,
            None => rest.find(char::is_whitespace).unwrap_or(rest.len()),
        };
        args.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Ok(args)
}

fn parse_arg(template: &str, arg: &str) -> Result<Arg, RenderError> {
    if let Some(literal) = arg.strip_prefix('"').and_then(|a| a.strip_suffix('"')) {
        return Ok(Arg::Literal(literal.to_string()));
    }
    if arg.chars().all(|c| c.is_ascii_digit()) {
        return arg
            .parse()
            .map(Arg::Number)
            .map_err(|_| parse_error(template, format!("invalid number \"{}\"", arg)));
    }
    Ok(Arg::Path(parse_path(template, arg)?))
}

fn parse_path(template: &str, s: &str) -> Result<Vec<String>, RenderError> {
    let segments: Vec<String> = s.split('.').map(str::to_string).collect();
    let valid_segment =
        |seg: &String| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if !segments.iter().all(valid_segment) {
        return Err(parse_error(template, format!("invalid expression \"{}\"", s)));
    }
    match segments[0].as_str() {
        "content" if segments.len() == 1 => Ok(segments),
        "page" | "site" if segments.len() > 1 => Ok(segments),
        "item" => Ok(segments),
        _ => Err(parse_error(template, format!("unknown variable \"{}\"", s))),
    }
}

/// Values visible while rendering one template.
#[derive(Clone, Copy)]
struct Scope<'a> {
    site: &'a Mapping,
    page: &'a Meta,
    content: &'a str,
    item: Option<&'a Value>,
    assets: &'a AssetIndex,
    includes: &'a Includes,
    static_url: &'a str,
}

impl<'a> Scope<'a> {
    fn resolve(&self, path: &[String]) -> Option<&'a Value> {
        let (root, rest) = path.split_first()?;
        let (start, tail) = match root.as_str() {
            "item" => (self.item?, rest),
            "page" => {
                let (key, tail) = rest.split_first()?;
                (self.page.get(key.as_str())?, tail)
            }
            "site" => {
                let (key, tail) = rest.split_first()?;
                (self.site.get(key.as_str())?, tail)
            }
            _ => return None,
        };
        tail.iter().try_fold(start, |value, key| value.get(key.as_str()))
    }

    fn text(&self, path: &[String]) -> String {
        if path.len() == 1 && path[0] == "content" {
            return self.content.to_string();
        }
        self.resolve(path).map(value_text).unwrap_or_default()
    }

    fn arg_text(&self, arg: &Arg) -> String {
        match arg {
            Arg::Literal(s) => s.clone(),
            Arg::Number(n) => n.to_string(),
            Arg::Path(path) => self.text(path),
        }
    }

    fn site_url(&self) -> &'a str {
        self.site.get("url").and_then(Value::as_str).unwrap_or("")
    }
}

/// A named layout and its parent.
#[derive(Debug, Clone)]
pub struct Layout {
    pub name: String,
    pub parent: Option<String>,
    template: Template,
}

impl Layout {
    /// Parse layout source, which may start with front matter.
    pub fn parse(name: &str, source: &str) -> Result<Self, RenderError> {
        let (parent, body) = match split(source) {
            Split::Parsed(yaml, body) => {
                let meta = parse_meta(yaml)
                    .map_err(|e| parse_error(name, format!("front matter: {}", e)))?;
                (get_str(&meta, "layout").map(str::to_string), body)
            }
            Split::Unterminated => return Err(parse_error(name, "front matter is not terminated by ---")),
            Split::Plain => (None, source),
        };
        let parent = parent.filter(|p| !p.is_empty() && p != NO_LAYOUT);
        Ok(Self { name: name.to_string(), parent, template: Template::parse(name, body)? })
    }
}

/// Every layout of a site plus the values shared by all renders.
pub struct LayoutCollection {
    layouts: HashMap<String, Layout>,
    site: Mapping,
    assets: Arc<AssetIndex>,
    includes: Includes,
    static_url: String,
}

impl LayoutCollection {
    pub fn new(site: Mapping, assets: Arc<AssetIndex>, static_url: &str) -> Self {
        Self {
            layouts: HashMap::new(),
            site,
            assets,
            includes: Includes::new(),
            static_url: static_url.to_string(),
        }
    }

    /// Replace the texts available to `include`.
    pub fn with_includes(mut self, includes: Includes) -> Self {
        self.includes = includes;
        self
    }

    /// Create a collection from every file in `dir`. A missing directory has no layouts.
    pub fn load(dir: &Path, site: Mapping, assets: Arc<AssetIndex>, static_url: &str) -> Result<Self, RenderError> {
        let mut collection = Self::new(site, assets, static_url);
        if !dir.is_dir() {
            return Ok(collection);
        }
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                ContentError::io(&path, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || is_ignored(path) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = fs::read(path).map_err(|e| ContentError::io(path, e))?;
            let source = String::from_utf8(bytes).map_err(|_| ContentError::Encoding(path.to_path_buf()))?;
            collection.insert(Layout::parse(name, &source)?);
            info!("L {}", name);
        }
        Ok(collection)
    }

    pub fn insert(&mut self, layout: Layout) {
        self.layouts.insert(layout.name.clone(), layout);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    fn scope<'a>(&'a self, meta: &'a Meta, content: &'a str) -> Scope<'a> {
        Scope {
            site: &self.site,
            page: meta,
            content,
            item: None,
            assets: &self.assets,
            includes: &self.includes,
            static_url: &self.static_url,
        }
    }

    /// Expand `content` as a template, then wrap it in the page's layout.
    ///
    /// The layout is the `layout` front matter key, or `default_layout`.
    /// A layout named in front matter must exist; a missing default layout
    /// leaves the expanded content unwrapped.
    pub fn render_page(&self, meta: &Meta, content: &str, default_layout: &str) -> Result<String, RenderError> {
        let name = get_str(meta, "url").unwrap_or("page");
        let expanded = Template::parse(name, content)?.render(self.scope(meta, content))?;

        let layout = match get_str(meta, "layout") {
            Some(layout) => layout,
            None if self.contains(default_layout) => default_layout,
            None => return Ok(expanded),
        };
        if layout.is_empty() || layout == NO_LAYOUT {
            return Ok(expanded);
        }
        self.render(layout, meta, &expanded)
    }
}

/// Read every file below `dir` for the `include` function. A missing
/// directory has no includes.
pub fn load_includes(dir: &Path) -> Result<Includes, RenderError> {
    let mut includes = Includes::new();
    if !dir.is_dir() {
        return Ok(includes);
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            ContentError::io(&path, e.into())
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || is_ignored(path) {
            continue;
        }
        let name = slash_path(path.strip_prefix(dir).unwrap_or(path));
        let bytes = fs::read(path).map_err(|e| ContentError::io(path, e))?;
        let text = String::from_utf8(bytes).map_err(|_| ContentError::Encoding(path.to_path_buf()))?;
        info!("I {}", name);
        includes.insert(name, text);
    }
    Ok(includes)
}

impl Renderer for LayoutCollection {
    fn render(&self, template: &str, meta: &Meta, content: &str) -> Result<String, RenderError> {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = template;
        let mut out = content.to_string();
        loop {
            let layout = self
                .layouts
                .get(current)
                .ok_or_else(|| RenderError::UnknownLayout(current.to_string()))?;
            if chain.contains(&current) {
                chain.push(current);
                return Err(RenderError::LayoutCycle(chain.join(" -> ")));
            }
            chain.push(current);
            out = layout.template.render(self.scope(meta, &out))?;
            match &layout.parent {
                Some(parent) => current = parent.as_str(),
                None => return Ok(out),
            }
        }
    }
}
