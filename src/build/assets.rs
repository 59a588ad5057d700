//! Asset bundles with content-addressed output names.
//!
//! An asset concatenates its sources, runs the result through its filter
//! and either keeps the bytes in memory (a *buffered* asset, outname `$`)
//! or names an output file after a hash of those bytes.
//!
//! # How It Works
//!
//! 1. Each source is a path relative to the site root, or `$name` for the
//!    result of another asset
//! 2. Back-references are resolved depth first and memoized, so a shared
//!    dependency is computed once per build
//! 3. The separator goes between sources, never after the last one
//! 4. Every `:hash` in the outname becomes a digest of the filtered bytes
//!
//! A back-reference chain that returns to an asset still being resolved is
//! rejected as a cycle.
//!
//! # Example
//!
//! ```ignore
//! use kiln::build::AssetCollection;
//!
//! let mut assets = AssetCollection::load(&root, &specs, &FilterRegistry::default())?;
//! assets.process()?;
//! assets.render(writer, &root.join("out"))?;
//! ```

use crate::build::pool::Pool;
use crate::build::writer::{FileWriter, WriteError};
use crate::config::{resolve_path, AssetSpec};
use crate::filters::{Filter, FilterError, FilterRegistry, Identity};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Prefix marking a back-reference source and a buffered outname.
pub const SIGIL: char = '$';

/// Placeholder replaced by the content hash in outname templates.
pub const HASH_PLACEHOLDER: &str = ":hash";

/// Number of digest bytes encoded into output names.
const HASH_BYTES: usize = 10;

/// Hex alphabet with `a` and `e` replaced.
const HASH_ALPHABET: &[u8; 16] = b"0123456789vbcdzf";

/// Error produced while loading, resolving or rendering assets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AssetError {
    #[error("duplicate asset name \"{0}\"")]
    Duplicate(String),
    #[error("asset \"{0}\" not found")]
    NotFound(String),
    #[error("asset cycle detected: {0}")]
    Cycle(String),
    #[error("asset \"{0}\": empty output name")]
    EmptyOutname(String),
    #[error("asset \"{asset}\": read {path}: {source}")]
    Read {
        asset: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("asset \"{asset}\": {source}")]
    Filter {
        asset: String,
        #[source]
        source: FilterError,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// A declared asset before resolution.
#[derive(Clone)]
pub struct Asset {
    pub name: String,
    pub files: Vec<String>,
    pub separator: String,
    pub outname: String,
    filter: Arc<dyn Filter>,
}

impl Asset {
    pub fn new(spec: &AssetSpec, filter: Arc<dyn Filter>) -> Self {
        Self {
            name: spec.name.clone(),
            files: spec.files.clone(),
            separator: spec.separator.clone(),
            outname: spec.outname.clone(),
            filter,
        }
    }

    /// Whether the result stays in memory instead of being written.
    pub fn is_buffered(&self) -> bool {
        self.outname.starts_with(SIGIL)
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("name", &self.name)
            .field("files", &self.files)
            .field("outname", &self.outname)
            .finish()
    }
}

/// Bytes of a resolved asset and, for materialized assets, the output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub name: String,
    pub bytes: Arc<[u8]>,
    /// `None` for buffered assets.
    pub outname: Option<String>,
}

impl ResolvedAsset {
    pub fn is_buffered(&self) -> bool {
        self.outname.is_none()
    }
}

/// How a template refers to an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    /// Contents of a buffered asset, inlined as text
    Inline(String),
    /// URL of a materialized asset
    Url(String),
}

/// Immutable view of resolved assets, handed to the renderer.
#[derive(Debug, Clone, Default)]
pub struct AssetIndex {
    refs: HashMap<String, AssetRef>,
}

impl AssetIndex {
    pub fn get(&self, name: &str) -> Option<&AssetRef> {
        self.refs.get(name)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl FromIterator<(String, AssetRef)> for AssetIndex {
    fn from_iter<I: IntoIterator<Item = (String, AssetRef)>>(iter: I) -> Self {
        Self { refs: iter.into_iter().collect() }
    }
}

/// All assets of one build.
pub struct AssetCollection {
    root: PathBuf,
    order: Vec<String>,
    assets: HashMap<String, Asset>,
    resolved: HashMap<String, ResolvedAsset>,
}

impl AssetCollection {
    /// Empty collection whose file sources resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), order: Vec::new(), assets: HashMap::new(), resolved: HashMap::new() }
    }

    /// Build a collection from configuration, constructing each filter once.
    pub fn load(
        root: impl Into<PathBuf>,
        specs: &[AssetSpec],
        registry: &FilterRegistry,
    ) -> Result<Self, AssetError> {
        let mut collection = Self::new(root);
        for spec in specs {
            let filter: Arc<dyn Filter> = match &spec.filter {
                Some(filter) => registry
                    .build(filter)
                    .map_err(|source| AssetError::Filter { asset: spec.name.clone(), source })?,
                None => Arc::new(Identity),
            };
            collection.add(Asset::new(spec, filter))?;
        }
        Ok(collection)
    }

    /// Declare an asset. Names are unique within a collection.
    pub fn add(&mut self, asset: Asset) -> Result<(), AssetError> {
        if self.contains(&asset.name) {
            return Err(AssetError::Duplicate(asset.name));
        }
        self.order.push(asset.name.clone());
        self.assets.insert(asset.name.clone(), asset);
        Ok(())
    }

    /// Register an already-resolved buffered asset.
    pub fn set_buffer(&mut self, name: &str, bytes: impl Into<Arc<[u8]>>) -> Result<(), AssetError> {
        if self.contains(name) {
            return Err(AssetError::Duplicate(name.to_string()));
        }
        self.order.push(name.to_string());
        self.resolved.insert(
            name.to_string(),
            ResolvedAsset { name: name.to_string(), bytes: bytes.into(), outname: None },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assets.contains_key(name) || self.resolved.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Resolve every declared asset that has not been resolved yet.
    pub fn process(&mut self) -> Result<(), AssetError> {
        let names = self.order.clone();
        for name in names {
            let mut in_progress = Vec::new();
            self.resolve(&name, &mut in_progress)?;
        }
        Ok(())
    }

    fn resolve(&mut self, name: &str, in_progress: &mut Vec<String>) -> Result<(), AssetError> {
        if self.resolved.contains_key(name) {
            return Ok(());
        }
        if in_progress.iter().any(|n| n == name) {
            let mut chain = in_progress.clone();
            chain.push(name.to_string());
            return Err(AssetError::Cycle(chain.join(" -> ")));
        }
        let asset = self.assets.get(name).cloned().ok_or_else(|| AssetError::NotFound(name.to_string()))?;

        in_progress.push(name.to_string());
        let mut data = Vec::new();
        for (i, source) in asset.files.iter().enumerate() {
            if i > 0 {
                data.extend_from_slice(asset.separator.as_bytes());
            }
            match source.strip_prefix(SIGIL) {
                Some(dependency) => {
                    self.resolve(dependency, in_progress)?;
                    if let Some(dep) = self.resolved.get(dependency) {
                        data.extend_from_slice(&dep.bytes);
                    }
                }
                None => {
                    let path = resolve_path(&self.root, Path::new(source));
                    let bytes = std::fs::read(&path).map_err(|source| AssetError::Read {
                        asset: asset.name.clone(),
                        path: path.clone(),
                        source,
                    })?;
                    data.extend_from_slice(&bytes);
                }
            }
        }
        in_progress.pop();

        let filtered = asset
            .filter
            .apply(&data)
            .map_err(|source| AssetError::Filter { asset: asset.name.clone(), source })?;

        let outname = if asset.is_buffered() {
            None
        } else {
            let outname = templated_hash(&asset.outname, &filtered);
            if outname.is_empty() {
                return Err(AssetError::EmptyOutname(asset.name.clone()));
            }
            Some(outname)
        };

        self.resolved.insert(
            asset.name.clone(),
            ResolvedAsset { name: asset.name.clone(), bytes: filtered.into(), outname },
        );
        Ok(())
    }

    /// Result of a resolved asset.
    pub fn get(&self, name: &str) -> Option<&ResolvedAsset> {
        self.resolved.get(name)
    }

    /// Resolved assets in declaration order.
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedAsset> {
        self.order.iter().filter_map(|name| self.resolved.get(name))
    }

    /// Write every materialized asset under `out_dir`, in parallel.
    ///
    /// Returns the number of files written.
    pub fn render(&self, writer: Arc<FileWriter>, out_dir: &Path) -> Result<usize, AssetError> {
        let pool: Pool<AssetError> = Pool::new()?;
        let mut count = 0;
        for asset in self.resolved() {
            let Some(outname) = &asset.outname else {
                continue;
            };
            info!("A {}", asset.name);
            let path = out_dir.join(outname);
            let bytes = Arc::clone(&asset.bytes);
            let writer = Arc::clone(&writer);
            count += 1;
            if !pool.add(move || writer.write_file(&path, &bytes).map_err(AssetError::from)) {
                break;
            }
        }
        pool.wait()?;
        Ok(count)
    }

    /// References for templates. Materialized assets are addressed as
    /// `<url_prefix>/<outname>`.
    pub fn index(&self, url_prefix: &str) -> AssetIndex {
        let prefix = url_prefix.trim_end_matches('/');
        let refs = self
            .resolved()
            .map(|asset| {
                let asset_ref = match &asset.outname {
                    Some(outname) => AssetRef::Url(format!("{}/{}", prefix, outname)),
                    None => AssetRef::Inline(String::from_utf8_lossy(&asset.bytes).into_owned()),
                };
                (asset.name.clone(), asset_ref)
            })
            .collect();
        AssetIndex { refs }
    }

    /// Names referenced by `$name` sources that are not declared.
    pub fn missing_references(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .assets
            .values()
            .flat_map(|a| a.files.iter())
            .filter_map(|f| f.strip_prefix(SIGIL))
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        missing.sort();
        missing
    }
}

/// Encode the leading digest bytes of `data` with [`HASH_ALPHABET`].
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(HASH_BYTES * 2);
    for byte in &digest[..HASH_BYTES] {
        out.push(HASH_ALPHABET[(byte >> 4) as usize] as char);
        out.push(HASH_ALPHABET[(byte & 0x0f) as usize] as char);
    }
    out
}

/// Replace every `:hash` in `template` with the content hash of `data`.
pub fn templated_hash(template: &str, data: &[u8]) -> String {
    if !template.contains(HASH_PLACEHOLDER) {
        return template.to_string();
    }
    template.replace(HASH_PLACEHOLDER, &content_hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn spec(name: &str, files: &[&str], separator: &str, outname: &str) -> AssetSpec {
        AssetSpec {
            name: name.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            separator: separator.to_string(),
            outname: outname.to_string(),
            filter: None,
        }
    }

    fn collection(root: &Path, specs: &[AssetSpec]) -> AssetCollection {
        AssetCollection::load(root, specs, &FilterRegistry::default()).unwrap()
    }

    #[test]
    fn test_content_hash_shape() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 20);
        assert!(hash.bytes().all(|b| HASH_ALPHABET.contains(&b)));
        assert!(!hash.contains('a') && !hash.contains('e'));
    }

    #[test]
    fn test_content_hash_known_value() {
        // sha256("") = e3b0c44298fc1c149afb...
        assert_eq!(content_hash(b""), "z3b0c44298fc1c149vfb");
    }

    #[test]
    fn test_templated_hash_replaces_every_placeholder() {
        let name = templated_hash("a-:hash/b-:hash.css", b"x");
        let hash = content_hash(b"x");
        assert_eq!(name, format!("a-{}/b-{}.css", hash, hash));
        assert_eq!(templated_hash("plain.css", b"x"), "plain.css");
    }

    #[test]
    fn test_duplicate_name() {
        let dir = TempDir::new().unwrap();
        let specs = [spec("a", &[], "", "$"), spec("a", &[], "", "$")];
        let err = AssetCollection::load(dir.path(), &specs, &FilterRegistry::default()).err().unwrap();
        assert_eq!(err.to_string(), "duplicate asset name \"a\"");
    }

    #[test]
    fn test_unknown_filter() {
        let dir = TempDir::new().unwrap();
        let mut s = spec("a", &[], "", "$");
        s.filter = Some(crate::filters::FilterSpec::Name("nope".to_string()));
        let err = AssetCollection::load(dir.path(), &[s], &FilterRegistry::default()).err().unwrap();
        assert!(matches!(err, AssetError::Filter { .. }));
    }

    #[test]
    fn test_back_reference_and_separator() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.txt"), "X").unwrap();
        fs::write(dir.path().join("lit.txt"), "LIT").unwrap();

        let mut assets = collection(
            dir.path(),
            &[spec("a", &["x.txt"], "", "$"), spec("b", &["$a", "lit.txt"], "\n", "b-:hash.txt")],
        );
        assets.process().unwrap();

        assert_eq!(&*assets.get("a").unwrap().bytes, b"X");
        assert_eq!(&*assets.get("b").unwrap().bytes, b"X\nLIT");
    }

    #[test]
    fn test_separator_not_after_last() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1"), "one").unwrap();
        fs::write(dir.path().join("2"), "two").unwrap();
        fs::write(dir.path().join("3"), "three").unwrap();

        let mut assets = collection(dir.path(), &[spec("n", &["1", "2", "3"], ", ", "$")]);
        assets.process().unwrap();
        assert_eq!(&*assets.get("n").unwrap().bytes, b"one, two, three");
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "X").unwrap();

        let mut assets =
            collection(dir.path(), &[spec("late", &["$early"], "", "late.txt"), spec("early", &["x"], "", "$")]);
        assets.process().unwrap();
        assert_eq!(&*assets.get("late").unwrap().bytes, b"X");
    }

    #[test]
    fn test_missing_reference() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(dir.path(), &[spec("b", &["$ghost"], "", "b.txt")]);
        assert_eq!(assets.missing_references(), ["ghost"]);
        let err = assets.process().unwrap_err();
        assert_eq!(err.to_string(), "asset \"ghost\" not found");
    }

    #[test]
    fn test_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(dir.path(), &[spec("a", &["nope.css"], "", "a.css")]);
        let err = assets.process().unwrap_err();
        assert!(err.to_string().contains("nope.css"));
    }

    #[test]
    fn test_cycle_detected() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(
            dir.path(),
            &[spec("a", &["$b"], "", "$"), spec("b", &["$c"], "", "$"), spec("c", &["$a"], "", "$")],
        );
        let err = assets.process().unwrap_err();
        assert_eq!(err.to_string(), "asset cycle detected: a -> b -> c -> a");
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(dir.path(), &[spec("a", &["$a"], "", "$")]);
        assert!(matches!(assets.process(), Err(AssetError::Cycle(_))));
    }

    #[test]
    fn test_shared_dependency_is_fine() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "X").unwrap();
        let mut assets = collection(
            dir.path(),
            &[
                spec("base", &["x"], "", "$"),
                spec("one", &["$base", "$base"], "+", "one.txt"),
                spec("two", &["$one", "$base"], "", "two.txt"),
            ],
        );
        assets.process().unwrap();
        assert_eq!(&*assets.get("two").unwrap().bytes, b"X+XX");
    }

    #[test]
    fn test_empty_outname() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(dir.path(), &[spec("a", &[], "", "")]);
        assert!(matches!(assets.process(), Err(AssetError::EmptyOutname(_))));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.css"), "body{}").unwrap();
        let specs = [spec("base", &["x.css"], "", "$"), spec("site.css", &["$base"], "", "site-:hash.css")];

        let mut first = collection(dir.path(), &specs);
        first.process().unwrap();
        let mut second = collection(dir.path(), &specs);
        second.process().unwrap();

        assert_eq!(first.get("site.css"), second.get("site.css"));
    }

    #[test]
    fn test_changed_content_changes_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.css");
        let specs = [spec("site.css", &["x.css"], "", "site-:hash.css")];

        fs::write(&path, "body{color:red}").unwrap();
        let mut before = collection(dir.path(), &specs);
        before.process().unwrap();

        fs::write(&path, "body{color:red }").unwrap();
        let mut after = collection(dir.path(), &specs);
        after.process().unwrap();

        assert_ne!(before.get("site.css").unwrap().outname, after.get("site.css").unwrap().outname);
    }

    #[test]
    fn test_hash_uses_filtered_bytes() {
        struct Upper;
        impl Filter for Upper {
            fn apply(&self, input: &[u8]) -> Result<Vec<u8>, FilterError> {
                Ok(input.to_ascii_uppercase())
            }
        }

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "abc").unwrap();
        let mut assets = AssetCollection::new(dir.path());
        assets.add(Asset::new(&spec("u", &["x"], "", ":hash.txt"), Arc::new(Upper))).unwrap();
        assets.process().unwrap();

        let resolved = assets.get("u").unwrap();
        assert_eq!(&*resolved.bytes, b"ABC");
        assert_eq!(resolved.outname.as_deref(), Some(format!("{}.txt", content_hash(b"ABC")).as_str()));
    }

    #[test]
    fn test_set_buffer() {
        let dir = TempDir::new().unwrap();
        let mut assets = collection(dir.path(), &[spec("page.js", &["$data", "$data"], ";", "$")]);
        assets.set_buffer("data", b"var x=1".to_vec()).unwrap();
        assert!(assets.set_buffer("data", b"dup".to_vec()).is_err());
        assets.process().unwrap();
        assert_eq!(&*assets.get("page.js").unwrap().bytes, b"var x=1;var x=1");
        assert!(assets.get("data").unwrap().is_buffered());
    }

    #[test]
    fn test_render_skips_buffered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "X").unwrap();
        let mut assets =
            collection(dir.path(), &[spec("base", &["x"], "", "$"), spec("out", &["$base"], "", "css/out-:hash.css")]);
        assets.process().unwrap();

        let out = dir.path().join("out");
        let written = assets.render(Arc::new(FileWriter::default()), &out).unwrap();
        assert_eq!(written, 1);

        let outname = assets.get("out").unwrap().outname.clone().unwrap();
        assert_eq!(fs::read(out.join(&outname)).unwrap(), b"X");
        assert!(!out.join("$").exists());
    }

    #[test]
    fn test_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x"), "inline me").unwrap();
        let mut assets =
            collection(dir.path(), &[spec("snippet", &["x"], "", "$"), spec("main.js", &["x"], "", "main.js")]);
        assets.process().unwrap();

        let index = assets.index("/static/");
        assert_eq!(index.get("snippet"), Some(&AssetRef::Inline("inline me".to_string())));
        assert_eq!(index.get("main.js"), Some(&AssetRef::Url("/static/main.js".to_string())));
        assert_eq!(assets.index("").get("main.js"), Some(&AssetRef::Url("/main.js".to_string())));
    }
}
