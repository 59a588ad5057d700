//! Output file writer with compressed variants.
//!
//! Every file the build emits goes through a [`FileWriter`]. When the file's
//! extension is configured for compression, the writer produces one sibling
//! per configured method (`index.html.gz`, `index.html.br`) alongside the
//! primary file. All writes for one file run concurrently and the call
//! returns once they have all finished.
//!
//! A compressed variant that fails part way through is removed, so a reader
//! never picks up a truncated `.gz` or `.br`.

use crate::config::CompressConfig;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use thiserror::Error;

/// Gzip compression level.
pub const GZIP_LEVEL: u32 = 9;
/// Brotli quality.
pub const BROTLI_QUALITY: i32 = 11;
/// Brotli window size (log2).
pub const BROTLI_WINDOW: i32 = 22;

/// Error produced by the file writer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    #[error("unknown compression method \"{0}\"")]
    UnknownMethod(String),
    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    fn io(path: &Path, source: io::Error) -> Self {
        WriteError::Io { path: path.to_path_buf(), source }
    }
}

/// A compression method producing a sibling file.
pub trait Compressor: Send + Sync {
    /// Extension appended to the primary path, without the dot.
    fn extension(&self) -> &str;

    /// Compress all of `input` into `output`.
    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> io::Result<()>;
}

/// Gzip via flate2.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

impl Compressor for Gzip {
    fn extension(&self) -> &str {
        "gz"
    }

    fn compress(&self, input: &mut dyn Read, output: &mut dyn Write) -> io::Result<()> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut encoder = GzEncoder::new(output, Compression::new(GZIP_LEVEL));
        io::copy(input, &mut encoder)?;
        encoder.finish()?;
        Ok(())
    }
}

/// Brotli via the brotli crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Brotli;

impl Compressor for Brotli {
    fn extension(&self) -> &str {
        "br"
    }

    fn compress(&self, mut input: &mut dyn Read, mut output: &mut dyn Write) -> io::Result<()> {
        let params = brotli::enc::BrotliEncoderParams {
            quality: BROTLI_QUALITY,
            lgwin: BROTLI_WINDOW,
            ..Default::default()
        };
        brotli::BrotliCompress(&mut input, &mut output, &params)?;
        Ok(())
    }
}

/// Look up a compressor by configured method name.
pub fn compressor_for(method: &str) -> Result<Arc<dyn Compressor>, WriteError> {
    match method {
        "gzip" | "gz" => Ok(Arc::new(Gzip)),
        "brotli" | "br" => Ok(Arc::new(Brotli)),
        other => Err(WriteError::UnknownMethod(other.to_string())),
    }
}

/// Writes output files and their compressed siblings.
#[derive(Clone, Default)]
pub struct FileWriter {
    compressors: Vec<Arc<dyn Compressor>>,
    extensions: HashSet<String>,
}

impl FileWriter {
    /// Build a writer from configuration. `None` disables compression.
    pub fn new(config: Option<&CompressConfig>) -> Result<Self, WriteError> {
        let Some(config) = config else {
            return Ok(Self::default());
        };
        let compressors =
            config.methods.iter().map(|m| compressor_for(m)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_compressors(compressors, &config.extensions))
    }

    /// Build a writer from explicit compressors and extensions (without the dot).
    pub fn with_compressors(compressors: Vec<Arc<dyn Compressor>>, extensions: &[String]) -> Self {
        let extensions = extensions.iter().map(|e| e.trim_start_matches('.').to_string()).collect();
        Self { compressors, extensions }
    }

    /// Whether `path` gets compressed variants.
    pub fn compresses(&self, path: &Path) -> bool {
        if self.compressors.is_empty() {
            return false;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.contains(ext),
            None => false,
        }
    }

    /// Write `data` to `path`, creating parent directories, plus any
    /// compressed variants.
    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), WriteError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
        }

        if !self.compresses(path) {
            return write_plain(path, data);
        }

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::scope(|s| {
            let primary_tx = done_tx.clone();
            s.spawn(move || {
                let _ = primary_tx.send(write_plain(path, data));
            });
            for compressor in &self.compressors {
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    let mut input = data;
                    let _ = done_tx.send(compress_to_file(compressor.as_ref(), &mut input, path));
                });
            }
        });
        drop(done_tx);
        first_error(done_rx)
    }

    /// Copy `src` to `dst`, hard linking when possible, then write
    /// compressed variants from the copy on disk.
    pub fn copy_file(&self, dst: &Path, src: &Path) -> Result<(), WriteError> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))?;
        }

        remove_existing(dst)?;
        if fs::hard_link(src, dst).is_err() {
            if let Err(e) = fs::copy(src, dst) {
                let _ = fs::remove_file(dst);
                return Err(WriteError::io(dst, e));
            }
        }

        if !self.compresses(dst) {
            return Ok(());
        }

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::scope(|s| {
            for compressor in &self.compressors {
                let done_tx = done_tx.clone();
                s.spawn(move || {
                    let result = File::open(dst)
                        .map_err(|e| WriteError::io(dst, e))
                        .and_then(|mut f| compress_to_file(compressor.as_ref(), &mut f, dst));
                    let _ = done_tx.send(result);
                });
            }
        });
        drop(done_tx);
        first_error(done_rx)
    }
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<_> = self.compressors.iter().map(|c| c.extension()).collect();
        f.debug_struct("FileWriter")
            .field("methods", &methods)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Path of the compressed sibling of `path` for extension `ext`.
pub fn compressed_path(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Unlink `path` if it exists. An earlier `copy_file` may have hard linked
/// it to a source file, which writing in place would overwrite.
fn remove_existing(path: &Path) -> Result<(), WriteError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WriteError::io(path, e)),
    }
}

fn write_plain(path: &Path, data: &[u8]) -> Result<(), WriteError> {
    remove_existing(path)?;
    fs::write(path, data).map_err(|e| WriteError::io(path, e))
}

fn compress_to_file(
    compressor: &dyn Compressor,
    input: &mut dyn Read,
    primary: &Path,
) -> Result<(), WriteError> {
    let target = compressed_path(primary, compressor.extension());
    remove_existing(&target)?;
    let result = File::create(&target).and_then(|file| {
        let mut out = BufWriter::new(file);
        compressor.compress(input, &mut out)?;
        out.flush()
    });
    if let Err(e) = result {
        let _ = fs::remove_file(&target);
        return Err(WriteError::io(&target, e));
    }
    Ok(())
}

fn first_error(results: mpsc::Receiver<Result<(), WriteError>>) -> Result<(), WriteError> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
