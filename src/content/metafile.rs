//! Files with YAML front matter.
//!
//! A source file carries front matter when its first line is `---`. The
//! YAML up to the next `---` line becomes its metadata and the rest is the
//! body:
//!
//! ```text
//! ---
//! title: Hello
//! tags: rust, web
//! ---
//! Body text.
//! ```

use super::ContentError;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

/// Front matter values keyed by name.
pub type Meta = BTreeMap<String, Value>;

const DELIMITER: &str = "---";

/// Bytes needed to tell whether a file starts with a delimiter line (`---\r\n`).
const PEEK_LEN: u64 = DELIMITER.len() as u64 + 2;

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct MetaFile {
    pub meta: Meta,
    pub content: String,
    pub modified: SystemTime,
}

impl MetaFile {
    /// Read `path`. Returns `Ok(None)` when the file has no front matter.
    ///
    /// Only the first line is read from files without front matter.
    pub fn read(path: &Path) -> Result<Option<MetaFile>, ContentError> {
        let file = File::open(path).map_err(|e| ContentError::io(path, e))?;
        let modified = file
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| ContentError::io(path, e))?;
        Self::from_reader(path, file, modified)
    }

    /// Parse a source from `reader`; `path` is used in errors.
    pub fn from_reader<R: Read>(path: &Path, mut reader: R, modified: SystemTime) -> Result<Option<MetaFile>, ContentError> {
        let mut bytes = Vec::new();
        reader
            .by_ref()
            .take(PEEK_LEN)
            .read_to_end(&mut bytes)
            .map_err(|e| ContentError::io(path, e))?;
        if !has_front_matter(&bytes) {
            return Ok(None);
        }
        reader.read_to_end(&mut bytes).map_err(|e| ContentError::io(path, e))?;

        let text = String::from_utf8(bytes)
            .map_err(|_| ContentError::Encoding(path.to_path_buf()))?;
        match split(&text) {
            Split::Parsed(yaml, body) => {
                let meta = parse_meta(yaml)
                    .map_err(|source| ContentError::Yaml { path: path.to_path_buf(), source })?;
                Ok(Some(MetaFile { meta, content: body.to_string(), modified }))
            }
            Split::Unterminated => Err(ContentError::Unterminated(path.to_path_buf())),
            Split::Plain => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        get_str(&self.meta, key)
    }
}

/// Outcome of splitting a text into front matter and body.
#[derive(Debug, PartialEq, Eq)]
pub enum Split<'a> {
    /// No front matter
    Plain,
    /// Opening delimiter without a closing one
    Unterminated,
    /// YAML text and body
    Parsed(&'a str, &'a str),
}

fn has_front_matter(bytes: &[u8]) -> bool {
    let first = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);
    let first = first.strip_suffix(b"\r").unwrap_or(first);
    first == DELIMITER.as_bytes()
}

/// Split `text` at its front matter delimiters.
pub fn split(text: &str) -> Split<'_> {
    let mut lines = text.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim_end_matches(['\r', '\n']) == DELIMITER => {}
        _ => return Split::Plain,
    }

    let yaml_start = text.find('\n').map(|i| i + 1).unwrap_or(text.len());
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end_matches(['\r', '\n']) == DELIMITER {
            let yaml = &text[yaml_start..offset];
            let body = &text[offset + line.len()..];
            return Split::Parsed(yaml, body);
        }
        offset += line.len();
    }
    Split::Unterminated
}

/// Parse front matter YAML. Empty front matter is an empty map.
pub fn parse_meta(yaml: &str) -> Result<Meta, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        return Ok(Meta::new());
    }
    let value: Value = serde_yaml::from_str(yaml)?;
    match value {
        Value::Null => Ok(Meta::new()),
        other => serde_yaml::from_value(other),
    }
}

/// String value of `key`, if present and a string.
pub fn get_str<'a>(meta: &'a Meta, key: &str) -> Option<&'a str> {
    meta.get(key).and_then(Value::as_str)
}

/// Boolean value of `key`; absent keys are `false`.
pub fn get_bool(meta: &Meta, key: &str) -> bool {
    meta.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Text form of a value. Lists of scalars join with `, `; maps and nulls are empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Sequence(items) => items
            .iter()
            .filter(|v| !matches!(v, Value::Mapping(_) | Value::Sequence(_)))
            .map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Mapping(_) | Value::Tagged(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_split_plain() {
        assert_eq!(split("just text\n---\n"), Split::Plain);
        assert_eq!(split(""), Split::Plain);
    }

    #[test]
    fn test_split_front_matter() {
        let text = "---\ntitle: Hi\n---\nBody\nmore\n";
        assert_eq!(split(text), Split::Parsed("title: Hi\n", "Body\nmore\n"));
    }

    #[test]
    fn test_split_empty_front_matter_crlf() {
        let text = "---\r\n---\r\nBody";
        assert_eq!(split(text), Split::Parsed("", "Body"));
    }

    #[test]
    fn test_split_unterminated() {
        assert_eq!(split("---\ntitle: x\n"), Split::Unterminated);
    }

    #[test]
    fn test_parse_meta() {
        let meta = parse_meta("title: Hello\nfolder: true\ntags: [a, b]\n").unwrap();
        assert_eq!(get_str(&meta, "title"), Some("Hello"));
        assert!(get_bool(&meta, "folder"));
        assert!(!get_bool(&meta, "missing"));
        assert!(meta["tags"].is_sequence());
        assert!(parse_meta("").unwrap().is_empty());
        assert!(parse_meta("~\n").unwrap().is_empty());
    }

    #[test]
    fn test_value_text() {
        let meta = parse_meta("n: 0.8\nb: true\nl: [a, 2]\nm: {x: y}\nz: ~\n").unwrap();
        assert_eq!(value_text(&meta["n"]), "0.8");
        assert_eq!(value_text(&meta["b"]), "true");
        assert_eq!(value_text(&meta["l"]), "a, 2");
        assert_eq!(value_text(&meta["m"]), "");
        assert_eq!(value_text(&meta["z"]), "");
    }

    #[test]
    fn test_parse_meta_rejects_non_map() {
        assert!(parse_meta("- a\n- b\n").is_err());
    }

    #[test]
    fn test_read_file() {
        let dir = TempDir::new().unwrap();
        let with = dir.path().join("with.md");
        let without = dir.path().join("without.css");
        fs::write(&with, "---\ntitle: Post\n---\nHello").unwrap();
        fs::write(&without, "body { }").unwrap();

        let file = MetaFile::read(&with).unwrap().unwrap();
        assert_eq!(file.get_str("title"), Some("Post"));
        assert_eq!(file.content, "Hello");
        assert!(MetaFile::read(&without).unwrap().is_none());
    }

    #[test]
    fn test_read_binary_without_front_matter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, [0x89, b'P', b'N', b'G', 0xff, 0x00]).unwrap();
        assert!(MetaFile::read(&path).unwrap().is_none());
    }

    /// Reader over `data` that records how many bytes it handed out.
    struct CountingReader<'a> {
        data: &'a [u8],
        served: usize,
    }

    impl Read for CountingReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.data.len() - self.served);
            buf[..n].copy_from_slice(&self.data[self.served..self.served + n]);
            self.served += n;
            Ok(n)
        }
    }

    #[test]
    fn test_plain_file_reads_only_first_bytes() {
        let data = vec![0xabu8; 1 << 20];
        let mut reader = CountingReader { data: &data, served: 0 };
        let file = MetaFile::from_reader(Path::new("big.bin"), &mut reader, SystemTime::now()).unwrap();
        assert!(file.is_none());
        assert!(reader.served <= PEEK_LEN as usize);

        let text = b"---\r\ntitle: Win\r\n---\r\nBody";
        let mut reader = CountingReader { data: text, served: 0 };
        let file = MetaFile::from_reader(Path::new("win.md"), &mut reader, SystemTime::now()).unwrap().unwrap();
        assert_eq!(file.get_str("title"), Some("Win"));
        assert_eq!(file.content, "Body");
        assert_eq!(reader.served, text.len());
    }

    #[test]
    fn test_delimiter_prefix_is_not_front_matter() {
        let dir = TempDir::new().unwrap();
        let dashes = dir.path().join("rule.txt");
        fs::write(&dashes, "-----\nnot front matter\n").unwrap();
        assert!(MetaFile::read(&dashes).unwrap().is_none());

        let only = dir.path().join("only.txt");
        fs::write(&only, "---").unwrap();
        assert!(matches!(MetaFile::read(&only), Err(ContentError::Unterminated(_))));
    }

    #[test]
    fn test_read_bad_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.md");
        fs::write(&path, "---\ntitle: [unclosed\n---\n").unwrap();
        assert!(matches!(MetaFile::read(&path), Err(ContentError::Yaml { .. })));
    }
}
