//! Loading expectation files
//!
//! Expectation ASTs are stored as JSON (what the language front end emits)
//! or TOML (convenient for small hand-written files). The format is chosen
//! by file extension.
//!
//! # Example expectations.toml
//!
//! ```toml
//! [[recognizer]]
//! name = "nested_fetch"
//! kind = "validator"
//!
//! [[recognizer.thread]]
//! min = 1
//! max = 1
//! body = [
//!   { op = "task", name = "x", body = [ { op = "task", name = "y" } ] },
//! ]
//! ```

use crate::expectation_types::ExpectationFile;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

impl ExpectationFile {
    /// Load an expectation file, picking the parser by extension
    ///
    /// # Arguments
    ///
    /// * `path` - `.json` or `.toml` file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use causeway::expectation_types::ExpectationFile;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let file = ExpectationFile::from_file("expectations.toml")?;
    /// println!("Loaded {} recognizers", file.recognizers.len());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => bail!(
                "Unknown expectation format for {} (expected .json or .toml)",
                path.display()
            ),
        };
        parsed.with_context(|| format!("Invalid expectation file: {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON expectations")
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML expectations")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize expectations")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize expectations")
    }

    /// Write in the format named by the file extension (`.toml`, else JSON)
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => self.to_toml_string()?,
            _ => self.to_json_string()?,
        };
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Append every declaration of `other`
    pub fn merge(&mut self, other: ExpectationFile) {
        self.recognizers.extend(other.recognizers);
        self.sets.extend(other.sets);
        self.aggregates.extend(other.aggregates);
    }

    /// Load and merge several files in order
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = ExpectationFile::default();
        for path in paths {
            merged.merge(Self::from_file(path)?);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use crate::expectation_types::{ExpNode, ExpectationFile, NamePattern, RecognizerKind, SetExpr};
    use std::io::Write;

    const NESTED_TOML: &str = r#"
[[recognizer]]
name = "nested"
kind = "validator"

[[recognizer.thread]]
body = [
  { op = "task", name = "x", body = [ { op = "task", name = "y" } ] },
]

[[set]]
name = "not_nested"
expr = { not = { ref = "nested" } }

[[aggregate]]
name = "some_nested"
expr = { gt = [ { instances = "nested" }, 0 ] }
"#;

    #[test]
    fn test_parse_toml() {
        let file = ExpectationFile::from_toml_str(NESTED_TOML).unwrap();
        assert_eq!(file.recognizers.len(), 1);
        let rec = &file.recognizers[0];
        assert_eq!(rec.kind, RecognizerKind::Validator);
        assert!(rec.complete);
        assert_eq!(rec.threads[0].min, 1);
        match &rec.threads[0].body[0] {
            ExpNode::Task { name, body, .. } => {
                assert_eq!(name, &NamePattern::exact("x"));
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(file.sets[0].expr, SetExpr::Not(_)));
        assert_eq!(file.aggregates.len(), 1);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "recognizer": [{
                "name": "frag",
                "complete": false,
                "thread": [{ "body": [ {"op": "send"}, {"op": "recv"} ] }]
            }]
        }"#;
        let file = ExpectationFile::from_json_str(json).unwrap();
        assert!(!file.recognizers[0].complete);
        assert_eq!(file.recognizers[0].kind, RecognizerKind::Recognizer);
    }

    #[test]
    fn test_json_round_trip() {
        let file = ExpectationFile::from_toml_str(NESTED_TOML).unwrap();
        let json = file.to_json_string().unwrap();
        assert_eq!(ExpectationFile::from_json_str(&json).unwrap(), file);
    }

    #[test]
    fn test_unknown_op_rejected() {
        let json = r#"{"recognizer": [{"name": "r", "thread": [{"body": [{"op": "belief"}]}]}]}"#;
        assert!(ExpectationFile::from_json_str(json).is_err());
    }

    #[test]
    fn test_from_file_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", NESTED_TOML).unwrap();
        let loaded = ExpectationFile::from_file(file.path()).unwrap();
        assert_eq!(loaded.recognizers[0].name, "nested");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".exp").tempfile().unwrap();
        assert!(ExpectationFile::from_file(file.path()).is_err());
    }

    #[test]
    fn test_merge_files() {
        let mut a = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(a, "{}", NESTED_TOML).unwrap();
        let mut b = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            b,
            r#"{{"recognizer": [{{"name": "other", "thread": [{{"body": []}}]}}]}}"#
        )
        .unwrap();
        let merged = ExpectationFile::from_files(&[a.path(), b.path()]).unwrap();
        assert_eq!(merged.recognizers.len(), 2);
        assert_eq!(merged.recognizers[1].name, "other");
    }

    #[test]
    fn test_write_file_json() {
        let file = ExpectationFile::from_toml_str(NESTED_TOML).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("synth.json");
        file.write_file(&out).unwrap();
        assert_eq!(ExpectationFile::from_file(&out).unwrap(), file);
    }
}
