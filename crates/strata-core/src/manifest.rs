//! Dependency manifest parsing.
//!
//! Reads pip-style requirement files:
//!
//! - one requirement per line: `name[extras] constraint ; marker`
//! - blank lines and `#` comments are ignored
//! - lines starting with `-` are installer options, kept verbatim
//!
//! The manifest is parsed for validation and reporting only. The installer
//! receives the original file, and the raw bytes are what the dependency
//! layer's cache key is computed from.

use std::path::{Path, PathBuf};


/// A single requirement line.
///
/// # Examples
///
/// ```
/// use strata_core::Requirement;
///
/// let req = Requirement::parse("Flask[async]>=3.0,<4 ; python_version >= '3.9'", 1).unwrap();
/// assert_eq!(req.name, "Flask");
/// assert_eq!(req.extras, vec!["async"]);
/// assert_eq!(req.constraint.as_deref(), Some(">=3.0,<4"));
/// assert_eq!(req.marker.as_deref(), Some("python_version >= '3.9'"));
/// assert_eq!(req.normalized_name(), "flask");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Package name as written
    pub name: String,
    /// Optional extras (`name[a,b]`)
    pub extras: Vec<String>,
    /// Version constraint (`==3.0.0`, `>=1,<2`), if any
    pub constraint: Option<String>,
    /// Environment marker after `;`, if any
    pub marker: Option<String>,
    /// 1-based line number in the manifest
    pub line: usize,
}

impl Requirement {
    /// Parse one requirement line (comments already stripped).
    pub fn parse(text: &str, line: usize) -> crate::Result<Self> {
        let invalid = |reason: String| crate::Error::ManifestParse { line, reason };

        let (spec, marker) = match text.split_once(';') {
            Some((spec, marker)) => (spec.trim(), non_empty(marker)),
            None => (text.trim(), None),
        };

        let name_end = spec
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
            .unwrap_or(spec.len());
        let name = &spec[..name_end];
        if !is_valid_name(name) {
            return Err(invalid(format!("invalid package name in {spec:?}")));
        }

        let mut rest = spec[name_end..].trim_start();
        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after
                .find(']')
                .ok_or_else(|| invalid("unterminated extras".to_owned()))?;
            for extra in after[..close].split(',').map(str::trim) {
                if !is_valid_name(extra) {
                    return Err(invalid(format!("invalid extra {extra:?}")));
                }
                extras.push(extra.to_owned());
            }
            rest = after[close + 1..].trim_start();
        }

        let constraint = non_empty(rest);
        if let Some(c) = &constraint {
            if !c.starts_with(['=', '<', '>', '!', '~', '@', '(']) {
                return Err(invalid(format!("unexpected text {c:?} after package name")));
            }
        }

        Ok(Self {
            name: name.to_owned(),
            extras,
            constraint,
            marker,
            line,
        })
    }

    /// PEP 503 normalised name: lowercase, runs of `-_.` collapsed to `-`.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// An ordered list of requirements read from a manifest file.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub requirements: Vec<Requirement>,
    /// Installer options (`--index-url ...`, `-c constraints.txt`) in file order
    pub options: Vec<String>,
    raw: Vec<u8>,
}

impl Manifest {
    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read(path).map_err(|e| crate::Error::ManifestRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut manifest = Self::parse(&String::from_utf8_lossy(&raw))?;
        manifest.path = path.to_path_buf();
        manifest.raw = raw;
        Ok(manifest)
    }

    /// Parse manifest text. The result has an empty `path`.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let mut requirements = Vec::new();
        let mut options = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let text = strip_comment(line).trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('-') {
                options.push(text.to_owned());
                continue;
            }
            requirements.push(Requirement::parse(text, idx + 1)?);
        }

        tracing::debug!(
            requirements = requirements.len(),
            options = options.len(),
            "parsed manifest"
        );

        Ok(Self {
            path: PathBuf::new(),
            requirements,
            options,
            raw: content.as_bytes().to_vec(),
        })
    }

    /// Raw manifest bytes as read.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Options that pull in other files (`-r`, `-c`, `-e` and their long forms).
    pub fn file_references(&self) -> Vec<&str> {
        const FLAGS: &[&str] = &[
            "-r",
            "--requirement",
            "-c",
            "--constraint",
            "-e",
            "--editable",
        ];
        self.options
            .iter()
            .map(String::as_str)
            .filter(|option| {
                FLAGS.iter().any(|flag| {
                    option.strip_prefix(flag).is_some_and(|rest| {
                        rest.is_empty()
                            || rest.starts_with([' ', '\t', '='])
                            || (flag.len() == 2 && !rest.starts_with('-'))
                    })
                })
            })
            .collect()
    }

    /// Look up a requirement by name, comparing normalised names.
    pub fn find(&self, name: &str) -> Option<&Requirement> {
        let wanted = normalize_name(name);
        self.requirements
            .iter()
            .find(|r| r.normalized_name() == wanted)
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty() && self.options.is_empty()
    }
}

/// PEP 503 name normalisation.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

fn is_valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        }
        _ => false,
    }
}

/// `#` starts a comment at line start or after whitespace (URLs keep their fragments).
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_owned()) }
}
