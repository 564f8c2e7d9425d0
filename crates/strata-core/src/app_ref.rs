//! Application object references (`module:object`).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The callable a process manager loads and serves.
///
/// # Examples
///
/// ```
/// use strata_core::AppRef;
///
/// let app: AppRef = "app:server".parse().unwrap();
/// assert_eq!(app.module, "app");
/// assert_eq!(app.object, "server");
/// assert_eq!(app.to_string(), "app:server");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRef {
    /// Dotted module path, importable from the working directory
    pub module: String,
    /// Attribute of the module holding the callable
    pub object: String,
}

impl AppRef {
    /// Source files that may define the module, relative to the working directory.
    pub fn module_candidates(&self) -> Vec<PathBuf> {
        let base: PathBuf = self.module.split('.').collect();
        vec![base.with_extension("py"), base.join("__init__.py")]
    }
}

impl FromStr for AppRef {
    type Err = crate::Error;

    fn from_str(value: &str) -> crate::Result<Self> {
        let invalid = |reason| crate::Error::InvalidAppRef {
            value: value.to_owned(),
            reason,
        };

        let (module, object) = value.split_once(':').ok_or_else(|| invalid("missing ':'"))?;

        if module.is_empty() {
            return Err(invalid("module is empty"));
        }
        if object.is_empty() {
            return Err(invalid("object is empty"));
        }
        if !module.split('.').all(is_identifier) {
            return Err(invalid("module is not a dotted Python identifier"));
        }
        if !is_identifier(object) {
            return Err(invalid("object is not a Python identifier"));
        }

        Ok(Self {
            module: module.to_owned(),
            object: object.to_owned(),
        })
    }
}

impl fmt::Display for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.object)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
