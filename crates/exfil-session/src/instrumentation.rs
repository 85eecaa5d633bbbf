//! Page instrumentation script generation.
//!
//! The shims file lists one instrumented property per line as
//! `name object property`. Each entry becomes a `shim_<name>` function in the
//! rendered template; the debugger recognises an access by that function
//! name on the innermost paused frame.

use std::path::{Path, PathBuf};

use minijinja::{Environment, context};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Prefix of every shim function name.
pub const SHIM_PREFIX: &str = "shim_";

/// Errors building the instrumentation script.
#[derive(Debug, Error)]
pub enum InstrumentationError {
    /// A shims or template file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A shims line is not `name object property`.
    #[error("bad line {line} in shim file: {text:?}")]
    MalformedShim {
        /// 1-based line number.
        line: usize,
        /// Offending line.
        text: String,
    },

    /// The template failed to parse or render.
    #[error("instrumentation template: {0}")]
    Template(#[from] minijinja::Error),
}

/// One instrumented property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Shim {
    /// Identifier used in `shim_<name>`.
    pub name: String,
    /// Expression for the object holding the property, e.g. `document`.
    pub object: String,
    /// Property name.
    pub property: String,
}

/// Parse a shims file. Blank lines and `#` comments are skipped; any other
/// line without exactly three fields, or with a name that is not a plain
/// identifier, is an error.
pub fn parse_shims(text: &str) -> Result<Vec<Shim>, InstrumentationError> {
    let mut shims = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = || InstrumentationError::MalformedShim {
            line: idx + 1,
            text: raw.to_owned(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, object, property] = fields[..] else {
            return Err(malformed());
        };
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(malformed());
        }
        shims.push(Shim {
            name: name.to_owned(),
            object: object.to_owned(),
            property: property.to_owned(),
        });
    }
    Ok(shims)
}

/// Render `template` with `shims` bound to the `shims` variable.
pub fn render(template: &str, shims: &[Shim]) -> Result<String, InstrumentationError> {
    let mut env = Environment::new();
    env.add_template("instrumentation", template)?;
    let tmpl = env.get_template("instrumentation")?;
    Ok(tmpl.render(context! { shims => shims })?)
}

/// Read both files and render the script.
pub fn load(shims_path: &Path, template_path: &Path) -> Result<String, InstrumentationError> {
    let read = |path: &Path| {
        std::fs::read_to_string(path).map_err(|source| InstrumentationError::Read {
            path: path.to_path_buf(),
            source,
        })
    };
    let shims = parse_shims(&read(shims_path)?)?;
    let script = render(&read(template_path)?, &shims)?;
    info!(shims = shims.len(), bytes = script.len(), "instrumentation script ready");
    Ok(script)
}
