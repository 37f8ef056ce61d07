//! placeholder expansion in manifest text
//!
//! Two placeholder dialects are understood:
//!
//! **Single value** - replaced by the value of one variable:
//! ```yaml
//! image: registry.example.org/shop:${{{ APP_VERSION }}}
//! ```
//!
//! **Fan-out** - a `name`/`value` pair in a list that becomes one pair per variable with the given prefix:
//! ```yaml
//! env:
//!   - name: ${{{env-expand://APP_}}}
//!     value: ${{{env-expand://APP_}}}
//! ```
//! expands to (variables sorted by name)
//! ```yaml
//! env:
//!   - name: APP_HOST
//!     value: "example.org"
//!   - name: APP_PORT
//!     value: "8080"
//! ```
//!
//! Expansion works on raw bytes, content that is not text passes through untouched. It is a single pass: a
//! value that itself contains a placeholder is an error, not expanded again.
use crate::store::VariableStore;
use regex::bytes::Regex;
use std::sync::LazyLock;

/// `${{{ NAME }}}`
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\{\s*([A-Za-z0-9_:/-]+)\s*\}\}\}").expect("placeholder pattern must compile")
});

const FAN_OUT_NAME: &[u8] = b"- name: ${{{env-expand://";
const FAN_OUT_VALUE: &[u8] = b"value: ${{{env-expand://";
const PLACEHOLDER_END: &[u8] = b"}}}";

/// Anything that can rewrite the raw bytes of a manifest
///
/// Implemented by [Expander] and by plain functions/closures.
pub trait Substitution {
    fn substitute(&self, data: &[u8]) -> Result<Vec<u8>, ExpandError>;
}

// blanket impl for Fn
impl<F> Substitution for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, ExpandError>,
{
    fn substitute(&self, data: &[u8]) -> Result<Vec<u8>, ExpandError> {
        self(data)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ExpandError {
    #[error("Environment variable ${{{{{{ {name} }}}}}} is not set")]
    MissingVariable { name: String },
    #[error("Placeholder {token} is left after substitution")]
    UnresolvedPlaceholder { token: String },
}

/// Expands placeholders against a [VariableStore]
#[derive(Debug, Clone)]
pub struct Expander<'s> {
    store: &'s VariableStore,
    /// only variables with this prefix take part in fan-out
    scope: Option<String>,
}

impl<'s> Expander<'s> {
    pub fn new(store: &'s VariableStore) -> Self {
        Self { store, scope: None }
    }

    pub fn with_scope(mut self, scope: Option<&str>) -> Self {
        self.scope = scope.map(str::to_string);
        self
    }

    /// Expand a whole manifest
    pub fn expand(&self, data: &[u8]) -> Result<Vec<u8>, ExpandError> {
        let fanned_out = self.expand_fan_out(data);
        let substituted = self.substitute_values(&fanned_out)?;

        if let Some(token) = PLACEHOLDER.find(&substituted) {
            return Err(ExpandError::UnresolvedPlaceholder {
                token: String::from_utf8_lossy(token.as_bytes()).into_owned(),
            });
        }

        Ok(substituted)
    }

    /// Replace every fan-out block, copy all other lines
    fn expand_fan_out(&self, data: &[u8]) -> Vec<u8> {
        let lines = split_lines(data);
        let mut result = Vec::with_capacity(data.len());

        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];
            let next = lines.get(index + 1).copied();

            match FanOut::detect(line, next) {
                Some(fan_out) => {
                    self.write_fan_out(&mut result, &fan_out);
                    index += 2;
                }
                None => {
                    result.extend_from_slice(line);
                    result.push(b'\n');
                    index += 1;
                }
            }
        }

        result
    }

    fn write_fan_out(&self, out: &mut Vec<u8>, fan_out: &FanOut) {
        let scope = self.scope.as_deref().unwrap_or_default();
        let variables = self
            .store
            .with_prefix(fan_out.prefix)
            .filter(|(name, _)| name.starts_with(scope));

        let mut count = 0;
        for (name, value) in variables {
            out.extend_from_slice(fan_out.indent);
            out.extend_from_slice(format!("- name: {name}\n").as_bytes());
            out.extend_from_slice(fan_out.indent);
            out.extend_from_slice(format!("  value: \"{}\"\n", quote(value)).as_bytes());
            count += 1;
        }

        tracing::debug!(prefix = fan_out.prefix, count, "fan-out expanded");
    }

    fn substitute_values(&self, data: &[u8]) -> Result<Vec<u8>, ExpandError> {
        let mut result = Vec::with_capacity(data.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(data) {
            let (Some(token), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            // the pattern only matches ascii names
            let name = String::from_utf8_lossy(name.as_bytes());
            let name = name.trim();

            let Some(value) = self.store.get(name) else {
                tracing::error!(%name, "environment variable is not set");
                return Err(ExpandError::MissingVariable {
                    name: name.to_string(),
                });
            };

            result.extend_from_slice(&data[last..token.start()]);
            result.extend_from_slice(value.as_bytes());
            last = token.end();
        }

        result.extend_from_slice(&data[last..]);
        Ok(result)
    }
}

impl Substitution for Expander<'_> {
    fn substitute(&self, data: &[u8]) -> Result<Vec<u8>, ExpandError> {
        self.expand(data)
    }
}

/// Lines without their `\n` or `\r\n` terminator, a final terminator does not start another line
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![];
    }

    let data = data.strip_suffix(b"\n".as_slice()).unwrap_or(data);
    data.split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r".as_slice()).unwrap_or(line))
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// A detected fan-out block
#[derive(Debug, PartialEq)]
struct FanOut<'l> {
    /// leading whitespace of the `- name:` line
    indent: &'l [u8],
    prefix: &'l str,
}

impl<'l> FanOut<'l> {
    /// Both lines must be present: `- name: ${{{env-expand://PREFIX}}}` and then `value: ${{{env-expand://...}}}`
    fn detect(line: &'l [u8], next: Option<&[u8]>) -> Option<Self> {
        let trimmed = line.trim_ascii_start();
        let rest = trimmed.strip_prefix(FAN_OUT_NAME)?;
        let end = find(rest, PLACEHOLDER_END)?;

        find(next?, FAN_OUT_VALUE)?;

        Some(FanOut {
            indent: &line[..line.len() - trimmed.len()],
            prefix: std::str::from_utf8(rest[..end].trim_ascii()).ok()?,
        })
    }
}

/// Escape a value for a yaml double quoted scalar
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted
}
