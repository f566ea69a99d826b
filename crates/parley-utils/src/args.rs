use std::{collections::HashMap, str::FromStr};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArgsError {
    #[error("option {key} has invalid value {value:?}")]
    BadValue { key: String, value: String },
}

/// Parsed `key=value` command line tokens.
#[derive(Debug, Default)]
pub struct Args(HashMap<String, String>);

/// Splits each token on the first `=`. Malformed tokens are reported on
/// stderr and skipped (parsing happens before logging is installed).
pub fn parse_args<I>(argv: I) -> Args
where
    I: IntoIterator<Item = String>,
{
    let mut map = HashMap::new();
    for arg in argv {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => eprintln!("option without value: {arg} use option=value syntax"),
        }
    }
    Args(map)
}

impl Args {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// Parses the value under `key`, falling back to `default` when absent.
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ArgsError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ArgsError::BadValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tokens: &[&str]) -> Args {
        parse_args(tokens.iter().map(ToString::to_string))
    }

    #[test]
    fn splits_on_first_equals() {
        let a = args(&["host=0.0.0.0", "note=a=b"]);
        assert_eq!(a.get("host"), Some("0.0.0.0"));
        assert_eq!(a.get("note"), Some("a=b"));
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let a = args(&["port", "=5", "host=h"]);
        assert_eq!(a.get("port"), None);
        assert_eq!(a.get("host"), Some("h"));
    }

    #[test]
    fn typed_access_with_defaults() {
        let a = args(&["port=50601"]);
        assert_eq!(a.parse_or("port", 50600u16).unwrap(), 50601);
        assert_eq!(a.parse_or("timeout", 1.2f64).unwrap(), 1.2);
        assert_eq!(a.string_or("host", "localhost"), "localhost");
    }

    #[test]
    fn bad_value_is_an_error() {
        let a = args(&["port=fifty"]);
        assert!(a.parse_or("port", 0u16).is_err());
    }
}
