// SPDX-FileCopyrightText: 2026 Cardwise Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Figment-to-miette error bridge with fuzzy match suggestions.
//!
//! Converts Figment deserialization errors into miette diagnostics with
//! source spans and "did you mean?" hints, so a typo in a tier row such as
//! `montly_export_quota` points at the offending line.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration error with rich diagnostic information.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// An unknown key was found in the configuration.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(cardwise::config::unknown_key),
        help("{}", format_unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// The unrecognized key name.
        key: String,
        /// Suggested correction via fuzzy matching, if any.
        suggestion: Option<String>,
        /// Valid keys for the enclosing section.
        valid_keys: String,
        /// Source span for the offending key.
        #[label("this key is not recognized")]
        span: Option<SourceSpan>,
        /// The source file content for context display.
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A configuration value has the wrong type.
    #[error("invalid type for key `{key}`: {detail}")]
    #[diagnostic(code(cardwise::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        key: String,
        detail: String,
        expected: String,
    },

    /// A required configuration key is missing (tier rows have no defaults
    /// for their quotas).
    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(cardwise::config::missing_key),
        help("add `{key} = <value>` to your cardwise.toml")
    )]
    MissingKey { key: String },

    /// A semantic validation failure.
    #[error("validation error: {message}")]
    #[diagnostic(code(cardwise::config::validation))]
    Validation { message: String },

    /// Catch-all for other configuration errors.
    #[error("configuration error: {0}")]
    #[diagnostic(code(cardwise::config::other))]
    Other(String),
}

fn format_unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    match suggestion {
        Some(s) => format!("did you mean `{s}`? Valid keys: {valid_keys}"),
        None => format!("valid keys: {valid_keys}"),
    }
}

/// Convert a `figment::Error` into a list of `ConfigError` diagnostics.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let valid_keys: Vec<&str> = expected.to_vec();
                let (span, src) = find_source_span(&error, field, toml_sources);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: suggest_key(field, &valid_keys),
                    valid_keys: valid_keys.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: dotted(&error.path, field),
            },
            Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                key: error.path.join("."),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.to_string(),
            },
            _ => ConfigError::Other(format!("{error}")),
        })
        .collect()
}

fn dotted(path: &[String], field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", path.join("."))
    }
}

fn find_source_span(
    error: &figment::error::Error,
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let source_path = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });

    let source = match source_path {
        Some(path) => toml_sources.iter().find(|(p, _)| *p == path),
        // Inline sources carry no file metadata.
        None if toml_sources.len() == 1 => toml_sources.first(),
        None => None,
    };

    if let Some((path, content)) = source {
        // Figment paths index arrays numerically ("economy", "tiers", "0"); keep
        // only the named segments for header lookup.
        let section: Vec<String> = error
            .path
            .iter()
            .filter(|s| s.parse::<usize>().is_err())
            .cloned()
            .collect();
        if let Some(offset) = find_key_offset(content, &section, field) {
            let span = SourceSpan::new(offset.into(), field.len());
            return (Some(span), Some(NamedSource::new(path, content.clone())));
        }
    }

    (None, None)
}

/// Find the byte offset of a key in TOML content below a section header.
///
/// `path = ["economy", "tiers"]` matches either `[economy.tiers]` or the
/// array-of-tables header `[[economy.tiers]]`; an empty path searches from
/// the start of the document.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let search_start = if path.is_empty() {
        0
    } else {
        let dotted = path.join(".");
        let array_header = format!("[[{dotted}]]");
        let table_header = format!("[{dotted}]");
        content
            .find(&array_header)
            .map(|pos| pos + array_header.len())
            .or_else(|| content.find(&table_header).map(|pos| pos + table_header.len()))?
    };

    let mut byte_offset = 0;
    for line in content[search_start..].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix(field) {
            if after.starts_with([' ', '=', '\t']) {
                let indent = line.len() - trimmed.len();
                return Some(search_start + byte_offset + indent);
            }
        }
        byte_offset += line.len();
    }

    None
}

/// Suggest a similar key name using Jaro-Winkler string similarity.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|&key| (key, strsim::jaro_winkler(unknown, key)))
        .filter(|(_, score)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(key, _)| key.to_string())
}

/// Render a list of `ConfigError`s to stderr using miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_tier_field_for_typo() {
        let valid = &[
            "id",
            "display_name",
            "monthly_generation_quota",
            "monthly_export_quota",
            "rollover_cap_fraction",
            "metered",
        ];
        assert_eq!(
            suggest_key("montly_export_quota", valid),
            Some("monthly_export_quota".to_string())
        );
        assert_eq!(suggest_key("meterd", valid), Some("metered".to_string()));
    }

    #[test]
    fn no_suggestion_for_distant_typo() {
        let valid = &["default_tier", "idempotency_window", "tiers"];
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn find_key_offset_in_table_section() {
        let content = "[economy]\ndefualt_tier = \"free\"\n";
        let path = vec!["economy".to_string()];
        let o = find_key_offset(content, &path, "defualt_tier").unwrap();
        assert_eq!(&content[o..o + 12], "defualt_tier");
    }

    #[test]
    fn find_key_offset_in_array_of_tables() {
        let content = "[economy]\ndefault_tier = \"free\"\n\n[[economy.tiers]]\nid = \"free\"\n  meterd = true\n";
        let path = vec!["economy".to_string(), "tiers".to_string()];
        let o = find_key_offset(content, &path, "meterd").unwrap();
        assert_eq!(&content[o..o + 6], "meterd");
    }

    #[test]
    fn find_key_offset_handles_crlf() {
        let content = "[cost]\r\ngeneration_credits = 1\r\nexport_unit = 1\r\n";
        let path = vec!["cost".to_string()];
        let o = find_key_offset(content, &path, "export_unit").unwrap();
        assert_eq!(&content[o..o + 11], "export_unit");
    }
}
