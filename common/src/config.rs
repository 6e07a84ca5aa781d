// Copyright (C) 2023 QuerentAI LLC.
// This file is part of Querent.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by QuerentAI LLC.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// For inquiries about alternative licensing arrangements, please contact contact@querent.xyz.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

// This software includes code developed by QuerentAI LLC (https://querent.xyz).

use std::{num::NonZeroUsize, path::Path, str::FromStr};

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::OnFatal;

/// Default number of dispatcher threads created by the runtime scheduler.
pub const DEFAULT_DISPATCHER_COUNT: usize = 4;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Embedded fallback document used when no config file is present.
pub const DEFAULT_CONFIG: &str = "---
core:
  dispatchers: 4
logging:
  filter: info
  sink: console
";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file `{path}`: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse config document: {0}")]
	Parse(#[from] serde_yaml::Error),
}

/// A hierarchical, path-addressed configuration document.
///
/// Leaves are string-typed: `get_value` parses the addressed scalar with
/// `FromStr`, so callers decide the target type.
#[derive(Clone, Debug)]
pub struct ConfigDocument {
	root: Value,
}

impl ConfigDocument {
	pub fn parse(content: &str) -> Result<ConfigDocument, ConfigError> {
		let root: Value = serde_yaml::from_str(content)?;
		Ok(ConfigDocument { root })
	}

	/// Loads the document from `path`, falling back to `default_content`
	/// if the file does not exist. Any other I/O failure and any parse
	/// failure is an error.
	pub fn load_or_default(
		path: &Path,
		default_content: &str,
	) -> Result<ConfigDocument, ConfigError> {
		match std::fs::read_to_string(path) {
			Ok(content) => ConfigDocument::parse(&content),
			Err(io_error) if io_error.kind() == std::io::ErrorKind::NotFound => {
				info!(path = %path.display(), "config file not found, using default document");
				ConfigDocument::parse(default_content)
			},
			Err(io_error) =>
				Err(ConfigError::Io { path: path.display().to_string(), source: io_error }),
		}
	}

	/// Returns the scalar addressed by `path` (segments joined with
	/// `separator`), parsed as `T`. `None` if the path does not resolve
	/// to a scalar or the scalar does not parse.
	pub fn get_value<T: FromStr>(&self, path: &str, separator: char) -> Option<T> {
		let mut node = &self.root;
		for segment in path.split(separator) {
			node = node.get(segment)?;
		}
		let scalar = match node {
			Value::String(text) => text.clone(),
			Value::Number(number) => number.to_string(),
			Value::Bool(flag) => flag.to_string(),
			_ => return None,
		};
		scalar.parse::<T>().ok()
	}
}

impl Default for ConfigDocument {
	fn default() -> ConfigDocument {
		ConfigDocument::parse(DEFAULT_CONFIG).expect("default config document must parse")
	}
}

/// The `logging` section of the document, for the logging sink
/// collaborator.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
	pub filter: String,
	pub sink: String,
}

impl Default for LoggingSettings {
	fn default() -> LoggingSettings {
		LoggingSettings { filter: "info".to_string(), sink: "console".to_string() }
	}
}

impl ConfigDocument {
	pub fn logging_settings(&self) -> LoggingSettings {
		self.root
			.get("logging")
			.and_then(|section| serde_yaml::from_value(section.clone()).ok())
			.unwrap_or_default()
	}
}

/// Runtime configuration handed to the environment: the fatal callback,
/// the dispatcher count, and the raw document for collaborator lookups
/// (logging sink parameters etc.).
#[derive(Clone)]
pub struct Config {
	pub on_fatal: OnFatal,
	pub num_dispatchers: usize,
	pub doc: ConfigDocument,
}

impl Config {
	pub fn new(on_fatal: OnFatal) -> Config {
		let doc = ConfigDocument::default();
		let num_dispatchers = dispatcher_count(&doc);
		Config { on_fatal, num_dispatchers, doc }
	}

	/// Loads `config.yml` from the working directory, falling back to the
	/// embedded default document.
	pub fn load(on_fatal: OnFatal) -> Result<Config, ConfigError> {
		let doc = ConfigDocument::load_or_default(Path::new(CONFIG_FILE_NAME), DEFAULT_CONFIG)?;
		let num_dispatchers = dispatcher_count(&doc);
		Ok(Config { on_fatal, num_dispatchers, doc })
	}

	pub fn with_dispatchers(mut self, num_dispatchers: usize) -> Config {
		self.num_dispatchers = num_dispatchers;
		self
	}
}

impl Default for Config {
	fn default() -> Config {
		Config::new(crate::error::default_on_fatal())
	}
}

/// Resolves the dispatcher count:
/// - Derived from `RT_DISPATCHER_COUNT` if set and valid.
/// - Otherwise from the `core.dispatchers` document entry.
/// - Defaults to [`DEFAULT_DISPATCHER_COUNT`].
fn dispatcher_count(doc: &ConfigDocument) -> usize {
	match std::env::var("RT_DISPATCHER_COUNT") {
		Ok(count_str) => {
			if let Ok(count) = count_str.parse::<NonZeroUsize>() {
				info!("set the dispatcher count to {count}");
				return count.get();
			}
			warn!(
				"failed to parse `RT_DISPATCHER_COUNT={count_str}` as an integer > 0, falling back \
                 to the config document"
			);
		},
		Err(std::env::VarError::NotUnicode(os_str)) => {
			warn!(
				"failed to parse `RT_DISPATCHER_COUNT={os_str:?}` as a valid unicode string, \
                 falling back to the config document"
			);
		},
		Err(std::env::VarError::NotPresent) => {},
	}
	doc.get_value::<NonZeroUsize>("core.dispatchers", '.')
		.map(NonZeroUsize::get)
		.unwrap_or(DEFAULT_DISPATCHER_COUNT)
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn test_default_document_dispatchers() {
		let doc = ConfigDocument::default();
		assert_eq!(doc.get_value::<usize>("core.dispatchers", '.'), Some(4));
		assert_eq!(doc.get_value::<String>("logging.filter", '.').as_deref(), Some("info"));
		let logging_settings = doc.logging_settings();
		assert_eq!(logging_settings.filter, "info");
		assert_eq!(logging_settings.sink, "console");
	}

	#[test]
	fn test_get_value_separator_and_types() {
		let doc = ConfigDocument::parse(
			"---
server:
  port: 8080
  verbose: true
  name: gateway
",
		)
		.unwrap();
		assert_eq!(doc.get_value::<u16>("server/port", '/'), Some(8080));
		assert_eq!(doc.get_value::<bool>("server.verbose", '.'), Some(true));
		assert_eq!(doc.get_value::<String>("server.name", '.').as_deref(), Some("gateway"));
		assert_eq!(doc.get_value::<u16>("server.missing", '.'), None);
		// a mapping is not a scalar
		assert_eq!(doc.get_value::<String>("server", '.'), None);
	}

	#[test]
	fn test_load_or_default_missing_file() {
		let doc = ConfigDocument::load_or_default(Path::new("no-such-config.yml"), DEFAULT_CONFIG)
			.unwrap();
		assert_eq!(doc.get_value::<usize>("core.dispatchers", '.'), Some(4));
	}

	#[test]
	fn test_load_or_default_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "---\ncore:\n  dispatchers: 7").unwrap();
		let doc = ConfigDocument::load_or_default(file.path(), DEFAULT_CONFIG).unwrap();
		assert_eq!(doc.get_value::<usize>("core.dispatchers", '.'), Some(7));
	}

	#[test]
	fn test_parse_error() {
		let parse_error = ConfigDocument::parse(": not yaml : [").unwrap_err();
		assert!(matches!(parse_error, ConfigError::Parse(_)));
	}
}
