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

//! Logging sink setup.
//!
//! The runtime emits structured events on four targets, filterable
//! individually through the usual `EnvFilter` directives:
//! - `actor`: state transitions, subscriptions, lifecycle progress,
//! - `msg_tx`: message publishes,
//! - `msg_rx`: message deliveries,
//! - `core`: scheduler and runtime orchestration.

use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs the global fmt subscriber.
///
/// The filter directive comes from `RUST_LOG` when set, else from the
/// `logging.filter` entry of the config document, else `info`. Delivery
/// is best-effort: installing twice (tests) is a no-op.
pub fn setup_logging(config: &Config) {
	let logging_settings = config.doc.logging_settings();
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(&logging_settings.filter))
		.unwrap_or_else(|_| EnvFilter::new("info"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_target(true)
		.with_thread_names(true)
		.try_init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_setup_logging_is_idempotent() {
		let config = Config::default();
		setup_logging(&config);
		setup_logging(&config);
	}
}
