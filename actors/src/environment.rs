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

use std::sync::Arc;

use common::{config::Config, error::OnFatal};

use crate::{network::Network, scheduler::Scheduler};

/// The shared, read-only surroundings of every actor: the dispatcher
/// pool, the broadcast network, and the configuration. Cheap to clone;
/// the scheduler shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct Environment {
	inner: Arc<EnvInner>,
}

struct EnvInner {
	scheduler: Scheduler,
	network: Network,
	config: Config,
}

impl Environment {
	pub fn new(config: Config) -> Environment {
		let scheduler = Scheduler::new(config.num_dispatchers, config.on_fatal.clone());
		Environment {
			inner: Arc::new(EnvInner { scheduler, network: Network::new(), config }),
		}
	}

	pub fn config(&self) -> &Config {
		&self.inner.config
	}

	pub fn network(&self) -> &Network {
		&self.inner.network
	}

	pub(crate) fn scheduler(&self) -> &Scheduler {
		&self.inner.scheduler
	}

	pub(crate) fn on_fatal(&self) -> &OnFatal {
		&self.inner.config.on_fatal
	}
}
