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

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge, Opts};

pub struct RuntimeMetrics {
	pub published_messages: IntCounter,
	pub dropped_publishes: IntCounter,
	pub delivered_messages: IntCounter,
	pub scheduled_tasks: IntCounter,
	pub live_actors: IntGauge,
}

impl RuntimeMetrics {
	fn register() -> RuntimeMetrics {
		RuntimeMetrics {
			published_messages: runtime_counter(
				"published_messages_total",
				"Number of messages published on the network.",
			),
			dropped_publishes: runtime_counter(
				"dropped_publishes_total",
				"Number of publishes that found no subscriber.",
			),
			delivered_messages: runtime_counter(
				"delivered_messages_total",
				"Number of callback deliveries to local subscribers.",
			),
			scheduled_tasks: runtime_counter(
				"scheduled_tasks_total",
				"Number of tasks appended to the dispatcher queue.",
			),
			live_actors: {
				let gauge =
					IntGauge::with_opts(Opts::new("live_actors", "Number of live actor cells.")
						.namespace("runtime"))
					.expect("live actor gauge options must be valid");
				prometheus::register(Box::new(gauge.clone()))
					.expect("live actor gauge must register exactly once");
				gauge
			},
		}
	}
}

fn runtime_counter(name: &str, help: &str) -> IntCounter {
	let counter = IntCounter::with_opts(Opts::new(name, help).namespace("runtime"))
		.expect("runtime counter options must be valid");
	prometheus::register(Box::new(counter.clone()))
		.expect("runtime counter must register exactly once");
	counter
}

pub static RUNTIME_METRICS: Lazy<RuntimeMetrics> = Lazy::new(RuntimeMetrics::register);

/// Holds the live-actor gauge up for the lifetime of one actor cell.
/// Gauge handles share their underlying atomic, so the clone kept here
/// decrements the same gauge on drop.
pub(crate) struct LiveActorGuard {
	gauge: IntGauge,
}

impl LiveActorGuard {
	pub(crate) fn new() -> LiveActorGuard {
		LiveActorGuard::for_gauge(&RUNTIME_METRICS.live_actors)
	}

	fn for_gauge(gauge: &IntGauge) -> LiveActorGuard {
		let gauge = gauge.clone();
		gauge.inc();
		LiveActorGuard { gauge }
	}
}

impl Drop for LiveActorGuard {
	fn drop(&mut self) {
		self.gauge.dec();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_live_actor_guard_tracks_lifetime() {
		// a private gauge keeps the assertions independent of actors
		// created by concurrently running tests
		let gauge = IntGauge::new("live_guard_test", "test gauge").unwrap();
		assert_eq!(gauge.get(), 0);
		{
			let _guard = LiveActorGuard::for_gauge(&gauge);
			assert_eq!(gauge.get(), 1);
		}
		assert_eq!(gauge.get(), 0);
	}
}
