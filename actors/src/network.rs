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

use std::{
	any::{Any, TypeId},
	collections::HashMap,
	sync::{Arc, Mutex},
};

use tracing::{debug, trace, warn};

use crate::{metrics::RUNTIME_METRICS, message::Message};

/// A published message after the unique-to-shared ownership upgrade:
/// routed to every subscriber, dropped after the last callback returns.
pub(crate) type ErasedEvent = Arc<dyn Any + Send + Sync>;

type SubscriberFn = Box<dyn Fn(&ErasedEvent) + Send + Sync>;

/// Identifies a subscription for later removal. Handles are monotonic and
/// never reused.
pub type CallbackHandle = u64;

struct NetworkRegistry {
	handle_counter: CallbackHandle,
	containers: HashMap<TypeId, HashMap<CallbackHandle, SubscriberFn>>,
}

/// The process-wide broadcast bus, keyed by message type identity.
///
/// Cheap to clone. Subscriber callbacks are invoked synchronously while
/// the registry lock is held: they must not re-enter the network and in
/// practice only enqueue the event into a mailbox and return.
#[derive(Clone)]
pub struct Network {
	inner: Arc<Mutex<NetworkRegistry>>,
}

impl Default for Network {
	fn default() -> Network {
		Network::new()
	}
}

impl Network {
	pub fn new() -> Network {
		Network {
			inner: Arc::new(Mutex::new(NetworkRegistry {
				handle_counter: 0,
				containers: HashMap::new(),
			})),
		}
	}

	/// Issues a globally unique subscription handle.
	pub(crate) fn new_handle(&self) -> CallbackHandle {
		let mut registry = self.inner.lock().unwrap();
		registry.handle_counter += 1;
		registry.handle_counter
	}

	/// Registers `callback` for messages of type `M` under `handle`,
	/// creating the container on first use.
	pub(crate) fn subscribe<M: Message>(
		&self,
		handle: CallbackHandle,
		callback: impl Fn(Arc<M>) + Send + Sync + 'static,
	) {
		let erased: SubscriberFn = Box::new(move |event: &ErasedEvent| {
			let typed = event
				.clone()
				.downcast::<M>()
				.expect("event type and subscription container must agree");
			callback(typed);
		});
		let mut registry = self.inner.lock().unwrap();
		debug!(target: "msg_rx", message = %M::name(), handle, "network subscribe");
		registry.containers.entry(TypeId::of::<M>()).or_default().insert(handle, erased);
	}

	/// Broadcasts `message` to every subscriber registered for its type.
	///
	/// Ownership transfers into the network and is upgraded to shared
	/// exactly once. Publishing a type nobody listens to is a logged
	/// no-op.
	pub fn publish<M: Message>(&self, message: M) {
		let event: ErasedEvent = Arc::new(message);
		let registry = self.inner.lock().unwrap();
		debug!(target: "msg_tx", message = %M::name(), "publish");
		RUNTIME_METRICS.published_messages.inc();
		let Some(container) = registry.containers.get(&TypeId::of::<M>()) else {
			warn!(target: "msg_tx", message = %M::name(), "no subscriber for published message");
			RUNTIME_METRICS.dropped_publishes.inc();
			return;
		};
		trace!(target: "msg_tx", message = %M::name(), subscribers = container.len(), "broadcast");
		for subscriber in container.values() {
			subscriber(&event);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	struct Heartbeat;

	impl Message for Heartbeat {}

	struct Unheard;

	impl Message for Unheard {}

	#[test]
	fn test_publish_reaches_every_subscriber() {
		let network = Network::new();
		let deliveries = Arc::new(AtomicUsize::new(0));
		for _ in 0..3 {
			let deliveries = deliveries.clone();
			let handle = network.new_handle();
			network.subscribe::<Heartbeat>(handle, move |_event| {
				deliveries.fetch_add(1, Ordering::SeqCst);
			});
		}
		network.publish(Heartbeat);
		network.publish(Heartbeat);
		assert_eq!(deliveries.load(Ordering::SeqCst), 6);
	}

	#[test]
	fn test_publish_without_subscriber_is_a_noop() {
		let network = Network::new();
		network.publish(Unheard);
	}

	#[test]
	fn test_subscription_is_type_addressed() {
		let network = Network::new();
		let deliveries = Arc::new(AtomicUsize::new(0));
		let deliveries_clone = deliveries.clone();
		let handle = network.new_handle();
		network.subscribe::<Heartbeat>(handle, move |_event| {
			deliveries_clone.fetch_add(1, Ordering::SeqCst);
		});
		network.publish(Unheard);
		assert_eq!(deliveries.load(Ordering::SeqCst), 0);
		network.publish(Heartbeat);
		assert_eq!(deliveries.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_handles_are_unique() {
		let network = Network::new();
		let first = network.new_handle();
		let second = network.new_handle();
		assert_ne!(first, second);
	}
}
