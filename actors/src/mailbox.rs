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
	any::TypeId,
	collections::{BTreeMap, HashMap, VecDeque},
	sync::{Arc, Mutex},
};

use tracing::{debug, trace, warn};

use crate::{
	actor::{Actor, ActorBody, ActorCell, ActorContext},
	message::Message,
	network::{CallbackHandle, ErasedEvent},
};

/// Mailboxes are drained to empty on a single scheduling event. The `max`
/// parameter of [`Mailbox::consume`] exists so a fairness cap stays a
/// one-line change.
pub(crate) const CONSUME_ALL: usize = usize::MAX;

/// A callback held in the local registry (or in a confirm map): receives
/// the actor body, the context handle, and the type-erased event.
pub(crate) type LocalCallback<A> =
	Box<dyn FnMut(&mut ActorBody<A>, &ActorContext<A>, &ErasedEvent) + Send>;

/// A deferred subscribe/unsubscribe intent; takes effect at the next
/// consume cycle, before any event of that cycle is dispatched.
pub(crate) type MailCommand<A> = Box<dyn FnOnce(&Arc<ActorCell<A>>) + Send>;

/// An inbound event fused with its dispatch logic.
pub(crate) type MailEvent<A> = Box<dyn FnOnce(&Arc<ActorCell<A>>) + Send>;

pub(crate) struct LocalRegistry<A: Actor> {
	pub(crate) containers: HashMap<TypeId, BTreeMap<CallbackHandle, LocalCallback<A>>>,
}

struct MailQueues<A: Actor> {
	commands: VecDeque<MailCommand<A>>,
	events: VecDeque<MailEvent<A>>,
	/// True while this mailbox has enqueued itself on its owner cell.
	/// Guarantees at most one outstanding consume per mailbox.
	scheduled: bool,
}

/// Per-actor intake: a command queue, an event queue, and a local
/// subscription registry independent of the network's.
///
/// The first local subscription for a message type installs a network
/// subscription that re-schedules matching events into this mailbox. All
/// mailbox activity is executed in the owner actor's dispatch context.
pub(crate) struct Mailbox<A: Actor> {
	queues: Mutex<MailQueues<A>>,
	pub(crate) registry: Mutex<LocalRegistry<A>>,
}

impl<A: Actor> Mailbox<A> {
	pub(crate) fn new() -> Mailbox<A> {
		Mailbox {
			queues: Mutex::new(MailQueues {
				commands: VecDeque::new(),
				events: VecDeque::new(),
				scheduled: false,
			}),
			registry: Mutex::new(LocalRegistry { containers: HashMap::new() }),
		}
	}

	/// Queues a subscription of `callback` to `M` under `handle`.
	pub(crate) fn listen_erased<M: Message>(
		&self,
		cell: &Arc<ActorCell<A>>,
		handle: CallbackHandle,
		callback: LocalCallback<A>,
	) {
		let command: MailCommand<A> = Box::new(move |cell: &Arc<ActorCell<A>>| {
			let mailbox = cell.mailbox();
			let mut registry = mailbox.registry.lock().unwrap();
			let type_id = TypeId::of::<M>();
			if !registry.containers.contains_key(&type_id) {
				// first subscription for this type: route the network
				// broadcast into this mailbox
				let weak_cell = Arc::downgrade(cell);
				let network = cell.env().network().clone();
				let network_handle = network.new_handle();
				network.subscribe::<M>(network_handle, move |event: Arc<M>| {
					if let Some(cell) = weak_cell.upgrade() {
						cell.mailbox().schedule_event::<M>(&cell, event);
					}
				});
			}
			debug!(target: "actor", actor = %cell.name(), message = %M::name(), handle, "listen");
			registry.containers.entry(type_id).or_default().insert(handle, callback);
		});
		let mut queues = self.queues.lock().unwrap();
		queues.commands.push_back(command);
		self.schedule_on_owner(cell, &mut queues);
	}

	/// Queues the removal of the `M` subscription under `handle`.
	pub(crate) fn unlisten<M: Message>(&self, cell: &Arc<ActorCell<A>>, handle: CallbackHandle) {
		let command: MailCommand<A> = Box::new(move |cell: &Arc<ActorCell<A>>| {
			let mut registry = cell.mailbox().registry.lock().unwrap();
			match registry.containers.get_mut(&TypeId::of::<M>()) {
				Some(container) => {
					debug!(target: "actor", actor = %cell.name(), message = %M::name(), handle, "unlisten");
					if container.remove(&handle).is_none() {
						warn!(target: "actor", actor = %cell.name(), handle, "unlisten: unknown handle");
					}
					// TODO: drop the network subscription when the last local
					// listener for a type is removed.
				},
				None => {
					warn!(target: "actor", actor = %cell.name(), message = %M::name(), "unlisten: no subscription for this type");
				},
			}
		});
		let mut queues = self.queues.lock().unwrap();
		queues.commands.push_back(command);
		self.schedule_on_owner(cell, &mut queues);
	}

	/// Queues the removal of `handle` from every message type.
	pub(crate) fn unlisten_all(&self, cell: &Arc<ActorCell<A>>, handle: CallbackHandle) {
		let command: MailCommand<A> = Box::new(move |cell: &Arc<ActorCell<A>>| {
			debug!(target: "actor", actor = %cell.name(), handle, "unlisten all");
			let mut registry = cell.mailbox().registry.lock().unwrap();
			for container in registry.containers.values_mut() {
				container.remove(&handle);
			}
		});
		let mut queues = self.queues.lock().unwrap();
		queues.commands.push_back(command);
		self.schedule_on_owner(cell, &mut queues);
	}

	/// Called by the network subscription callback: queues the event,
	/// bound to the dispatch logic that routes it through the local
	/// registry.
	pub(crate) fn schedule_event<M: Message>(&self, cell: &Arc<ActorCell<A>>, event: Arc<M>) {
		let dispatch: MailEvent<A> =
			Box::new(move |cell: &Arc<ActorCell<A>>| cell.dispatch_event::<M>(event));
		let mut queues = self.queues.lock().unwrap();
		trace!(target: "msg_rx", actor = %cell.name(), message = %M::name(), "mailbox enqueue");
		queues.events.push_back(dispatch);
		self.schedule_on_owner(cell, &mut queues);
	}

	/// Drains the queues: all pending commands take effect before each
	/// event dispatch, and at most `max` events are dispatched. On exit
	/// the mailbox reschedules itself if either queue refilled
	/// concurrently.
	pub(crate) fn consume(&self, cell: &Arc<ActorCell<A>>, max: usize) -> usize {
		let mut consumed = 0;
		loop {
			loop {
				let command = self.queues.lock().unwrap().commands.pop_front();
				match command {
					Some(command) => command(cell),
					None => break,
				}
			}
			if consumed >= max {
				break;
			}
			let event = self.queues.lock().unwrap().events.pop_front();
			match event {
				Some(event) => {
					event(cell);
					consumed += 1;
				},
				None => break,
			}
		}
		let mut queues = self.queues.lock().unwrap();
		queues.scheduled = false;
		if !queues.commands.is_empty() || !queues.events.is_empty() {
			self.schedule_on_owner(cell, &mut queues);
		}
		consumed
	}

	/// The number of events waiting to be dispatched. Test-only
	/// introspection.
	#[cfg(any(test, feature = "testsuite"))]
	pub(crate) fn queued_event_count(&self) -> usize {
		self.queues.lock().unwrap().events.len()
	}

	fn schedule_on_owner(&self, cell: &Arc<ActorCell<A>>, queues: &mut MailQueues<A>) {
		if !queues.scheduled {
			queues.scheduled = true;
			cell.schedule_task(Box::new(|cell: &Arc<ActorCell<A>>| {
				cell.mailbox().consume(cell, CONSUME_ALL);
			}));
		}
	}
}
