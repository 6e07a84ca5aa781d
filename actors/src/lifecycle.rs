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

//! The start/stop handshake wiring around every concrete actor.
//!
//! Users never drive startup or shutdown by hand: [`spawn`] registers the
//! request listeners on every actor it builds, so a start request to the
//! root propagates down the tree and the confirms aggregate back up,
//! child first, parent last. Stop mirrors start.

use std::{any::TypeId, sync::Arc};

use tracing::debug;

use crate::{
	actor::{Actor, ActorCell, ActorContext, ConfirmPhase},
	environment::Environment,
	message::{PrivStartCnf, PrivStopCnf, StartCnf, StartReq, StopCnf, StopReq},
	network::Network,
};

/// A subscription intent recorded while the actor was still in `Init`;
/// replayed once the confirm types are known.
pub(crate) type DeferredListen<A> = Box<dyn FnOnce(&Arc<ActorCell<A>>) + Send>;

type ConfirmPublisher = Box<dyn Fn(&Network) + Send>;

/// The per-actor lifecycle bookkeeping: deferred constructor
/// subscriptions, the children-confirmed counter, and the four confirm
/// publisher closures recorded while the concrete actor type is known.
pub(crate) struct LifecycleRecord<A: Actor> {
	pub(crate) deferred: Vec<DeferredListen<A>>,
	pub(crate) children_cnf_count: usize,
	publish_pub_start_cnf: Option<ConfirmPublisher>,
	publish_priv_start_cnf: Option<ConfirmPublisher>,
	publish_pub_stop_cnf: Option<ConfirmPublisher>,
	publish_priv_stop_cnf: Option<ConfirmPublisher>,
}

impl<A: Actor> Default for LifecycleRecord<A> {
	fn default() -> Self {
		LifecycleRecord {
			deferred: Vec::new(),
			children_cnf_count: 0,
			publish_pub_start_cnf: None,
			publish_priv_start_cnf: None,
			publish_pub_stop_cnf: None,
			publish_priv_stop_cnf: None,
		}
	}
}

impl<A: Actor> LifecycleRecord<A> {
	/// Publishes the start confirms: public first, then private. Observers
	/// of the public confirm cannot assume the parent has already seen
	/// the private one.
	pub(crate) fn publish_start_cnfs(&self, network: &Network) {
		self.publisher(&self.publish_pub_start_cnf)(network);
		self.publisher(&self.publish_priv_start_cnf)(network);
	}

	/// Publishes the stop confirms, public first, then private.
	pub(crate) fn publish_stop_cnfs(&self, network: &Network) {
		self.publisher(&self.publish_pub_stop_cnf)(network);
		self.publisher(&self.publish_priv_stop_cnf)(network);
	}

	fn publisher<'a>(&self, slot: &'a Option<ConfirmPublisher>) -> &'a ConfirmPublisher {
		slot.as_ref().expect("confirm publishers must be initialised before any dispatch")
	}
}

/// Builds an actor through its `factory` and installs the lifecycle
/// protocol around it:
///
/// 1. runs the factory (constructor subscriptions to the actor's own
///    confirms are buffered),
/// 2. records the four confirm publishers and the confirm `TypeId`s,
/// 3. transitions to `CtorFinished` and replays the buffered
///    subscriptions,
/// 4. subscribes the start/stop request handlers that fan the request out
///    to every child, or confirm immediately when there are none,
/// 5. finishes construction, releasing the cell to the pool.
pub(crate) fn spawn<A: Actor>(
	env: &Environment,
	factory: impl FnOnce(&ActorContext<A>) -> A,
) -> Arc<ActorCell<A>> {
	let cell = ActorCell::<A>::new(env.clone());
	let ctx = ActorContext::new(cell.clone());
	debug!(target: "actor", actor = %A::name(), "spawn");
	let actor = factory(&ctx);
	{
		let mut body = cell.body.lock().unwrap();
		body.actor = Some(actor);
		body.lifecycle.publish_pub_start_cnf =
			Some(Box::new(|network: &Network| network.publish(StartCnf::<A>::default())));
		body.lifecycle.publish_priv_start_cnf =
			Some(Box::new(|network: &Network| network.publish(PrivStartCnf::<A>::default())));
		body.lifecycle.publish_pub_stop_cnf =
			Some(Box::new(|network: &Network| network.publish(StopCnf::<A>::default())));
		body.lifecycle.publish_priv_stop_cnf =
			Some(Box::new(|network: &Network| network.publish(PrivStopCnf::<A>::default())));
	}
	let _ = cell.start_cnf_type.set(TypeId::of::<StartCnf<A>>());
	let _ = cell.stop_cnf_type.set(TypeId::of::<StopCnf<A>>());
	// from here on, all listen calls are routed normally
	cell.mark_ctor_finished();
	let deferred = {
		let mut body = cell.body.lock().unwrap();
		std::mem::take(&mut body.lifecycle.deferred)
	};
	for deferred_listen in deferred {
		debug!(target: "actor", actor = %A::name(), "replaying deferred listen");
		deferred_listen(&cell);
	}
	cell.listen_internal::<StartReq<A>>(cell.new_callback_handle(), |body, ctx, _request| {
		debug!(target: "actor", actor = %ctx.name(), children = body.children.len(), "start request");
		for child_entry in body.children.values() {
			(child_entry.publish_start_req)(ctx.env().network());
		}
		if body.children.is_empty() {
			ctx.cell().mark_started();
			ctx.cell().run_confirms(ConfirmPhase::Start, body, ctx);
			body.lifecycle.publish_start_cnfs(ctx.env().network());
		}
	});
	cell.listen_internal::<StopReq<A>>(cell.new_callback_handle(), |body, ctx, _request| {
		debug!(target: "actor", actor = %ctx.name(), children = body.children.len(), "stop request");
		for child_entry in body.children.values() {
			(child_entry.publish_stop_req)(ctx.env().network());
		}
		if body.children.is_empty() {
			ctx.cell().run_confirms(ConfirmPhase::Stop, body, ctx);
			ctx.cell().mark_stopped();
			body.lifecycle.publish_stop_cnfs(ctx.env().network());
		}
	});
	cell.ctor_finished();
	cell
}
