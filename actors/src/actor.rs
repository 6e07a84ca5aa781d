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
	borrow::Cow,
	collections::{BTreeMap, VecDeque},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Condvar, Mutex,
	},
};

use common::{fatal_code, raise_fatal, FatalError};
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::{
	actor_state::{ActorState, AtomicState},
	environment::Environment,
	lifecycle::LifecycleRecord,
	mailbox::{LocalCallback, Mailbox},
	message::{Message, MessageKind, StartReq, StopReq},
	metrics::{LiveActorGuard, RUNTIME_METRICS},
	network::{CallbackHandle, ErasedEvent, Network},
	scheduler::current_dispatcher,
};

/// A unit of computation owning a mailbox, children, and lifecycle state.
///
/// Implementations are plain `Send` types; the runtime serialises all of
/// an actor's callbacks, so handlers get `&mut self` without any
/// synchronisation of their own. Actors are constructed by a factory
/// `FnOnce(&ActorContext<Self>) -> Self` which typically registers
/// subscriptions and creates children before returning the initial state.
pub trait Actor: Sized + Send + 'static {
	/// Display name, used for tracing and to compose the names of the
	/// lifecycle messages addressed to this actor type.
	fn name() -> Cow<'static, str> {
		common::simple_type_name::<Self>().into()
	}
}

/// Children are identified by a unique, monotonically increasing handle.
pub type ChildHandle = u64;

/// Per-child bookkeeping: the request publisher closures are recorded
/// while the child's concrete type is known, the cell keeps the child
/// alive. Dropping the entry tears the child down.
pub(crate) struct ChildEntry {
	pub(crate) publish_start_req: Box<dyn Fn(&Network) + Send>,
	pub(crate) publish_stop_req: Box<dyn Fn(&Network) + Send>,
	_cell: Arc<dyn Any + Send + Sync>,
}

/// Everything a dispatched callback may touch: the user state, the
/// children, and the lifecycle record. Locked only by the consume cycle
/// and during construction, so the lock is uncontended.
pub(crate) struct ActorBody<A: Actor> {
	pub(crate) actor: Option<A>,
	pub(crate) children: BTreeMap<ChildHandle, ChildEntry>,
	pub(crate) lifecycle: LifecycleRecord<A>,
}

/// Which confirm map a subscription or a confirm run addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConfirmPhase {
	Start,
	Stop,
}

struct DispatchQueue<A: Actor> {
	queue: VecDeque<CellTask<A>>,
	/// True while the cell is scheduled on the pool or executing a
	/// callback, and during construction. The drop path waits for it to
	/// clear.
	scheduled: bool,
}

pub(crate) type CellTask<A> = Box<dyn FnOnce(&Arc<ActorCell<A>>) + Send>;

/// The runtime-side half of an actor: scheduling state, mailbox, body,
/// confirm maps. Owned by the parent cell (or the runtime, for the
/// root); the network and the scheduler only ever hold weak references.
pub(crate) struct ActorCell<A: Actor> {
	name: Cow<'static, str>,
	env: Environment,
	state: AtomicState,
	/// `TypeId` of this actor's public confirms; empty until the
	/// lifecycle layer initialises them, which is what makes constructor
	/// subscriptions to confirm types deferrable.
	pub(crate) start_cnf_type: OnceCell<TypeId>,
	pub(crate) stop_cnf_type: OnceCell<TypeId>,
	dispatch: Mutex<DispatchQueue<A>>,
	ctor_dtor_cv: Condvar,
	mailbox: Mailbox<A>,
	pub(crate) body: Mutex<ActorBody<A>>,
	start_confirms: Mutex<BTreeMap<CallbackHandle, LocalCallback<A>>>,
	stop_confirms: Mutex<BTreeMap<CallbackHandle, LocalCallback<A>>>,
	/// Kept outside the body so lookups stay legal from inside a
	/// dispatched callback.
	child_names: Mutex<BTreeMap<ChildHandle, Cow<'static, str>>>,
	handle_counter: AtomicU64,
	child_handle_counter: AtomicU64,
	_live_guard: LiveActorGuard,
}

impl<A: Actor> ActorCell<A> {
	pub(crate) fn new(env: Environment) -> Arc<ActorCell<A>> {
		Arc::new(ActorCell {
			name: A::name(),
			env,
			state: AtomicState::default(),
			start_cnf_type: OnceCell::new(),
			stop_cnf_type: OnceCell::new(),
			// `scheduled` starts true: nothing may consume this cell
			// until construction has finished.
			dispatch: Mutex::new(DispatchQueue { queue: VecDeque::new(), scheduled: true }),
			ctor_dtor_cv: Condvar::new(),
			mailbox: Mailbox::new(),
			body: Mutex::new(ActorBody {
				actor: None,
				children: BTreeMap::new(),
				lifecycle: LifecycleRecord::default(),
			}),
			start_confirms: Mutex::new(BTreeMap::new()),
			stop_confirms: Mutex::new(BTreeMap::new()),
			child_names: Mutex::new(BTreeMap::new()),
			handle_counter: AtomicU64::new(0),
			child_handle_counter: AtomicU64::new(0),
			_live_guard: LiveActorGuard::new(),
		})
	}

	pub(crate) fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn env(&self) -> &Environment {
		&self.env
	}

	pub(crate) fn mailbox(&self) -> &Mailbox<A> {
		&self.mailbox
	}

	pub(crate) fn state(&self) -> ActorState {
		self.state.get_state()
	}

	pub(crate) fn new_callback_handle(&self) -> CallbackHandle {
		self.handle_counter.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub(crate) fn mark_ctor_finished(&self) {
		let from = self.state.get_state();
		let to = self.state.ctor_finished();
		self.log_transition(from, to);
	}

	pub(crate) fn mark_started(&self) {
		let from = self.state.get_state();
		let to = self.state.start();
		self.log_transition(from, to);
	}

	pub(crate) fn mark_stopped(&self) {
		let from = self.state.get_state();
		let to = self.state.stop();
		self.log_transition(from, to);
	}

	fn log_transition(&self, from: ActorState, to: ActorState) {
		if from != to {
			debug!(target: "actor", actor = %self.name, from = from.as_str(), to = to.as_str(), "state");
		}
	}

	/// Broadcasts `message`. Outside `Started` only the lifecycle-internal
	/// kinds are permitted; anything else is a fatal error.
	pub(crate) fn publish<M: Message>(&self, message: M) {
		let state = self.state.get_state();
		if !M::kind().allowed_outside_started() && state != ActorState::Started {
			raise_fatal(
				self.env.on_fatal(),
				FatalError::new(
					fatal_code::ACTOR_MISUSE,
					format!(
						"{}.publish::<{}>() called in state {}, publishing is only allowed in \
                         Started",
						self.name,
						M::name(),
						state.as_str()
					),
				),
			);
		}
		self.env.network().publish(message);
	}

	/// Registers a callback for `M` under `handle`.
	///
	/// Subscriptions to this actor's own public confirms are routed into
	/// the local confirm maps (those messages are emitted locally and do
	/// not travel through the network); while the confirm types are not
	/// initialised yet (constructor context) confirm-kind subscriptions
	/// are buffered and replayed by the lifecycle layer. Everything else
	/// becomes a mailbox command.
	pub(crate) fn listen<M: Message>(
		self: &Arc<Self>,
		handle: CallbackHandle,
		callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
	) {
		match M::kind() {
			MessageKind::StartCnf => self.listen_confirm(handle, callback, ConfirmPhase::Start),
			MessageKind::StopCnf => self.listen_confirm(handle, callback, ConfirmPhase::Stop),
			_ => self.listen_internal::<M>(handle, user_callback(callback)),
		}
	}

	fn listen_confirm<M: Message>(
		self: &Arc<Self>,
		handle: CallbackHandle,
		callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
		phase: ConfirmPhase,
	) {
		let own_type = match phase {
			ConfirmPhase::Start => self.start_cnf_type.get(),
			ConfirmPhase::Stop => self.stop_cnf_type.get(),
		};
		if own_type.is_none() {
			debug!(target: "actor", actor = %self.name, message = %M::name(), "deferred listen");
			let mut body = self.body.lock().unwrap();
			body.lifecycle.deferred.push(Box::new(move |cell: &Arc<ActorCell<A>>| {
				cell.route_confirm(handle, callback, phase);
			}));
			return;
		}
		self.route_confirm(handle, callback, phase);
	}

	fn route_confirm<M: Message>(
		self: &Arc<Self>,
		handle: CallbackHandle,
		callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
		phase: ConfirmPhase,
	) {
		let own_type = match phase {
			ConfirmPhase::Start => self.start_cnf_type.get(),
			ConfirmPhase::Stop => self.stop_cnf_type.get(),
		};
		let matches_own_confirm = own_type == Some(&TypeId::of::<M>());
		if !matches_own_confirm {
			self.listen_internal::<M>(handle, user_callback(callback));
			return;
		}
		debug!(target: "actor", actor = %self.name, message = %M::name(), handle, "listen matches own confirm");
		let mut callback = user_callback(callback);
		let erased: LocalCallback<A> = Box::new(move |body, ctx, event| {
			let typed = event
				.clone()
				.downcast::<M>()
				.expect("confirm event must match the matched confirm type");
			callback(body, ctx, &typed);
		});
		match phase {
			ConfirmPhase::Start => self.start_confirms.lock().unwrap().insert(handle, erased),
			ConfirmPhase::Stop => self.stop_confirms.lock().unwrap().insert(handle, erased),
		};
	}

	/// Registers a body-level callback on the mailbox, bypassing the
	/// confirm routing. Used by the lifecycle layer, the child-confirm
	/// counting, and the runtime.
	pub(crate) fn listen_internal<M: Message>(
		self: &Arc<Self>,
		handle: CallbackHandle,
		mut callback: impl FnMut(&mut ActorBody<A>, &ActorContext<A>, &M) + Send + 'static,
	) {
		let erased: LocalCallback<A> = Box::new(move |body, ctx, event| {
			let typed = event
				.clone()
				.downcast::<M>()
				.expect("dispatched event must match its container type");
			callback(body, ctx, &typed);
		});
		self.mailbox.listen_erased::<M>(self, handle, erased);
	}

	pub(crate) fn unlisten<M: Message>(self: &Arc<Self>, handle: CallbackHandle) {
		match M::kind() {
			MessageKind::StartCnf if self.start_cnf_type.get() == Some(&TypeId::of::<M>()) => {
				debug!(target: "actor", actor = %self.name, message = %M::name(), handle, "unlisten own start confirm");
				self.start_confirms.lock().unwrap().remove(&handle);
			},
			MessageKind::StopCnf if self.stop_cnf_type.get() == Some(&TypeId::of::<M>()) => {
				debug!(target: "actor", actor = %self.name, message = %M::name(), handle, "unlisten own stop confirm");
				self.stop_confirms.lock().unwrap().remove(&handle);
			},
			_ => self.mailbox.unlisten::<M>(self, handle),
		}
	}

	pub(crate) fn unlisten_all(self: &Arc<Self>, handle: CallbackHandle) {
		self.mailbox.unlisten_all(self, handle);
	}

	/// Creates a child actor through the lifecycle layer and wires the
	/// private confirm counting. Only legal during construction: the
	/// topology is fixed once the tree is running.
	pub(crate) fn new_child<C: Actor>(
		self: &Arc<Self>,
		factory: impl FnOnce(&ActorContext<C>) -> C,
	) -> ChildHandle {
		if self.state.get_state() != ActorState::Init {
			raise_fatal(
				self.env.on_fatal(),
				FatalError::new(
					fatal_code::ACTOR_MISUSE,
					format!(
						"{}.new_child::<{}>() called after construction finished",
						self.name,
						C::name()
					),
				),
			);
		}
		let child_handle = self.child_handle_counter.fetch_add(1, Ordering::SeqCst) + 1;
		let child_cell = crate::lifecycle::spawn::<C>(&self.env, factory);
		debug!(target: "actor", parent = %self.name, child = %C::name(), child_handle, "new child");
		let entry = ChildEntry {
			publish_start_req: Box::new(|network: &Network| {
				network.publish(StartReq::<C>::default())
			}),
			publish_stop_req: Box::new(|network: &Network| {
				network.publish(StopReq::<C>::default())
			}),
			_cell: child_cell,
		};
		self.body.lock().unwrap().children.insert(child_handle, entry);
		self.child_names.lock().unwrap().insert(child_handle, C::name());
		self.listen_internal::<crate::message::PrivStartCnf<C>>(
			self.new_callback_handle(),
			move |body, ctx, _confirm| {
				body.lifecycle.children_cnf_count += 1;
				if body.lifecycle.children_cnf_count == body.children.len() {
					body.lifecycle.children_cnf_count = 0;
					ctx.cell().mark_started();
					ctx.cell().run_confirms(ConfirmPhase::Start, body, ctx);
					body.lifecycle.publish_start_cnfs(ctx.env().network());
				}
			},
		);
		self.listen_internal::<crate::message::PrivStopCnf<C>>(
			self.new_callback_handle(),
			move |body, ctx, _confirm| {
				body.lifecycle.children_cnf_count += 1;
				if body.lifecycle.children_cnf_count == body.children.len() {
					body.lifecycle.children_cnf_count = 0;
					ctx.cell().mark_stopped();
					ctx.cell().run_confirms(ConfirmPhase::Stop, body, ctx);
					body.lifecycle.publish_stop_cnfs(ctx.env().network());
				}
			},
		);
		child_handle
	}

	/// Returns the display name of the child identified by `handle`.
	/// An unknown handle is a fatal error.
	pub(crate) fn child_name(&self, handle: ChildHandle) -> Cow<'static, str> {
		let child_name_opt = self.child_names.lock().unwrap().get(&handle).cloned();
		match child_name_opt {
			Some(child_name) => child_name,
			None => raise_fatal(
				self.env.on_fatal(),
				FatalError::new(
					fatal_code::ACTOR_MISUSE,
					format!("{}: child handle {handle} not found", self.name),
				),
			),
		}
	}

	/// Runs the local confirm callbacks of `phase` exactly once.
	///
	/// The map is taken out for the duration of the run so callbacks can
	/// subscribe or unsubscribe without deadlocking; surviving entries
	/// are merged back afterwards.
	pub(crate) fn run_confirms(
		&self,
		phase: ConfirmPhase,
		body: &mut ActorBody<A>,
		ctx: &ActorContext<A>,
	) {
		let confirm_mutex = match phase {
			ConfirmPhase::Start => &self.start_confirms,
			ConfirmPhase::Stop => &self.stop_confirms,
		};
		let mut callbacks = std::mem::take(&mut *confirm_mutex.lock().unwrap());
		if callbacks.is_empty() {
			return;
		}
		let event: ErasedEvent = match phase {
			ConfirmPhase::Start => Arc::new(crate::message::StartCnf::<A>::default()),
			ConfirmPhase::Stop => Arc::new(crate::message::StopCnf::<A>::default()),
		};
		debug!(target: "msg_rx", actor = %self.name, callbacks = callbacks.len(), phase = ?phase, "local confirm callbacks");
		for callback in callbacks.values_mut() {
			RUNTIME_METRICS.delivered_messages.inc();
			callback(body, ctx, &event);
		}
		let mut confirm_map = confirm_mutex.lock().unwrap();
		for (handle, callback) in callbacks {
			confirm_map.entry(handle).or_insert(callback);
		}
	}

	/// Delivers `event` to every local subscriber for its type. Runs in
	/// the owner's dispatch context.
	pub(crate) fn dispatch_event<M: Message>(self: &Arc<Self>, event: Arc<M>) {
		let ctx = ActorContext::new(self.clone());
		let mut registry = self.mailbox.registry.lock().unwrap();
		let Some(container) = registry.containers.get_mut(&TypeId::of::<M>()) else {
			debug!(target: "msg_rx", actor = %self.name, message = %M::name(), "no local subscriber");
			return;
		};
		debug!(
			target: "msg_rx",
			actor = %self.name,
			message = %M::name(),
			callbacks = container.len(),
			dispatcher = ?current_dispatcher(),
			"dispatch"
		);
		let erased: ErasedEvent = event;
		let mut body = self.body.lock().unwrap();
		for callback in container.values_mut() {
			RUNTIME_METRICS.delivered_messages.inc();
			callback(&mut body, &ctx, &erased);
		}
	}

	/// Appends a task to the cell queue and schedules a consume on the
	/// pool unless one is already outstanding.
	pub(crate) fn schedule_task(self: &Arc<Self>, task: CellTask<A>) {
		let mut dispatch = self.dispatch.lock().unwrap();
		dispatch.queue.push_back(task);
		if !dispatch.scheduled {
			dispatch.scheduled = true;
			self.schedule_consume();
		}
	}

	fn schedule_consume(self: &Arc<Self>) {
		let weak_cell = Arc::downgrade(self);
		self.env.scheduler().schedule(Box::new(move || {
			if let Some(cell) = weak_cell.upgrade() {
				cell.consume();
			}
		}));
	}

	/// Drains the cell queue, then clears `scheduled` and wakes a
	/// potentially waiting drop.
	pub(crate) fn consume(self: &Arc<Self>) {
		let mut dispatch = self.dispatch.lock().unwrap();
		loop {
			match dispatch.queue.pop_front() {
				Some(task) => {
					drop(dispatch);
					task(self);
					dispatch = self.dispatch.lock().unwrap();
				},
				None => {
					dispatch.scheduled = false;
					self.ctor_dtor_cv.notify_all();
					return;
				},
			}
		}
	}

	/// Called by the lifecycle layer once construction is complete: if
	/// the constructor queued work (subscriptions, early events), hand
	/// the cell to the pool; otherwise clear the construction guard.
	pub(crate) fn ctor_finished(self: &Arc<Self>) {
		let mut dispatch = self.dispatch.lock().unwrap();
		if dispatch.queue.is_empty() {
			debug!(target: "actor", actor = %self.name, "constructor finished, no pending work");
			dispatch.scheduled = false;
		} else {
			debug!(target: "actor", actor = %self.name, pending = dispatch.queue.len(), "constructor finished");
			self.schedule_consume();
		}
	}

	/// Blocks until no dispatch is in flight, so no callback can touch
	/// the actor once destruction begins.
	fn wait_for_ready_to_drop(&self) {
		if self.state.get_state() == ActorState::Init {
			// construction never completed (a fatal unwound out of the
			// factory): nothing was ever handed to the pool
			return;
		}
		let mut dispatch = self.dispatch.lock().unwrap();
		while dispatch.scheduled {
			dispatch = self.ctor_dtor_cv.wait(dispatch).unwrap();
		}
	}
}

impl<A: Actor> Drop for ActorCell<A> {
	fn drop(&mut self) {
		self.wait_for_ready_to_drop();
		debug!(target: "actor", actor = %self.name, "drop");
		let body = match self.body.get_mut() {
			Ok(body) => body,
			Err(poisoned) => poisoned.into_inner(),
		};
		// children go down in reverse creation order
		while let Some((_child_handle, child_entry)) = body.children.pop_last() {
			drop(child_entry);
		}
	}
}

fn user_callback<A: Actor, M: Message>(
	mut callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
) -> impl FnMut(&mut ActorBody<A>, &ActorContext<A>, &M) + Send + 'static {
	move |body: &mut ActorBody<A>, ctx: &ActorContext<A>, message: &M| {
		if let Some(actor) = body.actor.as_mut() {
			callback(actor, ctx, message);
		}
	}
}

/// Cheap handle to an actor cell, passed to factories and to every
/// callback. Everything an actor does (publishing, subscribing, creating
/// children) goes through its context.
pub struct ActorContext<A: Actor> {
	cell: Arc<ActorCell<A>>,
}

impl<A: Actor> Clone for ActorContext<A> {
	fn clone(&self) -> Self {
		ActorContext { cell: self.cell.clone() }
	}
}

impl<A: Actor> ActorContext<A> {
	pub(crate) fn new(cell: Arc<ActorCell<A>>) -> ActorContext<A> {
		ActorContext { cell }
	}

	pub(crate) fn cell(&self) -> &Arc<ActorCell<A>> {
		&self.cell
	}

	pub fn name(&self) -> &str {
		self.cell.name()
	}

	pub fn state(&self) -> ActorState {
		self.cell.state()
	}

	pub fn env(&self) -> &Environment {
		self.cell.env()
	}

	/// Broadcasts `message` to all subscribers of its type.
	pub fn publish<M: Message>(&self, message: M) {
		self.cell.publish(message);
	}

	/// Issues a fresh callback handle. Useful to subscribe with a handle
	/// that is known before the callback runs (e.g. to unsubscribe from
	/// within it).
	pub fn new_callback_handle(&self) -> CallbackHandle {
		self.cell.new_callback_handle()
	}

	/// Registers `callback` for messages of type `M` and returns the
	/// handle identifying the subscription.
	pub fn listen<M: Message>(
		&self,
		callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
	) -> CallbackHandle {
		let handle = self.new_callback_handle();
		self.cell.listen::<M>(handle, callback);
		handle
	}

	/// Registers `callback` under a pre-allocated handle.
	pub fn listen_with_handle<M: Message>(
		&self,
		handle: CallbackHandle,
		callback: impl FnMut(&mut A, &ActorContext<A>, &M) + Send + 'static,
	) {
		self.cell.listen::<M>(handle, callback);
	}

	/// Removes the subscription for `M` registered under `handle`.
	pub fn unlisten<M: Message>(&self, handle: CallbackHandle) {
		self.cell.unlisten::<M>(handle);
	}

	/// Removes every subscription registered under `handle`.
	pub fn unlisten_all(&self, handle: CallbackHandle) {
		self.cell.unlisten_all(handle);
	}

	/// Creates a child actor. Only legal during construction.
	pub fn new_child<C: Actor>(
		&self,
		factory: impl FnOnce(&ActorContext<C>) -> C,
	) -> ChildHandle {
		self.cell.new_child(factory)
	}

	/// Returns the display name of the child identified by `handle`.
	/// An unknown handle is a fatal error.
	pub fn child_name(&self, handle: ChildHandle) -> Cow<'static, str> {
		self.cell.child_name(handle)
	}

	/// The number of events waiting in this actor's mailbox. Only
	/// available to tests, and to integration tests of downstream crates
	/// through the `testsuite` feature.
	#[cfg(any(test, feature = "testsuite"))]
	pub fn queued_event_count(&self) -> usize {
		self.cell.mailbox().queued_event_count()
	}
}
