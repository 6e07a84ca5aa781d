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
	cell::Cell,
	collections::VecDeque,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::{Arc, Condvar, Mutex},
	thread,
};

use common::{fatal_code, raise_fatal, FatalError, OnFatal};
use tracing::{debug, error};

use crate::metrics::RUNTIME_METRICS;

/// A unit of work handed to the dispatcher pool. Runs with no runtime
/// locks held.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
	static DISPATCHER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Identifier of the dispatcher thread currently executing, for tracing
/// only. `None` outside the pool.
pub fn current_dispatcher() -> Option<usize> {
	DISPATCHER_ID.get()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PoolState {
	/// Constructed, dispatchers parked, tasks may already be queued.
	Start,
	/// Dispatchers consume the task queue.
	Running,
	/// `stop` was called; dispatchers drain the queue and exit.
	Stopping,
	/// All dispatchers have exited; scheduling is a fatal error.
	Stopped,
}

struct SchedulerState {
	pool: PoolState,
	queue: VecDeque<Task>,
	/// Dispatchers currently waiting for work (or exited). `wait_for_idle`
	/// and `stop` block until this reaches `num_dispatchers` with an empty
	/// queue.
	sleeping: usize,
	/// Dispatchers that have not yet acknowledged the transition to
	/// `Running`; `start` blocks until it reaches zero.
	ack_pending: usize,
	num_dispatchers: usize,
}

struct Inner {
	state: Mutex<SchedulerState>,
	/// Queue went empty -> non-empty, or the pool left `Running`.
	schedule_cv: Condvar,
	/// Start barrier acknowledgements; reused by `stop` to wait for the
	/// queue to drain.
	started_cv: Condvar,
	/// All dispatchers asleep on an empty queue.
	idle_cv: Condvar,
}

/// Fixed pool of dispatcher threads consuming a FIFO of tasks.
///
/// The pool is created parked: tasks scheduled before `start` are queued
/// and only consumed once `start` flips the pool to `Running`. `stop`
/// drains the queue, and dropping the scheduler joins the threads
/// (starting and stopping first if the caller never did).
pub struct Scheduler {
	inner: Arc<Inner>,
	dispatchers: Vec<thread::JoinHandle<()>>,
	on_fatal: OnFatal,
}

impl Scheduler {
	pub fn new(num_dispatchers: usize, on_fatal: OnFatal) -> Scheduler {
		let inner = Arc::new(Inner {
			state: Mutex::new(SchedulerState {
				pool: PoolState::Start,
				queue: VecDeque::new(),
				sleeping: 0,
				ack_pending: num_dispatchers,
				num_dispatchers,
			}),
			schedule_cv: Condvar::new(),
			started_cv: Condvar::new(),
			idle_cv: Condvar::new(),
		});
		let dispatchers = (0..num_dispatchers)
			.map(|dispatcher_id| {
				let inner = inner.clone();
				thread::Builder::new()
					.name(format!("dispatcher-{dispatcher_id}"))
					.spawn(move || dispatcher_loop(inner, dispatcher_id))
					.expect("failed to spawn dispatcher thread")
			})
			.collect();
		debug!(target: "core", num_dispatchers, "scheduler created");
		Scheduler { inner, dispatchers, on_fatal }
	}

	/// Transitions `Start -> Running` and blocks until every dispatcher
	/// has acknowledged. Calling `start` twice is a fatal error.
	pub fn start(&self) {
		{
			let mut state = self.inner.state.lock().unwrap();
			if state.pool != PoolState::Start {
				drop(state);
				raise_fatal(
					&self.on_fatal,
					FatalError::new(
						fatal_code::START_TWICE,
						"Scheduler::start can only be called once",
					),
				);
			}
			state.pool = PoolState::Running;
		}
		debug!(target: "core", "scheduler state = Running");
		self.inner.schedule_cv.notify_all();
		let mut state = self.inner.state.lock().unwrap();
		while state.ack_pending > 0 {
			state = self.inner.started_cv.wait(state).unwrap();
		}
	}

	/// Transitions `Running -> Stopping`, waits until the queue is empty
	/// and every dispatcher sleeps, then `Stopping -> Stopped`. Calling
	/// `stop` without a prior `start` is a fatal error.
	pub fn stop(&self) {
		debug!(target: "core", "scheduler stop");
		let mut state = self.inner.state.lock().unwrap();
		if state.pool != PoolState::Running {
			drop(state);
			raise_fatal(
				&self.on_fatal,
				FatalError::new(
					fatal_code::STOP_WITHOUT_START,
					"Scheduler::stop called without prior start",
				),
			);
		}
		state.pool = PoolState::Stopping;
		debug!(target: "core", "scheduler state = Stopping");
		// Wake sleeping dispatchers so they observe the state change and
		// unwind; executing dispatchers keep draining the queue.
		self.inner.schedule_cv.notify_all();
		while !(state.queue.is_empty() && state.sleeping == state.num_dispatchers) {
			state = self.inner.started_cv.wait(state).unwrap();
		}
		state.pool = PoolState::Stopped;
		debug!(target: "core", "scheduler state = Stopped");
		drop(state);
		self.inner.schedule_cv.notify_all();
	}

	/// Appends a task to the queue. Allowed in every state except
	/// `Stopped`.
	pub(crate) fn schedule(&self, task: Task) {
		let mut state = self.inner.state.lock().unwrap();
		if state.pool == PoolState::Stopped {
			drop(state);
			raise_fatal(
				&self.on_fatal,
				FatalError::new(
					fatal_code::SCHEDULER_STATE,
					"Scheduler::schedule after the Stopped state was reached",
				),
			);
		}
		state.queue.push_back(task);
		RUNTIME_METRICS.scheduled_tasks.inc();
		if state.queue.len() == 1 {
			self.inner.schedule_cv.notify_all();
		}
	}

	/// Blocks until every dispatcher sleeps on an empty queue. Used
	/// between pool start and the root start injection so that deferred
	/// subscriptions installed by actor constructors are in place before
	/// any message is delivered.
	pub fn wait_for_idle(&self) {
		let mut state = self.inner.state.lock().unwrap();
		while !(state.queue.is_empty() && state.sleeping == state.num_dispatchers) {
			state = self.inner.idle_cv.wait(state).unwrap();
		}
	}
}

impl Drop for Scheduler {
	fn drop(&mut self) {
		let pool = self.inner.state.lock().unwrap().pool;
		match pool {
			PoolState::Start => {
				self.start();
				self.stop();
			},
			PoolState::Running => self.stop(),
			PoolState::Stopping => raise_fatal(
				&self.on_fatal,
				FatalError::new(
					fatal_code::SCHEDULER_STATE,
					"Scheduler::stop and drop must happen on the same thread",
				),
			),
			PoolState::Stopped => {},
		}
		for dispatcher in self.dispatchers.drain(..) {
			let _ = dispatcher.join();
		}
	}
}

fn dispatcher_loop(inner: Arc<Inner>, dispatcher_id: usize) {
	DISPATCHER_ID.set(Some(dispatcher_id));
	let mut state = inner.state.lock().unwrap();
	while state.pool == PoolState::Start {
		state = inner.schedule_cv.wait(state).unwrap();
	}
	state.ack_pending -= 1;
	if state.ack_pending == 0 {
		inner.started_cv.notify_all();
	}
	debug!(target: "core", dispatcher_id, "dispatcher started");
	loop {
		if let Some(task) = state.queue.pop_front() {
			drop(state);
			if catch_unwind(AssertUnwindSafe(task)).is_err() {
				error!(target: "core", dispatcher_id, "task panicked on dispatcher");
			}
			state = inner.state.lock().unwrap();
			continue;
		}
		if state.pool != PoolState::Running {
			break;
		}
		state.sleeping += 1;
		if state.sleeping == state.num_dispatchers {
			inner.idle_cv.notify_all();
		}
		state = inner
			.schedule_cv
			.wait_while(state, |state| {
				state.queue.is_empty() && state.pool == PoolState::Running
			})
			.unwrap();
		state.sleeping -= 1;
	}
	// Exiting: count as permanently asleep so `stop` and `wait_for_idle`
	// see a settled pool.
	state.sleeping += 1;
	if state.queue.is_empty() && state.sleeping == state.num_dispatchers {
		inner.started_cv.notify_all();
		inner.idle_cv.notify_all();
	}
	debug!(target: "core", dispatcher_id, "dispatcher exited");
}

#[cfg(test)]
mod tests {
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		Mutex,
	};

	use common::panicking_on_fatal;

	use super::*;

	fn recording_fatal() -> (Arc<Mutex<Option<FatalError>>>, OnFatal) {
		let slot = Arc::new(Mutex::new(None));
		let on_fatal = panicking_on_fatal(slot.clone());
		(slot, on_fatal)
	}

	#[test]
	fn test_scheduler_runs_all_tasks() {
		let scheduler = Scheduler::new(8, common::default_on_fatal());
		let executed = Arc::new(AtomicUsize::new(0));
		// tasks queued before start are consumed once the pool runs
		for _ in 0..100 {
			let executed = executed.clone();
			scheduler.schedule(Box::new(move || {
				executed.fetch_add(1, Ordering::SeqCst);
			}));
		}
		scheduler.start();
		for _ in 0..100 {
			let executed = executed.clone();
			scheduler.schedule(Box::new(move || {
				executed.fetch_add(1, Ordering::SeqCst);
			}));
		}
		scheduler.stop();
		assert_eq!(executed.load(Ordering::SeqCst), 200);
	}

	#[test]
	fn test_wait_for_idle() {
		let scheduler = Scheduler::new(4, common::default_on_fatal());
		scheduler.start();
		let executed = Arc::new(AtomicUsize::new(0));
		for _ in 0..64 {
			let executed = executed.clone();
			scheduler.schedule(Box::new(move || {
				std::thread::sleep(std::time::Duration::from_millis(1));
				executed.fetch_add(1, Ordering::SeqCst);
			}));
		}
		scheduler.wait_for_idle();
		assert_eq!(executed.load(Ordering::SeqCst), 64);
		scheduler.stop();
	}

	#[test]
	fn test_constructor_destructor_only() {
		let _scheduler = Scheduler::new(4, common::default_on_fatal());
	}

	#[test]
	fn test_stop_without_start_is_fatal() {
		let (slot, on_fatal) = recording_fatal();
		let join_handle = std::thread::spawn(move || {
			let scheduler = Scheduler::new(2, on_fatal);
			scheduler.stop();
		});
		assert!(join_handle.join().is_err());
		let fatal_error = slot.lock().unwrap().clone().unwrap();
		assert_eq!(fatal_error.code, fatal_code::STOP_WITHOUT_START);
		assert!(fatal_error.message.contains("without prior start"));
	}

	#[test]
	fn test_start_twice_is_fatal() {
		let (slot, on_fatal) = recording_fatal();
		let join_handle = std::thread::spawn(move || {
			let scheduler = Scheduler::new(2, on_fatal);
			scheduler.start();
			scheduler.start();
		});
		assert!(join_handle.join().is_err());
		let fatal_error = slot.lock().unwrap().clone().unwrap();
		assert_eq!(fatal_error.code, fatal_code::START_TWICE);
		assert!(fatal_error.message.contains("can only be called once"));
	}

	#[test]
	fn test_schedule_after_stop_is_fatal() {
		let (slot, on_fatal) = recording_fatal();
		let join_handle = std::thread::spawn(move || {
			let scheduler = Scheduler::new(2, on_fatal);
			scheduler.start();
			scheduler.stop();
			scheduler.schedule(Box::new(|| {}));
		});
		assert!(join_handle.join().is_err());
		let fatal_error = slot.lock().unwrap().clone().unwrap();
		assert_eq!(fatal_error.code, fatal_code::SCHEDULER_STATE);
	}

	#[test]
	fn test_dispatcher_id_is_set_on_workers() {
		let scheduler = Scheduler::new(2, common::default_on_fatal());
		scheduler.start();
		let seen_id = Arc::new(AtomicUsize::new(usize::MAX));
		let seen_id_clone = seen_id.clone();
		scheduler.schedule(Box::new(move || {
			if let Some(dispatcher_id) = current_dispatcher() {
				seen_id_clone.store(dispatcher_id, Ordering::SeqCst);
			}
		}));
		scheduler.wait_for_idle();
		assert!(seen_id.load(Ordering::SeqCst) < 2);
		assert_eq!(current_dispatcher(), None);
		scheduler.stop();
	}
}
