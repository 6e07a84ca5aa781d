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
	any::Any,
	sync::{Arc, Condvar, Mutex},
};

use common::{config::Config, fatal_code, raise_fatal, FatalError};
use tracing::debug;

use crate::{
	actor::{Actor, ActorContext},
	environment::Environment,
	lifecycle,
	message::{PrivStopCnf, StartReq, Stop, StopReq},
	network::Network,
};

struct StopState {
	running: Mutex<bool>,
	stopped_cv: Condvar,
}

/// Top-level orchestrator: owns the environment and the root actor,
/// injects the root start request, and drives the symmetric tear-down
/// once `Stop` is published.
///
/// A `Runtime` is *not* a singleton: unit tests each build their own and
/// run in parallel.
pub struct Runtime {
	// field order matters for drop: the root must quiesce before the
	// environment (and with it the scheduler) goes away
	root: Option<Arc<dyn Any + Send + Sync>>,
	send_start_req: Option<Box<dyn Fn(&Network) + Send>>,
	stop_state: Arc<StopState>,
	env: Environment,
}

impl Runtime {
	pub fn new(config: Config) -> Runtime {
		let env = Environment::new(config);
		Runtime {
			root: None,
			send_start_req: None,
			stop_state: Arc::new(StopState {
				running: Mutex::new(false),
				stopped_cv: Condvar::new(),
			}),
			env,
		}
	}

	pub fn env(&self) -> &Environment {
		&self.env
	}

	/// Builds the root actor through the lifecycle layer and wires the
	/// shutdown path: a public `Stop` turns into the root stop request,
	/// and the root's private stop confirm releases `run`.
	pub fn init<Root: Actor>(&mut self, factory: impl FnOnce(&ActorContext<Root>) -> Root) {
		let root = lifecycle::spawn::<Root>(&self.env, factory);
		root.listen_internal::<Stop>(root.new_callback_handle(), |_body, ctx, _stop| {
			debug!(target: "core", "received Stop");
			ctx.env().network().publish(StopReq::<Root>::default());
		});
		let stop_state = self.stop_state.clone();
		root.listen_internal::<PrivStopCnf<Root>>(
			root.new_callback_handle(),
			move |_body, _ctx, _confirm| {
				debug!(target: "core", "received the root stop confirm");
				*stop_state.running.lock().unwrap() = false;
				stop_state.stopped_cv.notify_one();
			},
		);
		self.send_start_req =
			Some(Box::new(|network: &Network| network.publish(StartReq::<Root>::default())));
		self.root = Some(root);
	}

	/// Starts the pool, injects the root start request, and blocks until
	/// the stop handshake has completed, then halts the pool.
	pub fn run(&mut self) {
		let Some(send_start_req) = self.send_start_req.take() else {
			raise_fatal(
				self.env.on_fatal(),
				FatalError::new(fatal_code::UNKNOWN, "Runtime::run called before init"),
			);
		};
		*self.stop_state.running.lock().unwrap() = true;
		self.env.scheduler().start();
		// constructor-time subscriptions must be installed before any
		// message is delivered
		self.env.scheduler().wait_for_idle();
		debug!(target: "core", "injecting the root start request");
		send_start_req(self.env.network());
		let mut running = self.stop_state.running.lock().unwrap();
		while *running {
			running = self.stop_state.stopped_cv.wait(running).unwrap();
		}
		drop(running);
		self.env.scheduler().stop();
		debug!(target: "core", "run finished");
	}
}
