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

use std::sync::atomic::{AtomicU32, Ordering};

#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActorState {
	/// Initial state while the actor constructor is running. Confirm
	/// subscriptions are deferred, publishing application messages is
	/// forbidden.
	Init = 0,
	/// Construction has finished; the actor receives messages but has not
	/// yet completed the start handshake.
	CtorFinished = 1,
	/// All children (if any) have confirmed the start request.
	Started = 2,
	/// All children (if any) have confirmed the stop request. Terminal.
	Stopped = 3,
}

impl From<u32> for ActorState {
	fn from(actor_state_u32: u32) -> Self {
		match actor_state_u32 {
			0 => ActorState::Init,
			1 => ActorState::CtorFinished,
			2 => ActorState::Started,
			3 => ActorState::Stopped,
			_ => {
				panic!(
					"Found forbidden u32 value for ActorState `{actor_state_u32}`. This should \
                     never happen."
				);
			},
		}
	}
}

impl ActorState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ActorState::Init => "Init",
			ActorState::CtorFinished => "CtorFinished",
			ActorState::Started => "Started",
			ActorState::Stopped => "Stopped",
		}
	}
}

impl From<ActorState> for AtomicState {
	fn from(state: ActorState) -> Self {
		AtomicState(AtomicU32::from(state as u32))
	}
}

pub(crate) struct AtomicState(AtomicU32);

impl Default for AtomicState {
	fn default() -> Self {
		AtomicState(AtomicU32::new(ActorState::Init as u32))
	}
}

impl AtomicState {
	/// `Init -> CtorFinished`; no-op from any other state.
	pub(crate) fn ctor_finished(&self) -> ActorState {
		self.advance(ActorState::Init, ActorState::CtorFinished)
	}

	/// `CtorFinished -> Started`; no-op from any other state.
	pub(crate) fn start(&self) -> ActorState {
		self.advance(ActorState::CtorFinished, ActorState::Started)
	}

	/// `Started -> Stopped`; no-op from any other state.
	pub(crate) fn stop(&self) -> ActorState {
		self.advance(ActorState::Started, ActorState::Stopped)
	}

	fn advance(&self, expected: ActorState, new_state: ActorState) -> ActorState {
		let _ = self.0.compare_exchange(
			expected as u32,
			new_state as u32,
			Ordering::SeqCst,
			Ordering::SeqCst,
		);
		self.get_state()
	}

	pub fn get_state(&self) -> ActorState {
		ActorState::from(self.0.load(Ordering::Acquire))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	enum Operation {
		CtorFinished,
		Start,
		Stop,
	}

	impl Operation {
		fn apply(&self, state: &AtomicState) {
			match self {
				Operation::CtorFinished => {
					state.ctor_finished();
				},
				Operation::Start => {
					state.start();
				},
				Operation::Stop => {
					state.stop();
				},
			}
		}
	}

	#[track_caller]
	fn test_transition(from_state: ActorState, op: Operation, expected_state: ActorState) {
		let state = AtomicState::from(from_state);
		op.apply(&state);
		assert_eq!(state.get_state(), expected_state);
	}

	#[test]
	fn test_atomic_state_transitions() {
		test_transition(ActorState::Init, Operation::CtorFinished, ActorState::CtorFinished);
		test_transition(ActorState::CtorFinished, Operation::Start, ActorState::Started);
		test_transition(ActorState::Started, Operation::Stop, ActorState::Stopped);

		// transitions only fire from their expected state
		test_transition(ActorState::Init, Operation::Start, ActorState::Init);
		test_transition(ActorState::Init, Operation::Stop, ActorState::Init);
		test_transition(ActorState::CtorFinished, Operation::CtorFinished, ActorState::CtorFinished);
		test_transition(ActorState::CtorFinished, Operation::Stop, ActorState::CtorFinished);
		test_transition(ActorState::Started, Operation::CtorFinished, ActorState::Started);
		test_transition(ActorState::Started, Operation::Start, ActorState::Started);

		// Stopped is terminal
		test_transition(ActorState::Stopped, Operation::CtorFinished, ActorState::Stopped);
		test_transition(ActorState::Stopped, Operation::Start, ActorState::Stopped);
		test_transition(ActorState::Stopped, Operation::Stop, ActorState::Stopped);
	}
}
