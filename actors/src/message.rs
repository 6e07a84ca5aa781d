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

use std::{borrow::Cow, marker::PhantomData};

use crate::Actor;

/// Classifies a message for the publish policy and the subscription
/// routing. Application messages may only be published by an actor in the
/// `Started` state; most lifecycle-internal messages are exempt because
/// they are what drives an actor into (and out of) that state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
	Application,
	StartReq,
	StopReq,
	StartCnf,
	StopCnf,
	PrivStartCnf,
	PrivStopCnf,
	Stop,
}

impl MessageKind {
	/// Kinds that may be published while the actor is not `Started`.
	///
	/// Note the asymmetry inherited from the protocol: the public
	/// `StopCnf` is exempt (it is emitted after the transition to
	/// `Stopped`), while the public `StartCnf` is not (it is emitted
	/// after the transition to `Started`, so the regular policy already
	/// admits it). `Stop` itself is an application-facing signal and is
	/// not exempt.
	pub(crate) fn allowed_outside_started(self) -> bool {
		matches!(
			self,
			MessageKind::StartReq |
				MessageKind::StopReq |
				MessageKind::PrivStartCnf |
				MessageKind::PrivStopCnf |
				MessageKind::StopCnf
		)
	}
}

/// A broadcastable message.
///
/// Any plain `Send + Sync + 'static` type qualifies; the default `name`
/// is the type name stripped of module paths and is only used for
/// tracing. `kind` is runtime-internal plumbing: application code must
/// not override it.
pub trait Message: Sized + Send + Sync + 'static {
	fn name() -> Cow<'static, str> {
		common::simple_type_name::<Self>().into()
	}

	#[doc(hidden)]
	fn kind() -> MessageKind {
		MessageKind::Application
	}
}

/// Global shutdown signal.
///
/// Publishing `Stop` triggers the hierarchical stop handshake and makes
/// `Runtime::run` return once the root actor has confirmed. After `Stop`
/// is published, actors should refrain from publishing new application
/// messages; lifecycle messages continue to flow.
#[derive(Debug, Default)]
pub struct Stop;

impl Message for Stop {
	fn name() -> Cow<'static, str> {
		"Stop".into()
	}

	fn kind() -> MessageKind {
		MessageKind::Stop
	}
}

macro_rules! lifecycle_message {
	($(#[$doc:meta])* $name:ident, $kind:ident, $vis:vis) => {
		$(#[$doc])*
		$vis struct $name<A: Actor> {
			_actor: PhantomData<fn() -> A>,
		}

		impl<A: Actor> Default for $name<A> {
			fn default() -> Self {
				Self { _actor: PhantomData }
			}
		}

		impl<A: Actor> std::fmt::Debug for $name<A> {
			fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
				write!(f, "{}", Self::name())
			}
		}

		impl<A: Actor> Message for $name<A> {
			fn name() -> Cow<'static, str> {
				format!("{}<{}>", stringify!($name), A::name()).into()
			}

			fn kind() -> MessageKind {
				MessageKind::$kind
			}
		}
	};
}

lifecycle_message!(
	/// Private start request, parent (or runtime, for the root) to child.
	StartReq,
	StartReq,
	pub
);
lifecycle_message!(
	/// Private stop request, parent (or runtime, for the root) to child.
	StopReq,
	StopReq,
	pub
);
lifecycle_message!(
	/// Public start confirmation: `A` and all of its children reached
	/// `Started`. Observable by any subscriber.
	StartCnf,
	StartCnf,
	pub
);
lifecycle_message!(
	/// Public stop confirmation: `A` and all of its children reached
	/// `Stopped`. Observable by any subscriber.
	StopCnf,
	StopCnf,
	pub
);
lifecycle_message!(
	/// Private start confirmation, child to parent.
	PrivStartCnf,
	PrivStartCnf,
	pub(crate)
);
lifecycle_message!(
	/// Private stop confirmation, child to parent.
	PrivStopCnf,
	PrivStopCnf,
	pub(crate)
);

#[cfg(test)]
mod tests {
	use super::*;

	struct TestActor;

	impl Actor for TestActor {
		fn name() -> Cow<'static, str> {
			"TestActor".into()
		}
	}

	struct PlainMessage;

	impl Message for PlainMessage {}

	#[test]
	fn test_message_names() {
		assert_eq!(PlainMessage::name(), "PlainMessage");
		assert_eq!(Stop::name(), "Stop");
		assert_eq!(StartReq::<TestActor>::name(), "StartReq<TestActor>");
		assert_eq!(StopCnf::<TestActor>::name(), "StopCnf<TestActor>");
		assert_eq!(PrivStartCnf::<TestActor>::name(), "PrivStartCnf<TestActor>");
	}

	#[test]
	fn test_publish_policy_exemptions() {
		assert!(StartReq::<TestActor>::kind().allowed_outside_started());
		assert!(StopReq::<TestActor>::kind().allowed_outside_started());
		assert!(PrivStartCnf::<TestActor>::kind().allowed_outside_started());
		assert!(PrivStopCnf::<TestActor>::kind().allowed_outside_started());
		assert!(StopCnf::<TestActor>::kind().allowed_outside_started());
		// the public start confirm and the stop signal are not exempt
		assert!(!StartCnf::<TestActor>::kind().allowed_outside_started());
		assert!(!Stop::kind().allowed_outside_started());
		assert!(!PlainMessage::kind().allowed_outside_started());
	}
}
