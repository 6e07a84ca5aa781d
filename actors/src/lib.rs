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

#![deny(clippy::disallowed_methods)]

//! actors is an in-process actor runtime.
//!
//! It solves the following problem:
//! - let strongly-typed messages fan out to every interested actor,
//! - serialise each actor's callbacks on a bounded dispatcher pool,
//! - bring a tree of actors up and down in a deterministic,
//!   child-first/parent-last order.
//!
//! Applications define message types (any plain `Send + Sync` type) and
//! actor types constructed by a factory that registers subscriptions and
//! children. [`Runtime`] hosts the tree: `init` builds the root actor,
//! `run` starts the dispatcher pool and blocks until [`Stop`] has been
//! published and confirmed all the way up.

mod actor;
mod actor_state;
mod environment;
pub(crate) mod lifecycle;
mod mailbox;
mod message;
mod metrics;
mod network;
pub(crate) mod scheduler;
mod runtime;


pub use actor::{Actor, ActorContext, ChildHandle};
pub use actor_state::ActorState;
pub use environment::Environment;
pub use message::{Message, MessageKind, StartCnf, StartReq, Stop, StopCnf, StopReq};
pub use metrics::RUNTIME_METRICS;
pub use network::{CallbackHandle, Network};
pub use runtime::Runtime;
pub use scheduler::{current_dispatcher, Scheduler};
