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

use std::{convert::Infallible, fmt, process, sync::Arc};

use tracing::error;

/// Integer codes carried by a [`FatalError`].
///
/// The runtime never recovers from these: they indicate a programming
/// defect, and the process exit status of the default handler is the code
/// itself.
pub mod fatal_code {
	pub const UNKNOWN: i32 = 1;
	pub const STOP_WITHOUT_START: i32 = 2;
	pub const SCHEDULER_STATE: i32 = 3;
	pub const START_TWICE: i32 = 4;
	pub const ACTOR_MISUSE: i32 = 5;
}

/// An unrecoverable invariant violation reported through the fatal
/// callback.
#[derive(Clone, Debug)]
pub struct FatalError {
	pub code: i32,
	pub message: String,
}

impl FatalError {
	pub fn new(code: i32, message: impl Into<String>) -> FatalError {
		FatalError { code, message: message.into() }
	}
}

impl fmt::Display for FatalError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "fatal error {}: {}", self.code, self.message)
	}
}

/// Caller-supplied fatal handler.
///
/// The `Infallible` return type encodes the contract that the handler must
/// never return: it either terminates the process or unwinds. Test
/// handlers typically record the error and panic.
pub type OnFatal = Arc<dyn Fn(&FatalError) -> Infallible + Send + Sync>;

/// Reports `error` through the handler. Diverges, per the `OnFatal`
/// contract.
pub fn raise_fatal(on_fatal: &OnFatal, error: FatalError) -> ! {
	match on_fatal(&error) {}
}

/// The default fatal handler: logs the error and exits the process with
/// the error code.
pub fn default_on_fatal() -> OnFatal {
	Arc::new(|fatal_error: &FatalError| -> Infallible {
		error!(code = fatal_error.code, message = %fatal_error.message, "fatal-error");
		process::exit(fatal_error.code);
	})
}

/// Fatal handler for tests: records the error in the given slot and
/// panics instead of exiting, so the failure stays observable inside the
/// test process.
#[cfg(any(test, feature = "testsuite"))]
pub fn panicking_on_fatal(slot: Arc<std::sync::Mutex<Option<FatalError>>>) -> OnFatal {
	Arc::new(move |fatal_error: &FatalError| -> Infallible {
		*slot.lock().expect("fatal slot poisoned") = Some(fatal_error.clone());
		panic!("{fatal_error}");
	})
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[test]
	fn test_fatal_error_display() {
		let fatal_error = FatalError::new(fatal_code::START_TWICE, "start can only be called once");
		assert_eq!(fatal_error.to_string(), "fatal error 4: start can only be called once");
	}

	#[test]
	fn test_panicking_handler_records_the_error() {
		let slot = Arc::new(Mutex::new(None));
		let on_fatal = panicking_on_fatal(slot.clone());
		let join_handle = std::thread::spawn(move || {
			raise_fatal(&on_fatal, FatalError::new(fatal_code::ACTOR_MISUSE, "boom"));
		});
		assert!(join_handle.join().is_err());
		let recorded = slot.lock().unwrap().clone().unwrap();
		assert_eq!(recorded.code, fatal_code::ACTOR_MISUSE);
		assert_eq!(recorded.message, "boom");
	}
}
