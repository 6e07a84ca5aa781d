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

pub mod config;
pub use config::*;
pub mod error;
pub use error::*;
pub mod logging;

/// Returns the type name of `T` with every module path stripped, including
/// inside generic arguments: `a::b::StartCnf<a::c::Responder>` becomes
/// `StartCnf<Responder>`.
pub fn simple_type_name<T>() -> String {
	strip_type_paths(std::any::type_name::<T>())
}

fn strip_type_paths(full_name: &str) -> String {
	let mut stripped = String::with_capacity(full_name.len());
	let mut segment = String::new();
	for ch in full_name.chars() {
		if ch.is_alphanumeric() || ch == '_' {
			segment.push(ch);
		} else if ch == ':' {
			segment.clear();
		} else {
			stripped.push_str(&segment);
			segment.clear();
			stripped.push(ch);
		}
	}
	stripped.push_str(&segment);
	stripped
}

#[cfg(test)]
mod tests {
	use super::*;

	struct PlainType;
	struct GenericType<T>(std::marker::PhantomData<T>);

	#[test]
	fn test_simple_type_name() {
		assert_eq!(simple_type_name::<PlainType>(), "PlainType");
		assert_eq!(simple_type_name::<GenericType<PlainType>>(), "GenericType<PlainType>");
		assert_eq!(simple_type_name::<Vec<String>>(), "Vec<String>");
	}

	#[test]
	fn test_strip_type_paths_keeps_punctuation() {
		assert_eq!(strip_type_paths("a::b::Pair<x::T, y::U>"), "Pair<T, U>");
		assert_eq!(strip_type_paths("&mut core::option::Option<u32>"), "&mut Option<u32>");
	}
}
