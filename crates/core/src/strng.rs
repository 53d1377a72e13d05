//! strng provides a cheaply clonable, immutable string type.
//!
//! Most strings flowing through the gateway are small, long lived, and shared across
//! many requests (provider names, model names, header values). `Strng` is an alias for
//! `ArcStr`, which stores the string once and hands out reference-counted pointers,
//! with zero-allocation construction from literals.

use std::fmt::Display;

pub use arcstr::{ArcStr, format, literal};

pub type Strng = ArcStr;

pub const EMPTY: Strng = literal!("");

pub fn new<A: AsRef<str>>(s: A) -> Strng {
	ArcStr::from(s.as_ref())
}

pub fn display<D: Display>(d: D) -> Strng {
	format!("{d}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn literals_do_not_allocate_per_clone() {
		let a: Strng = literal!("openai");
		let b = a.clone();
		assert_eq!(a, b);
		assert_eq!(a.as_str(), "openai");
	}

	#[test]
	fn new_from_ref() {
		let s = String::from("claude-sonnet");
		assert_eq!(new(&s), "claude-sonnet");
		assert_eq!(display(42), "42");
	}
}
