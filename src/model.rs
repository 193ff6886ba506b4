//! The core register-automaton data model: arena-indexed locations and
//! transitions, built up through an idempotent builder API.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::guard::Guard;
use crate::symbol::Value;
use crate::symbol::Var;

/// Index of a [`Location`] within a [`RegisterAutomaton`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationId(pub usize);

/// Index of a declared register within a [`RegisterAutomaton`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
	pub id: LocationId,
	pub name: String,
	pub is_accepting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
	pub from: LocationId,
	pub to: LocationId,
	pub symbol: String,
	pub guard: Guard,
	pub assignments: BTreeMap<Var, Var>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAutomaton {
	pub locations: Vec<Location>,
	pub transitions: Vec<Transition>,
	pub registers: BTreeSet<String>,
	/// The subset of `registers` that carry an initial valuation, set at
	/// construction time rather than by a run's own assignments. A register
	/// present in `registers` but absent here is merely declared.
	pub initial_valuation: BTreeMap<String, Value>,
	initial: LocationId,
}

impl RegisterAutomaton {
	/// Builds an automaton with a single location `initial_name`, set as both
	/// the initial and (by default) a non-accepting location.
	pub fn new(initial_name: impl Into<String>) -> RegisterAutomaton {
		let initial = LocationId(0);
		RegisterAutomaton {
			locations: vec![Location {
				id: initial,
				name: initial_name.into(),
				is_accepting: false,
			}],
			transitions: Vec::new(),
			registers: BTreeSet::new(),
			initial_valuation: BTreeMap::new(),
			initial,
		}
	}

	pub fn initial_location(&self) -> LocationId {
		self.initial
	}

	pub fn location(&self, id: LocationId) -> Option<&Location> {
		self.locations.iter().find(|l| l.id == id)
	}

	pub fn location_by_name(&self, name: &str) -> Option<&Location> {
		self.locations.iter().find(|l| l.name == name)
	}

	/// Adds a location named `name` if none exists with that name yet;
	/// returns the (possibly pre-existing) location's id. Idempotent.
	pub fn add_location(&mut self, name: impl Into<String>) -> LocationId {
		let name = name.into();
		if let Some(existing) = self.location_by_name(&name) {
			return existing.id;
		}
		let id = LocationId(self.locations.len());
		self.locations.push(Location {
			id,
			name,
			is_accepting: false,
		});
		id
	}

	pub fn set_accepting(&mut self, id: LocationId, accepting: bool) {
		if let Some(loc) = self.locations.iter_mut().find(|l| l.id == id) {
			loc.is_accepting = accepting;
		}
	}

	/// Adds `register` to the declared register set. Idempotent (a `BTreeSet`
	/// insert is already idempotent).
	pub fn add_register(&mut self, register: impl Into<String>) {
		self.registers.insert(register.into());
	}

	/// Declares `register` (if not already declared) and gives it an initial
	/// valuation of `value`.
	pub fn set_initial_value(&mut self, register: impl Into<String>, value: Value) {
		let register = register.into();
		self.registers.insert(register.clone());
		self.initial_valuation.insert(register, value);
	}

	/// Adds a transition. Idempotent: adding the same `(from, symbol, to,
	/// guard, assignments)` tuple twice leaves `transitions` unchanged.
	pub fn add_transition(&mut self, transition: Transition) {
		if !self.transitions.contains(&transition) {
			self.transitions.push(transition);
		}
	}

	pub fn outgoing(&self, from: LocationId) -> impl Iterator<Item = &Transition> {
		self.transitions.iter().filter(move |t| t.from == from)
	}

	pub fn incoming(&self, to: LocationId) -> impl Iterator<Item = &Transition> {
		self.transitions.iter().filter(move |t| t.to == to)
	}

	/// Creates an automaton over an explicit location/transition set with a
	/// chosen initial location. Used by composition operators, which build
	/// up a fresh arena directly rather than calling `add_location` in a
	/// loop.
	pub fn from_parts(
		locations: Vec<Location>,
		transitions: Vec<Transition>,
		registers: BTreeSet<String>,
		initial_valuation: BTreeMap<String, Value>,
		initial: LocationId,
	) -> RegisterAutomaton {
		RegisterAutomaton {
			locations,
			transitions,
			registers,
			initial_valuation,
			initial,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::symbol::RelOp;

	#[test]
	fn new_automaton_has_single_initial_location() {
		let ra = RegisterAutomaton::new("q0");
		assert_eq!(ra.locations.len(), 1);
		assert_eq!(ra.initial_location(), LocationId(0));
		assert_eq!(ra.location(ra.initial_location()).unwrap().name, "q0");
	}

	#[test]
	fn add_location_is_idempotent() {
		let mut ra = RegisterAutomaton::new("q0");
		let a = ra.add_location("q1");
		let b = ra.add_location("q1");
		assert_eq!(a, b);
		assert_eq!(ra.locations.len(), 2);
	}

	#[test]
	fn add_transition_is_idempotent() {
		let mut ra = RegisterAutomaton::new("q0");
		let q1 = ra.add_location("q1");
		let t = Transition {
			from: ra.initial_location(),
			to: q1,
			symbol: "a".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		};
		ra.add_transition(t.clone());
		ra.add_transition(t);
		assert_eq!(ra.transitions.len(), 1);
	}

	#[test]
	fn initial_location_is_not_derived_from_accepting_flag() {
		let mut ra = RegisterAutomaton::new("q0");
		let q1 = ra.add_location("q1");
		ra.set_accepting(q1, true);
		assert_eq!(ra.initial_location(), LocationId(0));
		assert_ne!(ra.initial_location(), q1);
	}

	#[test]
	fn outgoing_and_incoming_filter_by_location() {
		let mut ra = RegisterAutomaton::new("q0");
		let q1 = ra.add_location("q1");
		ra.add_transition(Transition {
			from: ra.initial_location(),
			to: q1,
			symbol: "a".to_owned(),
			guard: Guard::rel(Var::Constant("a".into()), RelOp::Eq, Var::Constant("b".into())),
			assignments: BTreeMap::new(),
		});
		assert_eq!(ra.outgoing(ra.initial_location()).count(), 1);
		assert_eq!(ra.incoming(q1).count(), 1);
		assert_eq!(ra.incoming(ra.initial_location()).count(), 0);
	}
}
