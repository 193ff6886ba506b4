//! Structural composition operators over register automata: concatenation,
//! partial transition replacement, and single-location splitting.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use rand::RngCore;
use rand::seq::SliceRandom;

use crate::error::Error;
use crate::error::Result;
use crate::guard::Guard;
use crate::model::Location;
use crate::model::LocationId;
use crate::model::RegisterAutomaton;
use crate::model::Transition;

/// Splits `items` into `n` buckets of near-equal size: the first `items.len()
/// % n` buckets get `ceil(items.len() / n)` elements, the rest get
/// `floor(items.len() / n)`. Relative order is preserved both within and
/// across buckets.
pub fn bucketing<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
	assert!(n >= 1, "bucketing requires at least one bucket");
	let len = items.len();
	let larger_count = len % n;
	let small_size = len / n;
	let mut out: Vec<Vec<T>> = Vec::with_capacity(n);
	let mut iter = items.into_iter();
	for i in 0..n {
		let size = if i < larger_count { small_size + 1 } else { small_size };
		out.push(iter.by_ref().take(size).collect());
	}
	out
}

/// The BFS-furthest accepting location from `ra`'s initial location, ties
/// broken by lowest [`LocationId`]. Used as the "end" of an automaton for
/// composition (see GLOSSARY: rendezvous / first terminal).
pub fn find_first_terminal(ra: &RegisterAutomaton) -> Option<LocationId> {
	let start = ra.initial_location();
	let mut distance: BTreeMap<LocationId, usize> = BTreeMap::new();
	distance.insert(start, 0);
	let mut queue: VecDeque<LocationId> = VecDeque::new();
	queue.push_back(start);
	while let Some(loc) = queue.pop_front() {
		let d = distance[&loc];
		for t in ra.outgoing(loc) {
			distance.entry(t.to).or_insert_with(|| {
				queue.push_back(t.to);
				d + 1
			});
		}
	}

	ra.locations
		.iter()
		.filter(|l| l.is_accepting)
		.filter_map(|l| distance.get(&l.id).map(|d| (*d, l.id)))
		.max_by_key(|(d, id)| (*d, std::cmp::Reverse(*id)))
		.map(|(_, id)| id)
}

/// Renames and merges `b` into a fresh arena appended after `a`'s, identifying
/// `b`'s initial location with `a`'s location `rendezvous_in_a`.
fn merge_at(a: &RegisterAutomaton, b: &RegisterAutomaton, rendezvous_in_a: LocationId) -> RegisterAutomaton {
	let mut locations: Vec<Location> = Vec::new();
	let mut from_a: BTreeMap<LocationId, LocationId> = BTreeMap::new();
	for loc in &a.locations {
		let id = LocationId(locations.len());
		from_a.insert(loc.id, id);
		locations.push(Location {
			id,
			name: format!("l_{}", loc.name),
			is_accepting: loc.is_accepting,
		});
	}

	let mut from_b: BTreeMap<LocationId, LocationId> = BTreeMap::new();
	let rendezvous = from_a[&rendezvous_in_a];
	from_b.insert(b.initial_location(), rendezvous);
	locations[rendezvous.0].is_accepting |= b.location(b.initial_location()).unwrap().is_accepting;
	locations[rendezvous.0].name = format!(
		"{}+r_{}",
		locations[rendezvous.0].name,
		b.location(b.initial_location()).unwrap().name
	);

	for loc in &b.locations {
		if loc.id == b.initial_location() {
			continue;
		}
		let id = LocationId(locations.len());
		from_b.insert(loc.id, id);
		locations.push(Location {
			id,
			name: format!("r_{}", loc.name),
			is_accepting: loc.is_accepting,
		});
	}

	let mut transitions: Vec<Transition> = Vec::new();
	for t in &a.transitions {
		transitions.push(Transition {
			from: from_a[&t.from],
			to: from_a[&t.to],
			symbol: t.symbol.clone(),
			guard: t.guard.clone(),
			assignments: t.assignments.clone(),
		});
	}
	for t in &b.transitions {
		transitions.push(Transition {
			from: from_b[&t.from],
			to: from_b[&t.to],
			symbol: t.symbol.clone(),
			guard: t.guard.clone(),
			assignments: t.assignments.clone(),
		});
	}

	let registers: BTreeSet<String> = a.registers.union(&b.registers).cloned().collect();
	let mut initial_valuation = a.initial_valuation.clone();
	initial_valuation.extend(b.initial_valuation.clone());
	let initial = from_a[&a.initial_location()];
	RegisterAutomaton::from_parts(locations, transitions, registers, initial_valuation, initial)
}

/// Identifies `b`'s initial location with `a`'s rendezvous location
/// (`find_first_terminal(a)`), re-pointing `b`'s transitions accordingly.
/// `a`'s initial location remains the merged automaton's initial location.
#[tracing::instrument(skip(a, b))]
pub fn concat(a: &RegisterAutomaton, b: &RegisterAutomaton) -> Result<RegisterAutomaton> {
	if let Some(conflict) = b.initial_valuation.keys().find(|name| a.registers.contains(*name)) {
		return Err(Error::CompositionPrecondition {
			reason: format!("register `{conflict}` is already present in the left operand and cannot be re-initialised by the right operand"),
		});
	}
	let rendezvous = find_first_terminal(a).ok_or_else(|| Error::CompositionPrecondition {
		reason: "left operand has no accepting location to concatenate at".to_owned(),
	})?;
	debug!("concatenating at rendezvous {rendezvous:?}");
	Ok(merge_at(a, b, rendezvous))
}

/// Deletes `t` from `host` and splices `replacement` in between `t.from` (as
/// `replacement`'s initial) and `t.to` (as `replacement`'s rendezvous).
fn splice_between(host: &RegisterAutomaton, t: &Transition, replacement: &RegisterAutomaton) -> Result<RegisterAutomaton> {
	let mut host = host.clone();
	host.transitions.retain(|tr| !(tr.from == t.from && tr.to == t.to && tr.symbol == t.symbol));
	splice_gadget(host, t.from, t.to, replacement, "gadget_")
}

/// Computes a maximal independent edge set over `host`'s transitions (no two
/// selected transitions share an endpoint location), scanning in transition
/// order and greedily accepting the first untouched transition.
fn maximal_independent_edges(host: &RegisterAutomaton) -> Vec<usize> {
	let mut used: BTreeSet<LocationId> = BTreeSet::new();
	let mut selected = Vec::new();
	for (idx, t) in host.transitions.iter().enumerate() {
		if used.contains(&t.from) || used.contains(&t.to) {
			continue;
		}
		used.insert(t.from);
		used.insert(t.to);
		selected.push(idx);
	}
	selected
}

/// Replaces a `share` fraction of a maximal independent edge set of `host`
/// with copies of `replacements`, distributed round-robin in as-equal-as-
/// possible buckets.
#[tracing::instrument(skip(host, replacements, rng))]
pub fn partial_replacement(
	host: &RegisterAutomaton,
	share: f64,
	replacements: &[RegisterAutomaton],
	rng: &mut dyn RngCore,
) -> Result<RegisterAutomaton> {
	if !(0.0..=1.0).contains(&share) {
		return Err(Error::CompositionPrecondition {
			reason: format!("share {share} is outside [0, 1]"),
		});
	}
	if replacements.is_empty() {
		return Err(Error::CompositionPrecondition {
			reason: "at least one replacement automaton is required".to_owned(),
		});
	}

	let mut candidates = maximal_independent_edges(host);
	candidates.shuffle(rng);
	let chosen_count = (candidates.len() as f64 * share).floor() as usize;
	candidates.truncate(chosen_count);

	let buckets = bucketing(candidates, replacements.len());

	let mut ra = host.clone();
	for (bucket, replacement) in buckets.into_iter().zip(replacements) {
		for idx in bucket {
			let t = host.transitions[idx].clone();
			ra = splice_between(&ra, &t, replacement)?;
		}
	}
	Ok(ra)
}

/// Splits `loc` into two locations `(inL/outL, inR/outR)` joined by two
/// independent copies of `discriminator`, redistributing `loc`'s non-loop
/// incoming/outgoing transitions between the two copies. `loc` must be
/// non-initial, non-accepting, and have at least two non-loop incoming and
/// two non-loop outgoing transitions.
#[tracing::instrument(skip(ra, discriminator, rng))]
pub fn split_single(ra: &RegisterAutomaton, loc: LocationId, discriminator: &RegisterAutomaton, rng: &mut dyn RngCore) -> Result<RegisterAutomaton> {
	if loc == ra.initial_location() {
		return Err(Error::CompositionPrecondition {
			reason: "cannot split the initial location".to_owned(),
		});
	}
	let target = ra.location(loc).ok_or(Error::UnknownLocationId { id: loc })?;
	if target.is_accepting {
		return Err(Error::CompositionPrecondition {
			reason: "cannot split an accepting location".to_owned(),
		});
	}
	let incoming: Vec<usize> = ra
		.transitions
		.iter()
		.enumerate()
		.filter(|(_, t)| t.to == loc && t.from != loc)
		.map(|(i, _)| i)
		.collect();
	let outgoing: Vec<usize> = ra
		.transitions
		.iter()
		.enumerate()
		.filter(|(_, t)| t.from == loc && t.to != loc)
		.map(|(i, _)| i)
		.collect();
	if incoming.len() < 2 || outgoing.len() < 2 {
		return Err(Error::CompositionPrecondition {
			reason: "no splittable location: needs >= 2 non-loop incoming and outgoing transitions".to_owned(),
		});
	}

	let mut locations = ra.locations.clone();
	let in_l = LocationId(locations.len());
	locations.push(Location {
		id: in_l,
		name: format!("inL_{}", target.name),
		is_accepting: target.is_accepting,
	});
	let in_r = LocationId(locations.len());
	locations.push(Location {
		id: in_r,
		name: format!("inR_{}", target.name),
		is_accepting: target.is_accepting,
	});
	let out_l = LocationId(locations.len());
	locations.push(Location {
		id: out_l,
		name: format!("outL_{}", target.name),
		is_accepting: target.is_accepting,
	});
	let out_r = LocationId(locations.len());
	locations.push(Location {
		id: out_r,
		name: format!("outR_{}", target.name),
		is_accepting: target.is_accepting,
	});

	let mut incoming_shuffled = incoming.clone();
	incoming_shuffled.shuffle(rng);
	let incoming_buckets = bucketing(incoming_shuffled, 2);
	let mut outgoing_shuffled = outgoing.clone();
	outgoing_shuffled.shuffle(rng);
	let outgoing_buckets = bucketing(outgoing_shuffled, 2);

	let dropped: BTreeSet<usize> = ra
		.transitions
		.iter()
		.enumerate()
		.filter(|(_, t)| t.from == loc && t.to == loc)
		.map(|(i, _)| i)
		.collect();

	let mut transitions: Vec<Transition> = Vec::new();
	for (idx, t) in ra.transitions.iter().enumerate() {
		if dropped.contains(&idx) || incoming.contains(&idx) || outgoing.contains(&idx) {
			continue;
		}
		transitions.push(t.clone());
	}
	for &idx in &incoming_buckets[0] {
		let mut t = ra.transitions[idx].clone();
		t.to = in_l;
		transitions.push(t);
	}
	for &idx in &incoming_buckets[1] {
		let mut t = ra.transitions[idx].clone();
		t.to = in_r;
		transitions.push(t);
	}
	for &idx in &outgoing_buckets[0] {
		let mut t = ra.transitions[idx].clone();
		t.from = out_l;
		transitions.push(t);
	}
	for &idx in &outgoing_buckets[1] {
		let mut t = ra.transitions[idx].clone();
		t.from = out_r;
		transitions.push(t);
	}

	let mut spliced = RegisterAutomaton::from_parts(locations, transitions, ra.registers.clone(), ra.initial_valuation.clone(), ra.initial_location());
	spliced = splice_gadget(spliced, in_l, out_l, discriminator, "dl_")?;
	spliced = splice_gadget(spliced, in_r, out_r, discriminator, "dr_")?;
	Ok(spliced)
}

fn splice_gadget(
	host: RegisterAutomaton,
	entry: LocationId,
	exit: LocationId,
	discriminator: &RegisterAutomaton,
	prefix: &str,
) -> Result<RegisterAutomaton> {
	if !discriminator.initial_valuation.is_empty() {
		return Err(Error::CompositionPrecondition {
			reason: "discriminator must carry no initial valuation of its own".to_owned(),
		});
	}
	let rendezvous = find_first_terminal(discriminator).ok_or_else(|| Error::CompositionPrecondition {
		reason: "discriminator has no accepting location to splice at".to_owned(),
	})?;

	let host_initial_location = host.initial_location();
	let mut locations = host.locations.clone();
	let mut from_d: BTreeMap<LocationId, LocationId> = BTreeMap::new();
	from_d.insert(discriminator.initial_location(), entry);
	from_d.insert(rendezvous, exit);
	for loc in &discriminator.locations {
		if loc.id == discriminator.initial_location() || loc.id == rendezvous {
			continue;
		}
		let id = LocationId(locations.len());
		from_d.insert(loc.id, id);
		locations.push(Location {
			id,
			name: format!("{prefix}{}", loc.name),
			is_accepting: loc.is_accepting,
		});
	}

	let mut transitions = host.transitions;
	for t in &discriminator.transitions {
		transitions.push(Transition {
			from: from_d[&t.from],
			to: from_d[&t.to],
			symbol: t.symbol.clone(),
			guard: t.guard.clone(),
			assignments: t.assignments.clone(),
		});
	}

	let registers: BTreeSet<String> = host.registers.union(&discriminator.registers).cloned().collect();
	Ok(RegisterAutomaton::from_parts(locations, transitions, registers, host.initial_valuation, host_initial_location))
}

#[cfg(test)]
mod test {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn bucketing_preserves_elements_and_order() {
		let result = bucketing(vec![1, 2, 3, 4, 5], 3);
		assert_eq!(result, vec![vec![1, 2], vec![3, 4], vec![5]]);
	}

	#[test]
	fn bucketing_sizes_differ_by_at_most_one() {
		for n in 1..20usize {
			for k in 1..7usize {
				let items: Vec<usize> = (0..n).collect();
				let buckets = bucketing(items.clone(), k);
				assert_eq!(buckets.len(), k);
				let sizes: Vec<usize> = buckets.iter().map(|b| b.len()).collect();
				assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
				let flat: Vec<usize> = buckets.into_iter().flatten().collect();
				assert_eq!(flat, items);
			}
		}
	}

	fn two_state_loop(accept_second: bool) -> RegisterAutomaton {
		let mut ra = RegisterAutomaton::new("q0");
		let q1 = ra.add_location("q1");
		ra.set_accepting(q1, accept_second);
		ra.add_transition(Transition {
			from: ra.initial_location(),
			to: q1,
			symbol: "a".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		});
		ra
	}

	#[test]
	fn find_first_terminal_picks_furthest_accepting() {
		let ra = two_state_loop(true);
		assert_eq!(find_first_terminal(&ra), Some(LocationId(1)));
	}

	#[test]
	fn concat_preserves_left_initial_location() {
		let a = two_state_loop(true);
		let b = two_state_loop(true);
		let merged = concat(&a, &b).unwrap();
		assert_eq!(merged.initial_location(), LocationId(0));
		assert_eq!(merged.location(LocationId(0)).unwrap().name, "l_q0");
	}

	#[test]
	fn concat_unions_bare_shared_register_declarations() {
		let mut a = two_state_loop(true);
		a.add_register("r");
		let mut b = two_state_loop(true);
		b.add_register("r");
		let merged = concat(&a, &b).unwrap();
		assert_eq!(merged.registers, BTreeSet::from(["r".to_owned()]));
	}

	#[test]
	fn concat_rejects_reinitialising_an_already_present_register() {
		let mut a = two_state_loop(true);
		a.add_register("r");
		let mut b = two_state_loop(true);
		b.set_initial_value("r", crate::symbol::Value::Int(0));
		let err = concat(&a, &b).unwrap_err();
		assert!(matches!(err, Error::CompositionPrecondition { .. }));
	}

	#[test]
	fn split_single_rejects_initial_location() {
		let ra = two_state_loop(false);
		let discriminator = two_state_loop(true);
		let mut rng = StdRng::seed_from_u64(3);
		let err = split_single(&ra, ra.initial_location(), &discriminator, &mut rng).unwrap_err();
		assert!(matches!(err, Error::CompositionPrecondition { .. }));
	}

	#[test]
	fn split_single_on_valid_location_matches_location_delta() {
		let mut ra = RegisterAutomaton::new("q0");
		let mid = ra.add_location("mid");
		let out1 = ra.add_location("out1");
		let out2 = ra.add_location("out2");
		let in1 = ra.initial_location();
		let in2 = ra.add_location("in2");
		ra.add_transition(Transition {
			from: in1,
			to: mid,
			symbol: "a".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		});
		ra.add_transition(Transition {
			from: in2,
			to: mid,
			symbol: "b".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		});
		ra.add_transition(Transition {
			from: mid,
			to: out1,
			symbol: "c".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		});
		ra.add_transition(Transition {
			from: mid,
			to: out2,
			symbol: "d".to_owned(),
			guard: Guard::True,
			assignments: BTreeMap::new(),
		});

		let discriminator = two_state_loop(true);
		let before = ra.locations.len();
		let mut rng = StdRng::seed_from_u64(9);
		let split = split_single(&ra, mid, &discriminator, &mut rng).unwrap();
		let expected_delta = 4 + 2 * (discriminator.locations.len() - 2);
		assert_eq!(split.locations.len() - before, expected_delta);
	}
}
