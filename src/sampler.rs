//! Uniform random minimal-DFA sampling via the Champarnaud–Paranthoën
//! bijection between DFAs and constrained non-decreasing integer tuples.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use num_bigint::BigUint;
use num_traits::One;
use num_traits::ToPrimitive;
use num_traits::Zero;
use rand::Rng;
use rand::RngCore;

use crate::error::Error;
use crate::error::Result;
use crate::guard::Guard;
use crate::model::LocationId;
use crate::model::RegisterAutomaton;
use crate::model::Transition;

/// `C[t][p]`, the arbitrary-precision counting table from the reference
/// paper: `t` rows `1..=t_max`, `p` columns `0..=p_max`.
#[derive(Debug, Clone)]
pub struct CountingTable {
	alphabet_size: usize,
	t_max: usize,
	p_max: usize,
	cells: Vec<Vec<BigUint>>,
}

fn ceil_div(a: usize, b: usize) -> usize {
	a.div_ceil(b)
}

impl CountingTable {
	/// Builds the table for alphabet size `m` up to `t_max` rows and `p_max`
	/// columns. `m` must be at least 2.
	#[tracing::instrument]
	pub fn build(m: usize, t_max: usize, p_max: usize) -> CountingTable {
		assert!(m >= 2, "alphabet size must be at least 2");
		let mut cells: Vec<Vec<BigUint>> = vec![vec![BigUint::zero(); p_max + 1]; t_max + 1];

		for j in 1..=p_max {
			let j_big = BigUint::from(j);
			cells[1][j] = &j_big * (&j_big + BigUint::one()) / BigUint::from(2u32);
		}

		for t in 2..=t_max {
			for j in 0..=p_max {
				if j < ceil_div(t, m - 1) {
					continue;
				}
				let prev_col = if j == 0 { BigUint::zero() } else { cells[t][j - 1].clone() };
				let prev_row = &cells[t - 1][j];
				cells[t][j] = prev_col + BigUint::from(j) * prev_row;
			}
		}

		debug!("built counting table for m={m}, t_max={t_max}, p_max={p_max}");

		CountingTable {
			alphabet_size: m,
			t_max,
			p_max,
			cells,
		}
	}

	pub fn get(&self, t: usize, p: usize) -> &BigUint {
		&self.cells[t][p]
	}

	pub fn t_max(&self) -> usize {
		self.t_max
	}

	pub fn p_max(&self) -> usize {
		self.p_max
	}
}

/// Draws `d` uniformly from `[1, bound]` (`bound >= 1`).
fn draw_uniform(bound: &BigUint, rng: &mut dyn RngCore) -> BigUint {
	debug_assert!(!bound.is_zero());
	if let Some(small) = bound.to_u64() {
		return BigUint::from(rng.gen_range(1..=small));
	}
	// Counts this large need more entropy than a u64 draw can deliver
	// without biasing the low end: draw a same-byte-length random value and
	// reduce it into range, retrying on the rare out-of-range draw.
	let byte_len = bound.to_bytes_be().len();
	loop {
		let mut bytes = vec![0u8; byte_len];
		rng.fill_bytes(&mut bytes);
		let candidate = BigUint::from_bytes_be(&bytes) % bound;
		if !candidate.is_zero() {
			return candidate;
		}
	}
}

/// Samples a uniformly random constrained non-decreasing tuple per the
/// paper's decision walk over `table`, starting at `(t, p)`.
pub fn sample_tuple(table: &CountingTable, t: usize, p: usize, rng: &mut dyn RngCore) -> Vec<usize> {
	if p < ceil_div(t, table.alphabet_size - 1) {
		return Vec::new();
	}
	let bound = table.get(t, p);
	let d = draw_uniform(bound, rng);

	if t == 1 {
		let mut x = 1;
		while table.get(1, x) < &d {
			x += 1;
		}
		return vec![x];
	}

	if p > 1 && &d <= table.get(t, p - 1) {
		return sample_tuple(table, t, p - 1, rng);
	}

	let mut tail = sample_tuple(table, t - 1, p, rng);
	tail.insert(0, p);
	tail
}

/// A node of the extended tree produced by the tuple-to-tree bijection
/// (`ϕ⁻¹`). Both leaves and internal nodes carry the access sequence (the
/// sequence of alphabet letters from the root) that reaches them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree {
	Leaf { access: Vec<usize> },
	Node { access: Vec<usize>, children: Vec<Tree> },
}

impl Tree {
	pub fn access(&self) -> &[usize] {
		match self {
			Tree::Leaf { access } | Tree::Node { access, .. } => access,
		}
	}
}

struct TreeDecoder<'a> {
	tuple: &'a [usize],
	pos: usize,
	/// Count of internal nodes created so far, in the order this recursion
	/// discovers them (root is internal node `1`). A tuple entry equal to
	/// `counter` stamps a leaf of the node currently being built; an entry
	/// greater than `counter` means the current letter is itself internal,
	/// so `counter` is bumped before recursing into it.
	counter: usize,
	alphabet_len: usize,
}

impl<'a> TreeDecoder<'a> {
	/// Builds all `alphabet_len` children of the node at `access`. Each
	/// letter peeks the next unconsumed tuple entry against `counter`:
	/// equal means a leaf (consume one entry); greater means an internal
	/// node (bump `counter`, recurse with an incremented head entry). Once
	/// the tuple is exhausted, the remaining letters are the saturated
	/// trailing leaves the encoding never needed to spell out.
	fn build(&mut self, access: &[usize]) -> Tree {
		let mut children = Vec::with_capacity(self.alphabet_len);
		for letter in 0..self.alphabet_len {
			let mut child_access = access.to_vec();
			child_access.push(letter);
			if self.pos >= self.tuple.len() {
				children.push(Tree::Leaf { access: child_access });
			} else if self.tuple[self.pos] == self.counter {
				self.pos += 1;
				children.push(Tree::Leaf { access: child_access });
			} else {
				self.counter += 1;
				children.push(self.build(&child_access));
			}
		}
		Tree::Node {
			access: access.to_vec(),
			children,
		}
	}
}

/// Decodes a sampled tuple into the extended tree `ϕ⁻¹` produces, over an
/// alphabet of `alphabet_len` letters (letters are represented by their
/// index `0..alphabet_len`, not by name, to keep this module alphabet-type
/// agnostic; callers map indices to names).
pub fn decode_tree(tuple: &[usize], alphabet_len: usize) -> Tree {
	let mut decoder = TreeDecoder {
		tuple,
		pos: 0,
		counter: 1,
		alphabet_len,
	};
	decoder.build(&[])
}

/// A minimal DFA produced by lifting an extended tree per Theorem 6: every
/// internal node becomes a state, every internal-to-leaf edge is rerouted to
/// an existing internal node with a lexicographically smaller access
/// sequence, turning the tree into a complete, minimal transition function.
#[derive(Debug, Clone)]
pub struct Dfa {
	pub states: Vec<DfaState>,
	pub accepting: BTreeSet<usize>,
	pub start: usize,
}

#[derive(Debug, Clone)]
pub struct DfaState {
	pub access: Vec<usize>,
	/// `transitions[letter] = target state index`, one entry per alphabet
	/// letter.
	pub transitions: Vec<usize>,
}

#[tracing::instrument(skip(tree, rng))]
pub fn lift_tree_to_dfa(tree: &Tree, alphabet_len: usize, p_accept: f64, rng: &mut dyn RngCore) -> Dfa {
	let mut internal_nodes: Vec<&Tree> = Vec::new();
	collect_internal_nodes(tree, &mut internal_nodes);

	let index_of: BTreeMap<Vec<usize>, usize> = internal_nodes
		.iter()
		.enumerate()
		.map(|(i, n)| (n.access().to_vec(), i))
		.collect();

	let mut states: Vec<DfaState> = internal_nodes
		.iter()
		.map(|n| DfaState {
			access: n.access().to_vec(),
			transitions: vec![usize::MAX; alphabet_len],
		})
		.collect();

	for (state_idx, node) in internal_nodes.iter().enumerate() {
		let Tree::Node { children, .. } = node else {
			continue;
		};
		for (letter, child) in children.iter().enumerate() {
			match child {
				Tree::Node { access, .. } => {
					states[state_idx].transitions[letter] = index_of[access];
				},
				Tree::Leaf { access } => {
					let candidates: Vec<usize> = internal_nodes
						.iter()
						.enumerate()
						.filter(|(_, n)| n.access() < access.as_slice())
						.map(|(i, _)| i)
						.collect();
					let target = if candidates.is_empty() {
						state_idx
					} else {
						candidates[rng.gen_range(0..candidates.len())]
					};
					states[state_idx].transitions[letter] = target;
				},
			}
		}
	}

	// A short tuple can decode to a tree whose fringe runs out before every
	// internal node has one child per letter (the last node's tail is
	// truncated by the encoding); close the DFA by self-looping any letter
	// left unset so every state stays total over the alphabet.
	for (idx, state) in states.iter_mut().enumerate() {
		for slot in state.transitions.iter_mut() {
			if *slot == usize::MAX {
				*slot = idx;
			}
		}
	}

	let accepting: BTreeSet<usize> = (0..states.len()).filter(|_| rng.gen_bool(p_accept)).collect();
	debug!("lifted tree with {} internal nodes to dfa, {} accepting", states.len(), accepting.len());

	Dfa {
		states,
		accepting,
		start: 0,
	}
}

fn collect_internal_nodes<'a>(tree: &'a Tree, out: &mut Vec<&'a Tree>) {
	if let Tree::Node { children, .. } = tree {
		out.push(tree);
		for child in children {
			collect_internal_nodes(child, out);
		}
	}
}

/// Parameters for [`champarnaud_paranthoen_ra`].
pub struct SampleParams<'a> {
	pub n_states: usize,
	pub alphabet: &'a [String],
	pub n_parameters: usize,
	pub default_guard: Guard,
	pub p_accept: f64,
}

/// The public sampler entry point: builds the counting table, samples a
/// tuple, decodes it to a tree, lifts the tree to a minimal DFA, then lifts
/// the DFA to a register automaton by attaching `default_guard` (with no
/// assignments) to every transition. A sampled skeleton carries no register
/// semantics of its own; callers compose it further if they need any.
#[tracing::instrument(skip(params, rng))]
pub fn champarnaud_paranthoen_ra(params: SampleParams<'_>, rng: &mut dyn RngCore) -> Result<RegisterAutomaton> {
	let m = params.alphabet.len();
	if m < 2 {
		return Err(Error::InvalidSampleParameters {
			reason: "alphabet must have at least two symbols".to_owned(),
		});
	}
	if params.n_states == 0 {
		return Err(Error::InvalidSampleParameters {
			reason: "n_states must be positive".to_owned(),
		});
	}

	let t_max = params.n_states * (m - 1);
	let p_max = params.n_states;
	let table = CountingTable::build(m, t_max, p_max);
	let tuple = sample_tuple(&table, t_max, p_max, rng);
	let tree = decode_tree(&tuple, m);
	let dfa = lift_tree_to_dfa(&tree, m, params.p_accept, rng);

	let mut ra = RegisterAutomaton::new(access_name(&dfa.states[dfa.start].access));
	for (idx, state) in dfa.states.iter().enumerate() {
		if idx == dfa.start {
			continue;
		}
		ra.add_location(access_name(&state.access));
	}
	for (idx, state) in dfa.states.iter().enumerate() {
		ra.set_accepting(LocationId(idx), dfa.accepting.contains(&idx));
		for (letter, &target) in state.transitions.iter().enumerate() {
			if target == usize::MAX {
				continue;
			}
			ra.add_transition(Transition {
				from: LocationId(idx),
				to: LocationId(target),
				symbol: params.alphabet[letter].clone(),
				guard: params.default_guard.clone(),
				assignments: BTreeMap::new(),
			});
		}
	}
	for p in 0..params.n_parameters {
		ra.add_register(format!("p{p}"));
	}

	Ok(ra)
}

fn access_name(access: &[usize]) -> String {
	if access.is_empty() {
		"q_root".to_owned()
	} else {
		let digits: Vec<String> = access.iter().map(|i| i.to_string()).collect();
		format!("q_{}", digits.join("_"))
	}
}
