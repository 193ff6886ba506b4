//! Boolean guard trees over register comparisons.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::Error;
use crate::error::Result;
use crate::symbol::RelOp;
use crate::symbol::Value;
use crate::symbol::Var;

/// A single comparison atom, `lhs R rhs`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BinaryRel {
	pub lhs: Var,
	pub op: RelOp,
	pub rhs: Var,
}

impl fmt::Display for BinaryRel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
	}
}

/// A boolean guard tree. `False` is an addition beyond the closed four-variant
/// set so that `invert(True)` has a well-typed target; see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
	True,
	False,
	And(Box<Guard>, Box<Guard>),
	Or(Box<Guard>, Box<Guard>),
	BinaryRel(BinaryRel),
}

/// A variable-to-value environment a guard is evaluated against.
pub type Env = BTreeMap<Var, Value>;

/// Disjunctive normal form: an outer disjunction of inner conjunctions of
/// atoms, with no negation left implicit (atoms already carry the relation
/// that should be tested directly).
pub type Dnf = Vec<Vec<BinaryRel>>;

impl Guard {
	pub fn rel(lhs: Var, op: RelOp, rhs: Var) -> Guard {
		Guard::BinaryRel(BinaryRel { lhs, op, rhs })
	}

	pub fn and(a: Guard, b: Guard) -> Guard {
		Guard::And(Box::new(a), Box::new(b))
	}

	pub fn or(a: Guard, b: Guard) -> Guard {
		Guard::Or(Box::new(a), Box::new(b))
	}

	/// Evaluates this guard against `env`. A `Var` reachable through
	/// `free_variables` but absent from `env` fails with `UnknownVariable`
	/// rather than panicking.
	#[tracing::instrument(skip(self, env))]
	pub fn evaluate(&self, env: &Env) -> Result<bool> {
		match self {
			Guard::True => Ok(true),
			Guard::False => Ok(false),
			Guard::And(a, b) => Ok(a.evaluate(env)? && b.evaluate(env)?),
			Guard::Or(a, b) => Ok(a.evaluate(env)? || b.evaluate(env)?),
			Guard::BinaryRel(rel) => {
				let lhs = env.get(&rel.lhs).ok_or_else(|| Error::UnknownVariable { name: rel.lhs.to_string() })?;
				let rhs = env.get(&rel.rhs).ok_or_else(|| Error::UnknownVariable { name: rel.rhs.to_string() })?;
				Ok(rel.op.apply(lhs, rhs))
			},
		}
	}

	/// Every `Var` this guard's atoms reference, in a deterministic order.
	pub fn free_variables(&self) -> BTreeSet<Var> {
		let mut out: BTreeSet<Var> = BTreeSet::new();
		self.collect_free_variables(&mut out);
		out
	}

	fn collect_free_variables(&self, out: &mut BTreeSet<Var>) {
		match self {
			Guard::True | Guard::False => {},
			Guard::And(a, b) | Guard::Or(a, b) => {
				a.collect_free_variables(out);
				b.collect_free_variables(out);
			},
			Guard::BinaryRel(rel) => {
				out.insert(rel.lhs.clone());
				out.insert(rel.rhs.clone());
			},
		}
	}

	/// De Morgan negation.
	pub fn invert(&self) -> Guard {
		match self {
			Guard::True => Guard::False,
			Guard::False => Guard::True,
			Guard::And(a, b) => Guard::or(a.invert(), b.invert()),
			Guard::Or(a, b) => Guard::and(a.invert(), b.invert()),
			Guard::BinaryRel(rel) => Guard::rel(rel.lhs.clone(), rel.op.negate(), rel.rhs.clone()),
		}
	}

	/// Desugars `Geq`/`Leq` atoms into `Or(Gt, Eq)`/`Or(Lt, Eq)`, leaving
	/// `Eq`/`Neq`/`Gt`/`Lt` untouched.
	pub fn simplify_inequalities(&self) -> Guard {
		match self {
			Guard::True => Guard::True,
			Guard::False => Guard::False,
			Guard::And(a, b) => Guard::and(a.simplify_inequalities(), b.simplify_inequalities()),
			Guard::Or(a, b) => Guard::or(a.simplify_inequalities(), b.simplify_inequalities()),
			Guard::BinaryRel(rel) => match rel.op {
				RelOp::Geq => Guard::or(
					Guard::rel(rel.lhs.clone(), RelOp::Gt, rel.rhs.clone()),
					Guard::rel(rel.lhs.clone(), RelOp::Eq, rel.rhs.clone()),
				),
				RelOp::Leq => Guard::or(
					Guard::rel(rel.lhs.clone(), RelOp::Lt, rel.rhs.clone()),
					Guard::rel(rel.lhs.clone(), RelOp::Eq, rel.rhs.clone()),
				),
				_ => Guard::BinaryRel(rel.clone()),
			},
		}
	}

	/// Converts to disjunctive normal form. `simplify_inequalities` is
	/// applied first so the only relations appearing in the result are
	/// `Eq`/`Neq`/`Gt`/`Lt`.
	pub fn to_dnf(&self) -> Dnf {
		self.simplify_inequalities().to_dnf_raw()
	}

	fn to_dnf_raw(&self) -> Dnf {
		match self {
			Guard::True => vec![vec![]],
			Guard::False => vec![],
			Guard::BinaryRel(rel) => vec![vec![rel.clone()]],
			Guard::Or(a, b) => {
				let mut out = a.to_dnf_raw();
				out.extend(b.to_dnf_raw());
				out
			},
			Guard::And(a, b) => {
				let left = a.to_dnf_raw();
				let right = b.to_dnf_raw();
				let mut out = Vec::with_capacity(left.len() * right.len());
				for l in &left {
					for r in &right {
						let mut conj = l.clone();
						conj.extend(r.iter().cloned());
						out.push(conj);
					}
				}
				out
			},
		}
	}
}

impl fmt::Display for Guard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Guard::True => f.write_str("true"),
			Guard::False => f.write_str("false"),
			Guard::And(a, b) => write!(f, "({a} && {b})"),
			Guard::Or(a, b) => write!(f, "({a} || {b})"),
			Guard::BinaryRel(rel) => write!(f, "({rel})"),
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn env(pairs: &[(&str, i64)]) -> Env {
		pairs
			.iter()
			.map(|(name, v)| (Var::Constant((*name).to_owned()), Value::Int(*v)))
			.collect()
	}

	fn rel(lhs: &str, op: RelOp, rhs: &str) -> Guard {
		Guard::rel(Var::Constant(lhs.to_owned()), op, Var::Constant(rhs.to_owned()))
	}

	#[test]
	fn evaluate_true_false() {
		assert!(Guard::True.evaluate(&Env::new()).unwrap());
		assert!(!Guard::False.evaluate(&Env::new()).unwrap());
	}

	#[test]
	fn evaluate_binary_rel() {
		let g = rel("a", RelOp::Lt, "b");
		assert!(g.evaluate(&env(&[("a", 1), ("b", 2)])).unwrap());
		assert!(!g.evaluate(&env(&[("a", 2), ("b", 1)])).unwrap());
	}

	#[test]
	fn evaluate_reports_unbound_variable_instead_of_panicking() {
		let g = rel("a", RelOp::Lt, "b");
		let err = g.evaluate(&env(&[("a", 1)])).unwrap_err();
		assert!(matches!(err, Error::UnknownVariable { .. }));
	}

	#[test]
	fn invert_is_involution_under_evaluation() {
		let g = Guard::and(rel("a", RelOp::Eq, "b"), rel("a", RelOp::Neq, "c"));
		for a in 0..3 {
			for b in 0..3 {
				for c in 0..3 {
					let e = env(&[("a", a), ("b", b), ("c", c)]);
					assert_eq!(g.evaluate(&e).unwrap(), g.invert().invert().evaluate(&e).unwrap());
					assert_eq!(g.invert().evaluate(&e).unwrap(), !g.evaluate(&e).unwrap());
				}
			}
		}
	}

	#[test]
	fn simplify_inequalities_preserves_semantics() {
		let g = rel("a", RelOp::Geq, "b");
		for a in 0..3 {
			for b in 0..3 {
				let e = env(&[("a", a), ("b", b)]);
				assert_eq!(g.evaluate(&e).unwrap(), g.simplify_inequalities().evaluate(&e).unwrap());
			}
		}
	}

	#[test]
	fn dnf_preserves_semantics() {
		let g = Guard::or(
			Guard::and(rel("a", RelOp::Eq, "b"), rel("a", RelOp::Neq, "c")),
			rel("a", RelOp::Geq, "x_0_placeholder"),
		);
		for a in 0..3 {
			for b in 0..3 {
				for c in 0..3 {
					let e = env(&[("a", a), ("b", b), ("c", c), ("x_0_placeholder", 1)]);
					let dnf = g.to_dnf();
					let via_dnf = dnf.iter().any(|conj| {
						conj.iter()
							.all(|atom| atom.op.apply(e.get(&atom.lhs).unwrap(), e.get(&atom.rhs).unwrap()))
					});
					assert_eq!(g.evaluate(&e).unwrap(), via_dnf);
				}
			}
		}
	}

	#[test]
	fn empty_guard_free_variables() {
		assert!(Guard::True.free_variables().is_empty());
	}

	#[test]
	fn display_matches_wiki_full_style() {
		let g = Guard::or(
			Guard::and(rel("a", RelOp::Eq, "b"), rel("a", RelOp::Neq, "c")),
			rel("a", RelOp::Geq, "d"),
		);
		assert_eq!(g.to_string(), "(((a == b) && (a != c)) || (a >= d))");
	}
}
