//! Typed values and the atoms a guard compares.

use std::fmt;

/// A typed constant appearing in a guard or assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
	Int(i64),
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Int(v) => write!(f, "{v}"),
		}
	}
}

/// An identifier a guard or assignment can refer to: either a named register
/// (a `Constant`, shared across the whole automaton) or a transition-local
/// `Parameter` (`x_0`, `x_1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Var {
	Constant(String),
	Parameter(usize),
}

impl fmt::Display for Var {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Var::Constant(name) => write!(f, "{name}"),
			Var::Parameter(idx) => write!(f, "x_{idx}"),
		}
	}
}

/// A binary relational operator comparing two `Var`s through their resolved
/// `Value`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelOp {
	Eq,
	Neq,
	Geq,
	Gt,
	Leq,
	Lt,
}

impl RelOp {
	pub fn apply(self, lhs: &Value, rhs: &Value) -> bool {
		match self {
			RelOp::Eq => lhs == rhs,
			RelOp::Neq => lhs != rhs,
			RelOp::Geq => lhs >= rhs,
			RelOp::Gt => lhs > rhs,
			RelOp::Leq => lhs <= rhs,
			RelOp::Lt => lhs < rhs,
		}
	}

	/// The logical negation of this relation: `invert(a R b) == a negate(R) b`.
	pub fn negate(self) -> RelOp {
		match self {
			RelOp::Eq => RelOp::Neq,
			RelOp::Neq => RelOp::Eq,
			RelOp::Geq => RelOp::Lt,
			RelOp::Lt => RelOp::Geq,
			RelOp::Gt => RelOp::Leq,
			RelOp::Leq => RelOp::Gt,
		}
	}
}

impl fmt::Display for RelOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			RelOp::Eq => "==",
			RelOp::Neq => "!=",
			RelOp::Geq => ">=",
			RelOp::Gt => ">",
			RelOp::Leq => "<=",
			RelOp::Lt => "<",
		};
		f.write_str(s)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn relop_apply() {
		let a = Value::Int(3);
		let b = Value::Int(5);
		assert!(RelOp::Lt.apply(&a, &b));
		assert!(!RelOp::Geq.apply(&a, &b));
		assert!(RelOp::Eq.apply(&a, &a));
	}

	#[test]
	fn relop_negate_is_involution() {
		for op in [RelOp::Eq, RelOp::Neq, RelOp::Geq, RelOp::Gt, RelOp::Leq, RelOp::Lt] {
			assert_eq!(op.negate().negate(), op);
		}
	}

	#[test]
	fn relop_negate_flips_every_evaluation() {
		let values: Vec<Value> = (0..4).map(Value::Int).collect();
		for op in [RelOp::Eq, RelOp::Neq, RelOp::Geq, RelOp::Gt, RelOp::Leq, RelOp::Lt] {
			for a in &values {
				for b in &values {
					assert_ne!(op.apply(a, b), op.negate().apply(a, b));
				}
			}
		}
	}

	#[test]
	fn var_display() {
		assert_eq!(Var::Constant("a".to_owned()).to_string(), "a");
		assert_eq!(Var::Parameter(0).to_string(), "x_0");
	}
}
