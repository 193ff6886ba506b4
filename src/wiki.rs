//! The Automata-Wiki-facing model plus the guard mini-language's parser and
//! two pretty-printers.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use nom::Err as NomErr;
use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char as nom_char;
use nom::character::complete::digit1;
use nom::character::complete::multispace0;
use nom::character::complete::satisfy;
use nom::combinator::cut;
use nom::combinator::map;
use nom::combinator::opt;
use nom::combinator::recognize;
use nom::error::ErrorKind as NomErrorKind;
use nom::error::FromExternalError;
use nom::error::ParseError as NomParseError;
use nom::multi::many0;
use nom::sequence::delimited;
use nom::sequence::preceded;

use crate::guard::BinaryRel;
use crate::guard::Guard;
use crate::symbol::RelOp;
use crate::symbol::Value;
use crate::symbol::Var;

/// The Wiki-side automaton model, mirroring the `<register-automaton>`
/// document structure one-to-one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WikiAutomaton {
	pub alphabet_inputs: Vec<WikiSymbol>,
	pub alphabet_outputs: Vec<WikiSymbol>,
	pub constants: BTreeMap<String, Value>,
	pub globals: BTreeSet<String>,
	pub locations: Vec<WikiLocation>,
	pub transitions: Vec<WikiTransition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSymbol {
	pub name: String,
	pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiLocation {
	pub name: String,
	pub initial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiTransition {
	pub from: String,
	pub to: String,
	pub symbol: String,
	pub params: Vec<String>,
	pub guard: Guard,
	pub assignments: Vec<(String, Var)>,
}

/// Parse failure carrying the byte offset into the original input at which
/// the error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardParseError {
	pub offset: usize,
	pub kind: GuardParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardParseErrorKind {
	ExpectedExpr,
	ExpectedRelop,
	ExpectedClosingParen,
	TrailingInput,
	Nom(NomErrorKind),
}

struct InternalError<'a> {
	input: &'a str,
	kind: GuardParseErrorKind,
}

impl<'a> NomParseError<&'a str> for InternalError<'a> {
	fn from_error_kind(input: &'a str, kind: NomErrorKind) -> Self {
		InternalError {
			input,
			kind: GuardParseErrorKind::Nom(kind),
		}
	}

	fn append(_input: &'a str, _kind: NomErrorKind, other: Self) -> Self {
		other
	}
}

impl<'a> FromExternalError<&'a str, GuardParseErrorKind> for InternalError<'a> {
	fn from_external_error(input: &'a str, _kind: NomErrorKind, e: GuardParseErrorKind) -> Self {
		InternalError { input, kind: e }
	}
}

type ParsingResult<'a, T> = IResult<&'a str, T, InternalError<'a>>;

fn ws<'a, O>(mut inner: impl Parser<&'a str, Output = O, Error = InternalError<'a>>) -> impl FnMut(&'a str) -> ParsingResult<'a, O> {
	move |input: &'a str| {
		let (input, _) = multispace0(input)?;
		let (input, value) = inner.parse(input)?;
		let (input, _) = multispace0(input)?;
		Ok((input, value))
	}
}

fn parse_ident(input: &str) -> ParsingResult<'_, &str> {
	recognize((satisfy(|c: char| c.is_alphabetic() || c == '_'), many0(satisfy(|c: char| c.is_alphanumeric() || c == '_')))).parse(input)
}

fn parse_expr(input: &str) -> ParsingResult<'_, Var> {
	let ident = map(parse_ident, |s: &str| Var::Constant(s.to_owned()));
	let int = map(recognize((opt(nom_char('-')), digit1)), |s: &str| {
		Var::Constant(s.to_owned())
	});
	alt((ident, int)).parse(input)
}

fn parse_relop(input: &str) -> ParsingResult<'_, RelOp> {
	alt((
		map(tag("=="), |_| RelOp::Eq),
		map(tag("!="), |_| RelOp::Neq),
		map(tag(">="), |_| RelOp::Geq),
		map(tag(">"), |_| RelOp::Gt),
		map(tag("<="), |_| RelOp::Leq),
		map(tag("<"), |_| RelOp::Lt),
	))
	.parse(input)
}

fn parse_rel_clause(input: &str) -> ParsingResult<'_, Guard> {
	let (input, lhs) = ws(parse_expr).parse(input)?;
	let (input, op) = cut(ws(parse_relop)).parse(input)?;
	let (input, rhs) = cut(ws(parse_expr)).parse(input)?;
	Ok((input, Guard::BinaryRel(BinaryRel { lhs, op, rhs })))
}

fn parse_clause(input: &str) -> ParsingResult<'_, Guard> {
	let paren = delimited(ws(nom_char('(')), cut(parse_and_chain), cut(ws(nom_char(')'))));
	alt((paren, parse_rel_clause)).parse(input)
}

fn parse_and_chain(input: &str) -> ParsingResult<'_, Guard> {
	let (input, first) = parse_clause(input)?;
	let (input, rest) = many0(preceded(ws(tag("&&")), cut(parse_clause))).parse(input)?;
	let guard = rest.into_iter().fold(first, Guard::and);
	Ok((input, guard))
}

fn parse_or_chain(input: &str) -> ParsingResult<'_, Guard> {
	let (input, first) = parse_and_chain(input)?;
	let (input, rest) = many0(preceded(ws(tag("||")), cut(parse_and_chain))).parse(input)?;
	let guard = rest.into_iter().fold(first, Guard::or);
	Ok((input, guard))
}

fn offset_of<'a>(original: &'a str, remaining: &'a str) -> usize {
	original.len() - remaining.len()
}

/// Parses a guard mini-language string into a [`Guard`]. The empty string
/// (after trimming whitespace) parses to `Guard::True`.
pub fn parse_guard(input: &str) -> Result<Guard, GuardParseError> {
	if input.trim().is_empty() {
		return Ok(Guard::True);
	}
	match parse_or_chain(input) {
		Ok((remaining, guard)) => {
			let (remaining, _) = multispace0::<&str, InternalError<'_>>(remaining).unwrap_or((remaining, ""));
			if remaining.is_empty() {
				Ok(guard)
			} else {
				Err(GuardParseError {
					offset: offset_of(input, remaining),
					kind: GuardParseErrorKind::TrailingInput,
				})
			}
		},
		Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => Err(GuardParseError {
			offset: offset_of(input, e.input),
			kind: e.kind,
		}),
		Err(NomErr::Incomplete(_)) => Err(GuardParseError {
			offset: input.len(),
			kind: GuardParseErrorKind::ExpectedExpr,
		}),
	}
}

/// `(((a == b) && (a != 1000)) || (a >= x_0))`-style printer: every compound
/// subformula is parenthesized; `True` is the empty string.
pub fn format_wiki_full(guard: &Guard) -> String {
	match guard {
		Guard::True => String::new(),
		Guard::False => "false".to_owned(),
		Guard::And(a, b) => format!("({} && {})", wrap(a), wrap(b)),
		Guard::Or(a, b) => format!("({} || {})", wrap(a), wrap(b)),
		Guard::BinaryRel(rel) => format!("({} {} {})", rel.lhs, rel.op, rel.rhs),
	}
}

fn wrap(guard: &Guard) -> String {
	let s = format_wiki_full(guard);
	if s.is_empty() { "true".to_owned() } else { s }
}

/// RALib-safe dialect: operates on an already-computed [`crate::guard::Dnf`].
/// Only `=`, `!=`, `<`, `>` atoms are accepted; a `Dnf` containing `>=`/`<=`
/// (i.e. one built without first running `simplify_inequalities`) is
/// rejected rather than silently reformatted. Disjuncts are joined with `||`
/// and conjuncts with `&&`, with no spaces and no parentheses.
pub fn format_ralib_safe(dnf: &crate::guard::Dnf) -> Result<String, GuardParseError> {
	let mut disjuncts: Vec<String> = Vec::with_capacity(dnf.len());
	for conj in dnf {
		if conj.is_empty() {
			disjuncts.push("true".to_owned());
			continue;
		}
		let mut atoms = Vec::with_capacity(conj.len());
		for atom in conj {
			if matches!(atom.op, RelOp::Geq | RelOp::Leq) {
				return Err(GuardParseError {
					offset: 0,
					kind: GuardParseErrorKind::ExpectedRelop,
				});
			}
			atoms.push(format!("{}{}{}", atom.lhs, atom.op, atom.rhs));
		}
		disjuncts.push(atoms.join("&&"));
	}
	Ok(disjuncts.join("||"))
}

#[cfg(test)]
mod test {
	use super::*;

	fn c(name: &str) -> Var {
		Var::Constant(name.to_owned())
	}

	#[test]
	fn empty_string_parses_to_true() {
		assert_eq!(parse_guard("").unwrap(), Guard::True);
		assert_eq!(parse_guard("   ").unwrap(), Guard::True);
	}

	#[test]
	fn parses_scenario_two() {
		let g = parse_guard("(a==b && a!=1000) || a>=x_0").unwrap();
		let expected = Guard::or(
			Guard::and(
				Guard::rel(c("a"), RelOp::Eq, c("b")),
				Guard::rel(c("a"), RelOp::Neq, c("1000")),
			),
			Guard::rel(c("a"), RelOp::Geq, c("x_0")),
		);
		assert_eq!(g, expected);
	}

	#[test]
	fn and_binds_tighter_than_or_without_parens() {
		let g = parse_guard("a==b && a!=c || a>d").unwrap();
		let expected = Guard::or(
			Guard::and(Guard::rel(c("a"), RelOp::Eq, c("b")), Guard::rel(c("a"), RelOp::Neq, c("c"))),
			Guard::rel(c("a"), RelOp::Gt, c("d")),
		);
		assert_eq!(g, expected);
	}

	#[test]
	fn unterminated_paren_is_a_hard_failure() {
		let err = parse_guard("(a==b").unwrap_err();
		assert_eq!(err.kind, GuardParseErrorKind::Nom(NomErrorKind::Char));
	}

	#[test]
	fn trailing_garbage_is_reported_with_its_offset() {
		let err = parse_guard("a==b )").unwrap_err();
		assert_eq!(err.kind, GuardParseErrorKind::TrailingInput);
		assert_eq!(err.offset, 5);
	}

	#[test]
	fn format_wiki_full_matches_reference_guard() {
		let g = Guard::or(
			Guard::and(Guard::rel(c("a"), RelOp::Eq, c("b")), Guard::rel(c("a"), RelOp::Neq, c("1000"))),
			Guard::rel(c("a"), RelOp::Geq, c("x_0")),
		);
		assert_eq!(format_wiki_full(&g), "(((a == b) && (a != 1000)) || (a >= x_0))");
	}

	#[test]
	fn wiki_full_round_trips_through_parse_guard() {
		let g = Guard::or(
			Guard::and(Guard::rel(c("a"), RelOp::Eq, c("b")), Guard::rel(c("a"), RelOp::Neq, c("1000"))),
			Guard::rel(c("a"), RelOp::Geq, c("x_0")),
		);
		let printed = format_wiki_full(&g);
		let reparsed = parse_guard(&printed).unwrap();
		let env: crate::guard::Env = [(c("a"), Value::Int(1)), (c("b"), Value::Int(1)), (c("1000"), Value::Int(1000)), (c("x_0"), Value::Int(5))]
			.into_iter()
			.collect();
		assert_eq!(g.evaluate(&env).unwrap(), reparsed.evaluate(&env).unwrap());
	}

	#[test]
	fn ralib_safe_rejects_geq_leq() {
		let raw_dnf = vec![vec![BinaryRel {
			lhs: c("a"),
			op: RelOp::Geq,
			rhs: c("b"),
		}]];
		assert!(format_ralib_safe(&raw_dnf).is_err());

		let g = Guard::rel(c("a"), RelOp::Geq, c("b"));
		assert!(format_ralib_safe(&g.to_dnf()).is_ok());
	}

	#[test]
	fn ralib_safe_has_no_spaces_or_parens() {
		let g = Guard::or(
			Guard::and(Guard::rel(c("a"), RelOp::Eq, c("b")), Guard::rel(c("a"), RelOp::Neq, c("1000"))),
			Guard::rel(c("a"), RelOp::Geq, c("x_0")),
		);
		let formatted = format_ralib_safe(&g.to_dnf()).unwrap();
		assert!(!formatted.contains(' '));
		assert!(!formatted.contains('('));
	}
}
