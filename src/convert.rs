//! Reading and writing the `<register-automaton>` XML document, and the
//! conversion between the Wiki-facing model and the core model (including
//! totalisation on the way out to Wiki form).

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;

use crate::error::Error;
use crate::error::Result;
use crate::guard::BinaryRel;
use crate::guard::Guard;
use crate::model::RegisterAutomaton;
use crate::model::Transition;
use crate::symbol::Value;
use crate::symbol::Var;
use crate::wiki::WikiAutomaton;
use crate::wiki::WikiLocation;
use crate::wiki::WikiSymbol;
use crate::wiki::WikiTransition;
use crate::wiki::format_ralib_safe;
use crate::wiki::parse_guard;

const OUTPUT_ACCEPT: &str = "OAccept";
const OUTPUT_REJECT: &str = "OReject";
const OUTPUT_ERROR: &str = "OError";

fn attr(start: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
	for a in start.attributes() {
		let a = a?;
		if a.key.as_ref() == name.as_bytes() {
			return Ok(Some(a.unescape_value()?.into_owned()));
		}
	}
	Ok(None)
}

/// Parses an Automata-Wiki `<register-automaton>` document into a
/// [`WikiAutomaton`].
#[tracing::instrument(skip(input))]
pub fn read_xml(input: &str) -> Result<WikiAutomaton> {
	let mut reader = Reader::from_str(input);
	reader.config_mut().trim_text(true);

	let mut wiki = WikiAutomaton::default();
	let mut path: Vec<String> = Vec::new();
	let mut cur_symbol: Option<WikiSymbol> = None;
	let mut cur_constant_name: Option<String> = None;
	let mut cur_transition: Option<WikiTransition> = None;
	let mut cur_assign_to: Option<String> = None;
	let mut text_buf = String::new();

	loop {
		match reader.read_event()? {
			Event::Eof => break,
			Event::Start(e) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
				match name.as_str() {
					"symbol" => {
						let sym_name = attr(&e, "name")?.ok_or_else(|| Error::MalformedDocument {
							reason: "<symbol> missing name attribute".to_owned(),
						})?;
						cur_symbol = Some(WikiSymbol {
							name: sym_name,
							params: Vec::new(),
						});
					},
					"param" => {
						if let Some(sym) = cur_symbol.as_mut() {
							if let Some(p) = attr(&e, "name")? {
								sym.params.push(p);
							}
						}
					},
					"constant" | "variable" => {
						cur_constant_name = Some(attr(&e, "name")?.ok_or_else(|| Error::MalformedDocument {
							reason: format!("<{name}> missing name attribute"),
						})?);
						text_buf.clear();
					},
					"location" => {
						let loc_name = attr(&e, "name")?.ok_or_else(|| Error::MalformedDocument {
							reason: "<location> missing name attribute".to_owned(),
						})?;
						let initial = attr(&e, "initial")?.map(|v| v == "true").unwrap_or(false);
						wiki.locations.push(WikiLocation { name: loc_name, initial });
					},
					"transition" => {
						let from = attr(&e, "from")?.ok_or_else(|| Error::MalformedDocument {
							reason: "<transition> missing from attribute".to_owned(),
						})?;
						let to = attr(&e, "to")?.ok_or_else(|| Error::MalformedDocument {
							reason: "<transition> missing to attribute".to_owned(),
						})?;
						let symbol = attr(&e, "symbol")?.ok_or_else(|| Error::MalformedDocument {
							reason: "<transition> missing symbol attribute".to_owned(),
						})?;
						let params = attr(&e, "params")?
							.map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_owned).collect())
							.unwrap_or_default();
						cur_transition = Some(WikiTransition {
							from,
							to,
							symbol,
							params,
							guard: Guard::True,
							assignments: Vec::new(),
						});
						text_buf.clear();
					},
					"guard" => {
						text_buf.clear();
					},
					"assign" => {
						cur_assign_to = attr(&e, "to")?;
						text_buf.clear();
					},
					_ => {},
				}
				path.push(name);
			},
			Event::Empty(e) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
				match name.as_str() {
					"symbol" => {
						let sym = WikiSymbol {
							name: attr(&e, "name")?.unwrap_or_default(),
							params: Vec::new(),
						};
						push_symbol(&mut wiki, &path, sym);
					},
					"location" => {
						let loc_name = attr(&e, "name")?.unwrap_or_default();
						let initial = attr(&e, "initial")?.map(|v| v == "true").unwrap_or(false);
						wiki.locations.push(WikiLocation { name: loc_name, initial });
					},
					_ => {},
				}
			},
			Event::Text(t) => {
				text_buf.push_str(&quick_xml::escape::unescape(&t.decode().map_err(quick_xml::Error::from)?).map_err(quick_xml::Error::from)?);
			},
			Event::End(e) => {
				let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
				match name.as_str() {
					"symbol" => {
						if let Some(sym) = cur_symbol.take() {
							push_symbol(&mut wiki, &path, sym);
						}
					},
					"constant" | "variable" => {
						if let Some(cname) = cur_constant_name.take() {
							let value = Value::Int(text_buf.trim().parse().unwrap_or(0));
							if name == "constant" {
								wiki.constants.insert(cname, value);
							} else {
								wiki.globals.insert(cname);
							}
						}
						text_buf.clear();
					},
					"guard" => {
						if let Some(t) = cur_transition.as_mut() {
							eprintln!("GUARD TEXT: {:?}", text_buf.trim());
							t.guard = parse_guard(text_buf.trim()).map_err(|e| Error::GuardParse {
								offset: e.offset,
								message: format!("{:?}", e.kind),
							})?;
						}
						text_buf.clear();
					},
					"assign" => {
						if let (Some(t), Some(to)) = (cur_transition.as_mut(), cur_assign_to.take()) {
							let from = parse_assignment_source(text_buf.trim());
							t.assignments.push((to, from));
						}
						text_buf.clear();
					},
					"transition" => {
						if let Some(t) = cur_transition.take() {
							wiki.transitions.push(t);
						}
					},
					_ => {},
				}
				path.pop();
			},
			_ => {},
		}
	}

	Ok(wiki)
}

fn push_symbol(wiki: &mut WikiAutomaton, path: &[String], sym: WikiSymbol) {
	if path.iter().any(|p| p == "inputs") {
		wiki.alphabet_inputs.push(sym);
	} else if path.iter().any(|p| p == "outputs") {
		wiki.alphabet_outputs.push(sym);
	}
}

fn parse_assignment_source(text: &str) -> Var {
	if let Ok(n) = text.parse::<i64>() {
		Var::Constant(n.to_string())
	} else {
		Var::Constant(text.to_owned())
	}
}

/// Serialises a [`WikiAutomaton`] to the canonical `<register-automaton>`
/// XML form, using the RALib-safe guard dialect as the wire format requires.
#[tracing::instrument(skip(wiki))]
pub fn write_xml(wiki: &WikiAutomaton) -> Result<String> {
	let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

	write_elem(&mut writer, "register-automaton", |w| {
		write_elem(w, "alphabet", |w| {
			write_elem(w, "inputs", |w| write_symbols(w, &wiki.alphabet_inputs))?;
			write_elem(w, "outputs", |w| write_symbols(w, &wiki.alphabet_outputs))
		})?;
		write_elem(w, "constants", |w| {
			for (name, value) in &wiki.constants {
				write_text_elem(w, "constant", &[("name", name), ("type", "int")], &value.to_string())?;
			}
			Ok(())
		})?;
		write_elem(w, "globals", |w| {
			for name in &wiki.globals {
				write_text_elem(w, "variable", &[("name", name), ("type", "int")], "0")?;
			}
			Ok(())
		})?;
		write_elem(w, "locations", |w| {
			for loc in &wiki.locations {
				let mut start = BytesStart::new("location");
				if loc.initial {
					start.push_attribute(("initial", "true"));
				}
				start.push_attribute(("name", loc.name.as_str()));
				w.write_event(Event::Empty(start))?;
			}
			Ok(())
		})?;
		write_elem(w, "transitions", |w| {
			for t in &wiki.transitions {
				write_transition(w, t)?;
			}
			Ok(())
		})
	})?;

	let bytes = writer.into_inner().into_inner();
	String::from_utf8(bytes).map_err(|e| Error::MalformedDocument {
		reason: format!("generated xml was not valid utf-8: {e}"),
	})
}

fn write_elem<W: std::io::Write>(
	writer: &mut Writer<W>,
	name: &str,
	body: impl FnOnce(&mut Writer<W>) -> Result<()>,
) -> Result<()> {
	writer.write_event(Event::Start(BytesStart::new(name)))?;
	body(writer)?;
	writer.write_event(Event::End(quick_xml::events::BytesEnd::new(name)))?;
	Ok(())
}

fn write_text_elem<W: std::io::Write>(writer: &mut Writer<W>, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
	let mut start = BytesStart::new(name);
	for (k, v) in attrs {
		start.push_attribute((*k, *v));
	}
	writer.write_event(Event::Start(start))?;
	writer.write_event(Event::Text(BytesText::new(text)))?;
	writer.write_event(Event::End(quick_xml::events::BytesEnd::new(name)))?;
	Ok(())
}

fn write_symbols<W: std::io::Write>(writer: &mut Writer<W>, symbols: &[WikiSymbol]) -> Result<()> {
	for sym in symbols {
		if sym.params.is_empty() {
			let mut start = BytesStart::new("symbol");
			start.push_attribute(("name", sym.name.as_str()));
			writer.write_event(Event::Empty(start))?;
		} else {
			let mut start = BytesStart::new("symbol");
			start.push_attribute(("name", sym.name.as_str()));
			writer.write_event(Event::Start(start))?;
			for p in &sym.params {
				let mut param = BytesStart::new("param");
				param.push_attribute(("name", p.as_str()));
				param.push_attribute(("type", "int"));
				writer.write_event(Event::Empty(param))?;
			}
			writer.write_event(Event::End(quick_xml::events::BytesEnd::new("symbol")))?;
		}
	}
	Ok(())
}

fn write_transition<W: std::io::Write>(writer: &mut Writer<W>, t: &WikiTransition) -> Result<()> {
	let mut start = BytesStart::new("transition");
	start.push_attribute(("from", t.from.as_str()));
	start.push_attribute(("to", t.to.as_str()));
	start.push_attribute(("symbol", t.symbol.as_str()));
	if !t.params.is_empty() {
		start.push_attribute(("params", t.params.join(",").as_str()));
	}
	writer.write_event(Event::Start(start))?;

	if t.guard != Guard::True {
		let formatted = format_ralib_safe(&t.guard.to_dnf()).map_err(|e| Error::MalformedDocument {
			reason: format!("guard not expressible in the RALib-safe dialect: {:?}", e.kind),
		})?;
		writer.write_event(Event::Start(BytesStart::new("guard")))?;
		writer.write_event(Event::Text(BytesText::new(&formatted)))?;
		writer.write_event(Event::End(quick_xml::events::BytesEnd::new("guard")))?;
	}

	if !t.assignments.is_empty() {
		write_elem(writer, "assignments", |w| {
			for (to, from) in &t.assignments {
				let mut assign = BytesStart::new("assign");
				assign.push_attribute(("to", to.as_str()));
				w.write_event(Event::Start(assign))?;
				w.write_event(Event::Text(BytesText::new(&from.to_string())))?;
				w.write_event(Event::End(quick_xml::events::BytesEnd::new("assign")))?;
				Ok::<(), Error>(())?;
			}
			Ok(())
		})?;
	}

	writer.write_event(Event::End(quick_xml::events::BytesEnd::new("transition")))?;
	Ok(())
}

/// Converts a Wiki document to the core model. Acceptance is always `false`
/// for every resulting location: the Wiki form encodes acceptance via
/// `OAccept`/`OReject` output actions, not a location attribute, and a
/// document produced by [`to_wiki`] never needs its sink locations to come
/// back accepting either.
pub fn from_wiki(wiki: &WikiAutomaton) -> Result<RegisterAutomaton> {
	let initial_name = wiki
		.locations
		.iter()
		.find(|l| l.initial)
		.map(|l| l.name.clone())
		.ok_or_else(|| Error::MalformedDocument {
			reason: "no location has initial=true".to_owned(),
		})?;

	let mut ra = RegisterAutomaton::new(initial_name);
	for loc in &wiki.locations {
		ra.add_location(loc.name.clone());
	}
	for name in &wiki.globals {
		ra.add_register(name.clone());
	}
	// Each constant becomes a register carrying its parsed value as an
	// initial valuation, and a value -> register side table so guard
	// literals naming that value can be rewritten into a register
	// reference rather than staying a bare integer string.
	let mut value_to_register: BTreeMap<i64, String> = BTreeMap::new();
	for (name, value) in &wiki.constants {
		ra.set_initial_value(name.clone(), *value);
		let Value::Int(v) = value;
		value_to_register.insert(*v, name.clone());
	}

	for t in &wiki.transitions {
		let from = ra.location_by_name(&t.from).ok_or_else(|| Error::UnknownLocationName { name: t.from.clone() })?.id;
		let to = ra.location_by_name(&t.to).ok_or_else(|| Error::UnknownLocationName { name: t.to.clone() })?.id;
		let assignments: BTreeMap<Var, Var> = t
			.assignments
			.iter()
			.map(|(to, from)| (Var::Constant(to.clone()), from.clone()))
			.collect();
		ra.add_transition(Transition {
			from,
			to,
			symbol: t.symbol.clone(),
			guard: rewrite_constant_literals(&t.guard, &value_to_register),
			assignments,
		});
	}

	Ok(ra)
}

/// Rewrites every guard literal whose digit-string names a value present in
/// `value_to_register` into a reference to that value's register, per the
/// constant-to-register mapping built by `from_wiki`. A literal with no
/// matching constant, or a named identifier, is left untouched.
fn rewrite_constant_literals(guard: &Guard, value_to_register: &BTreeMap<i64, String>) -> Guard {
	match guard {
		Guard::True => Guard::True,
		Guard::False => Guard::False,
		Guard::And(a, b) => Guard::and(rewrite_constant_literals(a, value_to_register), rewrite_constant_literals(b, value_to_register)),
		Guard::Or(a, b) => Guard::or(rewrite_constant_literals(a, value_to_register), rewrite_constant_literals(b, value_to_register)),
		Guard::BinaryRel(rel) => Guard::BinaryRel(BinaryRel {
			lhs: rewrite_constant_var(&rel.lhs, value_to_register),
			op: rel.op,
			rhs: rewrite_constant_var(&rel.rhs, value_to_register),
		}),
	}
}

fn rewrite_constant_var(var: &Var, value_to_register: &BTreeMap<i64, String>) -> Var {
	if let Var::Constant(name) = var {
		if let Ok(literal) = name.parse::<i64>() {
			if let Some(register) = value_to_register.get(&literal) {
				return Var::Constant(register.clone());
			}
		}
	}
	var.clone()
}

/// Converts the core model to Wiki form, totalising the transition function
/// against a fixed three-symbol output alphabet (`OAccept`/`OReject`/
/// `OError`) and splitting every transition through a fresh intermediate
/// location so each Wiki transition carries exactly one input and one
/// output symbol.
#[tracing::instrument(skip(ra))]
pub fn to_wiki(ra: &RegisterAutomaton) -> WikiAutomaton {
	let mut wiki = WikiAutomaton {
		alphabet_outputs: vec![
			WikiSymbol {
				name: OUTPUT_ACCEPT.to_owned(),
				params: Vec::new(),
			},
			WikiSymbol {
				name: OUTPUT_REJECT.to_owned(),
				params: Vec::new(),
			},
			WikiSymbol {
				name: OUTPUT_ERROR.to_owned(),
				params: Vec::new(),
			},
		],
		..Default::default()
	};

	let input_symbols: BTreeSet<String> = ra.transitions.iter().map(|t| t.symbol.clone()).collect();
	wiki.alphabet_inputs = input_symbols
		.iter()
		.map(|s| WikiSymbol {
			name: format!("I{s}"),
			params: Vec::new(),
		})
		.collect();

	for loc in &ra.locations {
		wiki.locations.push(WikiLocation {
			name: loc.name.clone(),
			initial: loc.id == ra.initial_location(),
		});
	}
	for name in &ra.registers {
		wiki.globals.insert(name.clone());
	}

	for (idx, t) in ra.transitions.iter().enumerate() {
		let io_name = format!("io_{idx}_{}_{}_{}", ra.location(t.from).unwrap().name, t.symbol, ra.location(t.to).unwrap().name);
		wiki.locations.push(WikiLocation {
			name: io_name.clone(),
			initial: false,
		});
		wiki.transitions.push(WikiTransition {
			from: ra.location(t.from).unwrap().name.clone(),
			to: io_name.clone(),
			symbol: format!("I{}", t.symbol),
			params: Vec::new(),
			guard: t.guard.clone(),
			assignments: t.assignments.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
		});
		let accept = ra.location(t.to).unwrap().is_accepting;
		wiki.transitions.push(WikiTransition {
			from: io_name,
			to: ra.location(t.to).unwrap().name.clone(),
			symbol: if accept { OUTPUT_ACCEPT.to_owned() } else { OUTPUT_REJECT.to_owned() },
			params: Vec::new(),
			guard: Guard::True,
			assignments: Vec::new(),
		});
	}

	let trap = "trap".to_owned();
	let io_trap = "io_trap".to_owned();
	let mut trap_needed = false;

	for loc in &ra.locations {
		for symbol in &input_symbols {
			let guards_here: Vec<&Guard> = ra.transitions.iter().filter(|t| t.from == loc.id && t.symbol == *symbol).map(|t| &t.guard).collect();
			if guards_here.is_empty() {
				trap_needed = true;
				wiki.transitions.push(WikiTransition {
					from: loc.name.clone(),
					to: io_trap.clone(),
					symbol: format!("I{symbol}"),
					params: Vec::new(),
					guard: Guard::True,
					assignments: Vec::new(),
				});
			} else if guards_here.iter().all(|g| **g == Guard::True) {
				// fully covered already; nothing to add
			} else {
				trap_needed = true;
				let combined = guards_here.into_iter().cloned().reduce(Guard::and).unwrap_or(Guard::True);
				wiki.transitions.push(WikiTransition {
					from: loc.name.clone(),
					to: io_trap.clone(),
					symbol: format!("I{symbol}"),
					params: Vec::new(),
					guard: combined.invert(),
					assignments: Vec::new(),
				});
			}
		}
	}

	if trap_needed {
		wiki.locations.push(WikiLocation {
			name: io_trap.clone(),
			initial: false,
		});
		wiki.locations.push(WikiLocation {
			name: trap.clone(),
			initial: false,
		});
		wiki.transitions.push(WikiTransition {
			from: io_trap,
			to: trap,
			symbol: OUTPUT_ERROR.to_owned(),
			params: Vec::new(),
			guard: Guard::True,
			assignments: Vec::new(),
		});
	}

	wiki
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::symbol::RelOp;

	fn sample_ra() -> RegisterAutomaton {
		let mut ra = RegisterAutomaton::new("q0");
		let q1 = ra.add_location("q1");
		ra.set_accepting(q1, true);
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
	fn to_wiki_inserts_sink_for_missing_coverage() {
		let ra = sample_ra();
		let wiki = to_wiki(&ra);
		assert!(wiki.locations.iter().any(|l| l.name == "trap"));
		assert!(wiki.transitions.iter().any(|t| t.to == "io_trap"));
	}

	#[test]
	fn to_wiki_marks_initial_location() {
		let ra = sample_ra();
		let wiki = to_wiki(&ra);
		let initial_count = wiki.locations.iter().filter(|l| l.initial).count();
		assert_eq!(initial_count, 1);
		assert_eq!(wiki.locations.iter().find(|l| l.initial).unwrap().name, "q0");
	}

	#[test]
	fn from_wiki_rewrites_constant_literals_into_register_references() {
		let mut wiki = WikiAutomaton {
			alphabet_inputs: vec![WikiSymbol {
				name: "Ia".to_owned(),
				params: Vec::new(),
			}],
			..Default::default()
		};
		wiki.constants.insert("max".to_owned(), Value::Int(1000));
		wiki.locations.push(WikiLocation {
			name: "q0".to_owned(),
			initial: true,
		});
		wiki.locations.push(WikiLocation {
			name: "q1".to_owned(),
			initial: false,
		});
		wiki.transitions.push(WikiTransition {
			from: "q0".to_owned(),
			to: "q1".to_owned(),
			symbol: "Ia".to_owned(),
			params: Vec::new(),
			guard: Guard::rel(Var::Constant("a".into()), RelOp::Lt, Var::Constant("1000".into())),
			assignments: Vec::new(),
		});

		let ra = from_wiki(&wiki).unwrap();
		assert_eq!(ra.initial_valuation.get("max"), Some(&Value::Int(1000)));
		assert_eq!(
			ra.transitions[0].guard,
			Guard::rel(Var::Constant("a".into()), RelOp::Lt, Var::Constant("max".into()))
		);
	}

	#[test]
	fn xml_round_trip_preserves_locations_and_transitions() {
		let ra = sample_ra();
		let wiki = to_wiki(&ra);
		let xml = write_xml(&wiki).unwrap();
		let reparsed = read_xml(&xml).unwrap();
		assert_eq!(reparsed.locations.len(), wiki.locations.len());
		assert_eq!(reparsed.transitions.len(), wiki.transitions.len());
		assert_eq!(reparsed.locations.iter().filter(|l| l.initial).count(), 1);
	}

	#[test]
	fn from_wiki_never_synthesizes_accepting_locations() {
		let ra = sample_ra();
		let wiki = to_wiki(&ra);
		let back = from_wiki(&wiki).unwrap();
		assert!(back.locations.iter().all(|l| !l.is_accepting));
	}

	#[test]
	fn reference_guard_round_trips_through_xml() {
		let guard = Guard::or(
			Guard::and(
				Guard::rel(Var::Constant("a".into()), RelOp::Eq, Var::Constant("b".into())),
				Guard::rel(Var::Constant("a".into()), RelOp::Neq, Var::Constant("1000".into())),
			),
			Guard::rel(Var::Constant("a".into()), RelOp::Geq, Var::Constant("x_0".into())),
		);
		let mut wiki = WikiAutomaton {
			alphabet_inputs: vec![WikiSymbol {
				name: "Ia".to_owned(),
				params: Vec::new(),
			}],
			..Default::default()
		};
		wiki.locations.push(WikiLocation {
			name: "q0".to_owned(),
			initial: true,
		});
		wiki.locations.push(WikiLocation {
			name: "q1".to_owned(),
			initial: false,
		});
		wiki.transitions.push(WikiTransition {
			from: "q0".to_owned(),
			to: "q1".to_owned(),
			symbol: "Ia".to_owned(),
			params: Vec::new(),
			guard: guard.clone(),
			assignments: Vec::new(),
		});

		let xml = write_xml(&wiki).unwrap();
		eprintln!("XML:\n{}", xml);
		let reparsed = read_xml(&xml).unwrap();
		let env: crate::guard::Env = [
			(Var::Constant("a".into()), Value::Int(2)),
			(Var::Constant("b".into()), Value::Int(2)),
			(Var::Constant("1000".into()), Value::Int(1000)),
			(Var::Constant("x_0".into()), Value::Int(9)),
		]
		.into_iter()
		.collect();
		assert_eq!(reparsed.transitions[0].guard.evaluate(&env).unwrap(), guard.evaluate(&env).unwrap());
	}
}
