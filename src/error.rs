//! The crate-wide error type.

use thiserror::Error;

use crate::model::LocationId;

#[derive(Debug, Error)]
pub enum Error {
	#[error("failed to parse guard expression at offset {offset}: {message}")]
	GuardParse { offset: usize, message: String },

	#[error("unbound variable in guard evaluation: {name}")]
	UnknownVariable { name: String },

	#[error("unknown location id: {id:?}")]
	UnknownLocationId { id: LocationId },

	#[error("unknown location name: {name}")]
	UnknownLocationName { name: String },

	#[error("duplicate location name: {name}")]
	DuplicateLocation { name: String },

	#[error("invalid sampling parameters: {reason}")]
	InvalidSampleParameters { reason: String },

	#[error("xml error: {0}")]
	Xml(#[from] quick_xml::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("xml attribute error: {0}")]
	XmlAttr(#[from] quick_xml::events::attributes::AttrError),

	#[error("malformed register-automaton document: {reason}")]
	MalformedDocument { reason: String },

	#[error("composition precondition violated: {reason}")]
	CompositionPrecondition { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
