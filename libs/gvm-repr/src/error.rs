use gvm_gc::AllocationError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReprError {
	#[error(transparent)]
	Allocation(#[from] AllocationError),
	#[error("{repr}: Index out of bounds")]
	IndexOutOfBounds { repr: &'static str, index: i64 },
	#[error("{repr}: Can't {op} from an empty array")]
	Empty { repr: &'static str, op: &'static str },
	#[error("{repr}: {op} expected {expected} register")]
	WrongKind {
		repr: &'static str,
		op: &'static str,
		expected: &'static str,
	},
	#[error("{repr}: Can't resize to negative elements")]
	NegativeSize { repr: &'static str },
	#[error("cannot create empty C struct")]
	EmptyStruct,
	#[error("C struct member list must alternate types and names")]
	UnpairedMembers,
	#[error("cannot initialize C struct from uncomposed type object")]
	Uncomposed,
	#[error("unknown attribute {name:?}")]
	UnknownAttribute { name: String },
}
