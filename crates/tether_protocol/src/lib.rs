#![forbid(unsafe_code)]

pub mod envelope;
pub mod messages;
pub mod topics;

pub use envelope::{
	DEFAULT_MAX_ENVELOPE_SIZE, EnvelopeError, ErrorBody, Request, Response, decode_request, decode_response, encode,
	peek_trace_id,
};
pub use topics::{Subject, SubjectParts, SubjectPattern, Topic, TopicBuilder, TopicError, WILDCARD};

