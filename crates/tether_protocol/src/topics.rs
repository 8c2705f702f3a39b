#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use tether_domain::Platform;
use thiserror::Error;

/// Single-segment wildcard. Only valid in subscribe patterns.
pub const WILDCARD: &str = "*";

const SEPARATOR: char = '.';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
	#[error("empty subject")]
	Empty,
	#[error("empty segment in subject: {0}")]
	EmptySegment(String),
	#[error("invalid segment: {0:?}")]
	InvalidSegment(String),
	#[error("wildcard not allowed in a publish subject: {0}")]
	WildcardInSubject(String),
	#[error("unknown topic: {0}")]
	UnknownTopic(String),
	#[error("unknown platform segment: {0}")]
	UnknownPlatform(String),
}

/// Known topic roots: `<domain>.<verb>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
	PlatformStartBot,
	PlatformStopBot,
	PlatformGetBot,
	PlatformChatMessageSend,
	WebhookNotification,
	EventChatMessage,
	EventStreamOnline,
	EventStreamOffline,
	AuthProviderGet,
	AuthProviderUpdateTokens,
}

impl Topic {
	pub const ALL: [Topic; 10] = [
		Topic::PlatformStartBot,
		Topic::PlatformStopBot,
		Topic::PlatformGetBot,
		Topic::PlatformChatMessageSend,
		Topic::WebhookNotification,
		Topic::EventChatMessage,
		Topic::EventStreamOnline,
		Topic::EventStreamOffline,
		Topic::AuthProviderGet,
		Topic::AuthProviderUpdateTokens,
	];

	pub const fn domain(self) -> &'static str {
		match self {
			Topic::PlatformStartBot | Topic::PlatformStopBot | Topic::PlatformGetBot | Topic::PlatformChatMessageSend => {
				"platform"
			}
			Topic::WebhookNotification => "webhook",
			Topic::EventChatMessage | Topic::EventStreamOnline | Topic::EventStreamOffline => "event",
			Topic::AuthProviderGet | Topic::AuthProviderUpdateTokens => "auth",
		}
	}

	pub const fn verb(self) -> &'static str {
		match self {
			Topic::PlatformStartBot => "start_bot",
			Topic::PlatformStopBot => "stop_bot",
			Topic::PlatformGetBot => "get_bot",
			Topic::PlatformChatMessageSend => "chat_message_send",
			Topic::WebhookNotification => "notification",
			Topic::EventChatMessage => "chat_message",
			Topic::EventStreamOnline => "stream_online",
			Topic::EventStreamOffline => "stream_offline",
			Topic::AuthProviderGet => "provider_get",
			Topic::AuthProviderUpdateTokens => "provider_update_tokens",
		}
	}

	fn from_segments(domain: &str, verb: &str) -> Option<Topic> {
		Topic::ALL.into_iter().find(|t| t.domain() == domain && t.verb() == verb)
	}

	/// Start a subject/pattern for this topic.
	pub fn builder(self) -> TopicBuilder {
		TopicBuilder::new(self)
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{SEPARATOR}{}", self.domain(), self.verb())
	}
}

fn validate_segment(seg: &str) -> Result<(), TopicError> {
	if seg.is_empty() {
		return Err(TopicError::InvalidSegment(seg.to_string()));
	}
	if seg
		.chars()
		.any(|c| c == SEPARATOR || c == '*' || c == '>' || c.is_whitespace() || c.is_control())
	{
		return Err(TopicError::InvalidSegment(seg.to_string()));
	}
	Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
	Concrete(String),
	Any,
}

impl Segment {
	fn render(&self) -> &str {
		match self {
			Segment::Concrete(s) => s,
			Segment::Any => WILDCARD,
		}
	}
}

/// Builds subjects from typed segments: `<domain>.<verb>[.<platform>][.<entity>...]`.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
	topic: Topic,
	platform: Option<Segment>,
	entities: Vec<Segment>,
}

impl TopicBuilder {
	pub fn new(topic: Topic) -> Self {
		Self {
			topic,
			platform: None,
			entities: Vec::new(),
		}
	}

	pub fn platform(mut self, platform: Platform) -> Self {
		self.platform = Some(Segment::Concrete(platform.as_str().to_string()));
		self
	}

	pub fn any_platform(mut self) -> Self {
		self.platform = Some(Segment::Any);
		self
	}

	pub fn entity(mut self, id: impl Into<String>) -> Self {
		self.entities.push(Segment::Concrete(id.into()));
		self
	}

	pub fn any_entity(mut self) -> Self {
		self.entities.push(Segment::Any);
		self
	}

	fn render(&self) -> Result<(String, bool), TopicError> {
		let mut out = self.topic.to_string();
		let mut has_wildcard = false;

		for seg in self.platform.iter().chain(self.entities.iter()) {
			match seg {
				Segment::Concrete(s) => validate_segment(s)?,
				Segment::Any => has_wildcard = true,
			}
			out.push(SEPARATOR);
			out.push_str(seg.render());
		}

		Ok((out, has_wildcard))
	}

	/// Concrete subject for publishing. Fails if any segment is a wildcard.
	pub fn build_subject(&self) -> Result<Subject, TopicError> {
		let (s, has_wildcard) = self.render()?;
		if has_wildcard {
			return Err(TopicError::WildcardInSubject(s));
		}
		Ok(Subject(s))
	}

	/// Subscribe pattern; wildcards allowed.
	pub fn build_pattern(&self) -> Result<SubjectPattern, TopicError> {
		let (s, _) = self.render()?;
		Ok(SubjectPattern(s))
	}
}

/// Components of a parsed concrete subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectParts {
	pub topic: Topic,
	pub platform: Option<Platform>,
	pub entities: Vec<String>,
}

/// Concrete (wildcard-free) subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject(String);

impl Subject {
	/// Parse and validate a concrete subject string.
	pub fn parse(s: &str) -> Result<Self, TopicError> {
		let segments = split_segments(s)?;
		for seg in &segments {
			if *seg == WILDCARD {
				return Err(TopicError::WildcardInSubject(s.to_string()));
			}
			validate_segment(seg)?;
		}
		Ok(Self(s.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Break the subject back into its topic, platform and entity segments.
	pub fn parts(&self) -> Result<SubjectParts, TopicError> {
		let mut it = self.0.split(SEPARATOR);
		let domain = it.next().unwrap_or_default();
		let verb = it.next().unwrap_or_default();
		let topic = Topic::from_segments(domain, verb).ok_or_else(|| TopicError::UnknownTopic(self.0.clone()))?;

		let rest: Vec<&str> = it.collect();
		let (platform, entities) = match rest.split_first() {
			Some((first, tail)) => {
				let platform =
					Platform::from_str(first).map_err(|_| TopicError::UnknownPlatform((*first).to_string()))?;
				(Some(platform), tail.iter().map(|s| s.to_string()).collect())
			}
			None => (None, Vec::new()),
		};

		Ok(SubjectParts {
			topic,
			platform,
			entities,
		})
	}
}

impl fmt::Display for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Subject {
	type Err = TopicError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Subject::parse(s)
	}
}

/// Subscribe pattern; `*` matches exactly one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectPattern(String);

impl SubjectPattern {
	pub fn parse(s: &str) -> Result<Self, TopicError> {
		for seg in split_segments(s)? {
			if seg != WILDCARD {
				validate_segment(seg)?;
			}
		}
		Ok(Self(s.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn has_wildcard(&self) -> bool {
		self.0.split(SEPARATOR).any(|s| s == WILDCARD)
	}

	pub fn matches(&self, subject: &str) -> bool {
		let mut pattern = self.0.split(SEPARATOR);
		let mut subject = subject.split(SEPARATOR);
		loop {
			match (pattern.next(), subject.next()) {
				(None, None) => return true,
				(Some(p), Some(s)) if p == WILDCARD || p == s => continue,
				_ => return false,
			}
		}
	}
}

impl From<Subject> for SubjectPattern {
	fn from(s: Subject) -> Self {
		Self(s.0)
	}
}

impl fmt::Display for SubjectPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

fn split_segments(s: &str) -> Result<Vec<&str>, TopicError> {
	if s.trim().is_empty() {
		return Err(TopicError::Empty);
	}
	let segments: Vec<&str> = s.split(SEPARATOR).collect();
	if segments.iter().any(|seg| seg.is_empty()) {
		return Err(TopicError::EmptySegment(s.to_string()));
	}
	Ok(segments)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_rpc_subjects() {
		let s = Topic::PlatformStartBot
			.builder()
			.platform(Platform::Twitch)
			.build_subject()
			.unwrap();
		assert_eq!(s.as_str(), "platform.start_bot.twitch");
	}

	#[test]
	fn builds_auth_subject_without_platform() {
		let s = Topic::AuthProviderGet.builder().build_subject().unwrap();
		assert_eq!(s.as_str(), "auth.provider_get");
	}

	#[test]
	fn wildcard_only_on_patterns() {
		let b = Topic::EventChatMessage.builder().platform(Platform::Twitch).any_entity();
		assert!(matches!(b.build_subject(), Err(TopicError::WildcardInSubject(_))));
		assert_eq!(b.build_pattern().unwrap().as_str(), "event.chat_message.twitch.*");
	}

	#[test]
	fn rejects_bad_entity_segments() {
		for bad in ["", "a.b", "has space", "x*", ">"] {
			let r = Topic::EventChatMessage
				.builder()
				.platform(Platform::Twitch)
				.entity(bad)
				.build_subject();
			assert!(matches!(r, Err(TopicError::InvalidSegment(_))), "segment {bad:?} should fail");
		}
	}

	#[test]
	fn pattern_matching_is_per_segment() {
		let p = SubjectPattern::parse("event.chat_message.twitch.*").unwrap();
		assert!(p.matches("event.chat_message.twitch.123"));
		assert!(!p.matches("event.chat_message.twitch"));
		assert!(!p.matches("event.chat_message.twitch.123.extra"));
		assert!(!p.matches("event.stream_online.twitch.123"));
	}

	#[test]
	fn subject_parse_rejects_wildcards_and_empty_segments() {
		assert!(matches!(Subject::parse("a.*.b"), Err(TopicError::WildcardInSubject(_))));
		assert!(matches!(Subject::parse("a..b"), Err(TopicError::EmptySegment(_))));
		assert!(matches!(Subject::parse("  "), Err(TopicError::Empty)));
	}

	#[test]
	fn parts_of_unknown_topic() {
		let s = Subject::parse("foo.bar.twitch").unwrap();
		assert!(matches!(s.parts(), Err(TopicError::UnknownTopic(_))));
	}
}
