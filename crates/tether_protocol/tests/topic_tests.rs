use proptest::prelude::*;
use tether_domain::Platform;
use tether_protocol::{Subject, SubjectPattern, Topic, TopicError};

#[test]
fn every_topic_parses_back() {
	for topic in Topic::ALL {
		let subject = topic.builder().platform(Platform::Twitch).build_subject().expect("build");
		let parts = subject.parts().expect("parts");
		assert_eq!(parts.topic, topic);
		assert_eq!(parts.platform, Some(Platform::Twitch));
		assert!(parts.entities.is_empty());
	}
}

#[test]
fn unknown_platform_segment_is_reported() {
	let s = Subject::parse("platform.start_bot.kick").expect("syntactically valid");
	assert_eq!(s.parts(), Err(TopicError::UnknownPlatform("kick".to_string())));
}

#[test]
fn any_platform_pattern_matches_twitch_subject() {
	let pattern = Topic::PlatformGetBot.builder().any_platform().build_pattern().unwrap();
	let subject = Topic::PlatformGetBot.builder().platform(Platform::Twitch).build_subject().unwrap();
	assert!(pattern.has_wildcard());
	assert!(pattern.matches(subject.as_str()));
}

#[test]
fn concrete_subject_converts_to_exact_pattern() {
	let subject = Topic::PlatformStopBot.builder().platform(Platform::Twitch).build_subject().unwrap();
	let pattern = SubjectPattern::from(subject.clone());
	assert!(!pattern.has_wildcard());
	assert!(pattern.matches(subject.as_str()));
	assert!(!pattern.matches("platform.start_bot.twitch"));
}

proptest! {
	#[test]
	fn entity_subjects_roundtrip(id in "[a-z0-9_-]{1,24}") {
		let subject = Topic::EventChatMessage
			.builder()
			.platform(Platform::Twitch)
			.entity(id.clone())
			.build_subject()
			.unwrap();

		let reparsed = Subject::parse(subject.as_str()).unwrap();
		let parts = reparsed.parts().unwrap();
		prop_assert_eq!(parts.topic, Topic::EventChatMessage);
		prop_assert_eq!(parts.entities, vec![id]);

		let pattern = Topic::EventChatMessage.builder().platform(Platform::Twitch).any_entity().build_pattern().unwrap();
		prop_assert!(pattern.matches(subject.as_str()));
	}
}
