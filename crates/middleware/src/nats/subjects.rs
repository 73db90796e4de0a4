use std::borrow::Cow;
use std::sync::Arc;

/// Replace characters NATS treats specially inside a subject token.
///
/// `.` separates tokens, `*` and `>` are wildcards and whitespace is illegal.
/// Returns the input unchanged (no allocation) when it is already safe.
pub fn sanitize_subject_token(token: &str) -> Cow<'_, str> {
    let needs_fix = token.is_empty()
        || token
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if !needs_fix {
        return Cow::Borrowed(token);
    }
    if token.is_empty() {
        return Cow::Borrowed("_");
    }
    Cow::Owned(
        token
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect(),
    )
}

/// Subject for a record on `topic` with an optional partition key
pub fn keyed_subject(topic: &str, key: Option<&[u8]>) -> String {
    match key {
        Some(key) if !key.is_empty() => {
            let key = String::from_utf8_lossy(key);
            format!("{}.{}", topic, sanitize_subject_token(&key))
        }
        _ => topic.to_string(),
    }
}

/// Subject layout for one destination topic backed by a JetStream stream.
///
/// Keyed records are published to `{topic}.{key}` so consumers can partition on
/// the last token; unkeyed records go to `{topic}` itself.
#[derive(Debug, Clone)]
pub struct TopicSubjects {
    topic: Arc<str>,
    wildcard: Arc<str>,
    stream_name: Arc<str>,
}

impl TopicSubjects {
    /// Stream name defaults to the topic upper-cased with `.` replaced by `_`
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let stream_name = topic.replace('.', "_").to_uppercase();
        Self::with_stream(topic, stream_name)
    }

    pub fn with_stream(topic: impl Into<String>, stream_name: impl Into<String>) -> Self {
        let topic = topic.into();
        let stream_name: String = stream_name.into();
        Self {
            wildcard: format!("{}.>", topic).into(),
            stream_name: stream_name.into(),
            topic: topic.into(),
        }
    }

    /// Subject for a record with the given partition key
    pub fn subject(&self, key: Option<&[u8]>) -> String {
        keyed_subject(&self.topic, key)
    }

    /// Subjects the backing stream must capture
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![self.topic.to_string(), self.wildcard.to_string()]
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}
