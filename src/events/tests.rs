use super::*;
use crate::transport::{
    ContextInfo, ExtendedTextMessage, MediaMessage, MessageContent, MessageKey,
};
use std::sync::Mutex;

fn raw(id: &str, jid: &str, content: Option<MessageContent>) -> RawMessage {
    RawMessage {
        key: MessageKey {
            id: id.to_string(),
            remote_jid: jid.to_string(),
            from_me: false,
            participant: None,
        },
        timestamp: 1_700_000_000,
        push_name: Some("Tester".to_string()),
        content,
    }
}

fn text_content(text: &str) -> MessageContent {
    MessageContent {
        conversation: Some(text.to_string()),
        ..MessageContent::default()
    }
}

// --- extract_text precedence ---

#[test]
fn test_conversation_text_wins() {
    let content = MessageContent {
        conversation: Some("plain".to_string()),
        extended_text: Some(ExtendedTextMessage {
            text: Some("extended".to_string()),
            context_info: None,
        }),
        image: Some(MediaMessage {
            caption: Some("img".to_string()),
            ..MediaMessage::default()
        }),
        video: Some(MediaMessage {
            caption: Some("vid".to_string()),
            ..MediaMessage::default()
        }),
    };
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", Some(content))), "plain");
}

#[test]
fn test_extended_text_beats_captions() {
    let content = MessageContent {
        extended_text: Some(ExtendedTextMessage {
            text: Some("extended".to_string()),
            context_info: None,
        }),
        image: Some(MediaMessage {
            caption: Some("img".to_string()),
            ..MediaMessage::default()
        }),
        ..MessageContent::default()
    };
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", Some(content))), "extended");
}

#[test]
fn test_image_caption_only() {
    // Only an image caption present: the text is that caption, with the
    // video caption ignored by precedence.
    let content = MessageContent {
        image: Some(MediaMessage {
            caption: Some("a sunset".to_string()),
            ..MediaMessage::default()
        }),
        video: Some(MediaMessage {
            caption: Some("ignored".to_string()),
            ..MediaMessage::default()
        }),
        ..MessageContent::default()
    };
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", Some(content))), "a sunset");
}

#[test]
fn test_video_caption_last_resort() {
    let content = MessageContent {
        video: Some(MediaMessage {
            caption: Some("clip".to_string()),
            ..MediaMessage::default()
        }),
        ..MessageContent::default()
    };
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", Some(content))), "clip");
}

#[test]
fn test_no_text_anywhere_yields_empty() {
    let content = MessageContent::default();
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", Some(content))), "");
    assert_eq!(extract_text(&raw("1", "x@s.whatsapp.net", None)), "");
}

// --- normalize ---

#[test]
fn test_normalize_skips_content_less_message() {
    assert!(normalize(&raw("1", "x@s.whatsapp.net", None)).is_none());
}

#[test]
fn test_normalize_basic_fields() {
    let m = normalize(&raw("MSG1", "15551234567@s.whatsapp.net", Some(text_content("hi"))))
        .unwrap();
    assert_eq!(m.id, "MSG1");
    assert_eq!(m.chat_id, "15551234567@s.whatsapp.net");
    assert!(!m.from_me);
    assert_eq!(m.push_name, "Tester");
    assert_eq!(m.text, "hi");
    assert_eq!(m.timestamp.timestamp(), 1_700_000_000);
    assert!(!m.is_group);
    assert!(!m.is_newsletter);
}

#[test]
fn test_normalize_group_and_newsletter_flags() {
    let group = normalize(&raw("1", "123-456@g.us", Some(text_content("x")))).unwrap();
    assert!(group.is_group);
    assert!(!group.is_newsletter);

    let newsletter = normalize(&raw("1", "789@newsletter", Some(text_content("x")))).unwrap();
    assert!(newsletter.is_newsletter);
    assert!(!newsletter.is_group);
}

#[test]
fn test_normalize_author_prefers_participant() {
    let mut message = raw("1", "123-456@g.us", Some(text_content("x")));
    message.key.participant = Some("15551234567@s.whatsapp.net".to_string());
    let m = normalize(&message).unwrap();
    assert_eq!(m.author, "15551234567@s.whatsapp.net");
}

#[test]
fn test_normalize_author_strips_device_suffix() {
    let m = normalize(&raw("1", "15551234567:12@s.whatsapp.net", Some(text_content("x"))))
        .unwrap();
    assert_eq!(m.author, "15551234567");
}

#[test]
fn test_normalize_quoted_summary() {
    let quoted = MessageContent {
        conversation: Some("original text".to_string()),
        ..MessageContent::default()
    };
    let content = MessageContent {
        extended_text: Some(ExtendedTextMessage {
            text: Some("a reply".to_string()),
            context_info: Some(ContextInfo {
                quoted_message: Some(Box::new(quoted)),
                participant: Some("15550000000@s.whatsapp.net".to_string()),
                mentioned_jid: vec![],
            }),
        }),
        ..MessageContent::default()
    };
    let m = normalize(&raw("1", "123-456@g.us", Some(content))).unwrap();
    let quoted = m.quoted.unwrap();
    assert_eq!(quoted.text, "original text");
    assert_eq!(quoted.chat_id, "123-456@g.us");
    assert_eq!(quoted.participant.as_deref(), Some("15550000000@s.whatsapp.net"));
}

#[test]
fn test_normalize_quoted_extended_text_fallback() {
    let quoted = MessageContent {
        extended_text: Some(ExtendedTextMessage {
            text: Some("quoted extended".to_string()),
            context_info: None,
        }),
        ..MessageContent::default()
    };
    let content = MessageContent {
        extended_text: Some(ExtendedTextMessage {
            text: Some("reply".to_string()),
            context_info: Some(ContextInfo {
                quoted_message: Some(Box::new(quoted)),
                participant: None,
                mentioned_jid: vec![],
            }),
        }),
        ..MessageContent::default()
    };
    let m = normalize(&raw("1", "x@s.whatsapp.net", Some(content))).unwrap();
    assert_eq!(m.quoted.unwrap().text, "quoted extended");
}

#[test]
fn test_normalize_mentions() {
    let content = MessageContent {
        extended_text: Some(ExtendedTextMessage {
            text: Some("hey @a @b".to_string()),
            context_info: Some(ContextInfo {
                quoted_message: None,
                participant: None,
                mentioned_jid: vec![
                    "a@s.whatsapp.net".to_string(),
                    "b@s.whatsapp.net".to_string(),
                ],
            }),
        }),
        ..MessageContent::default()
    };
    let m = normalize(&raw("1", "123-456@g.us", Some(content))).unwrap();
    assert_eq!(m.mentioned_jids.len(), 2);
    assert_eq!(m.mentioned_jids[0], "a@s.whatsapp.net");
}

// --- dispatch_batch ---

struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, String)>>,
    fail_on: Option<String>,
}

impl RecordingHandler {
    fn new(fail_on: Option<&str>) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            fail_on: fail_on.map(ToString::to_string),
        }
    }
}

#[async_trait]
impl SessionEventHandler for RecordingHandler {
    async fn on_message(
        &self,
        message: NormalizedMessage,
        _raw: RawMessage,
    ) -> anyhow::Result<()> {
        if self.fail_on.as_deref() == Some(message.id.as_str()) {
            anyhow::bail!("handler exploded");
        }
        self.seen.lock().unwrap().push(message.id);
        Ok(())
    }

    async fn on_error(&self, error: &SocketonError, context: ErrorContext) {
        if let ErrorContext::MessageHandler { message_id } = context {
            self.errors
                .lock()
                .unwrap()
                .push((error.to_string(), message_id));
        }
    }
}

#[tokio::test]
async fn test_dispatch_processes_batch_in_order() {
    let handler = RecordingHandler::new(None);
    let batch = vec![
        raw("1", "x@s.whatsapp.net", Some(text_content("a"))),
        raw("2", "x@s.whatsapp.net", Some(text_content("b"))),
        raw("3", "x@s.whatsapp.net", Some(text_content("c"))),
    ];
    dispatch_batch(&handler, batch).await;
    assert_eq!(*handler.seen.lock().unwrap(), vec!["1", "2", "3"]);
    assert!(handler.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dispatch_skips_content_less_messages() {
    let handler = RecordingHandler::new(None);
    let batch = vec![
        raw("1", "x@s.whatsapp.net", None),
        raw("2", "x@s.whatsapp.net", Some(text_content("b"))),
    ];
    dispatch_batch(&handler, batch).await;
    assert_eq!(*handler.seen.lock().unwrap(), vec!["2"]);
}

#[tokio::test]
async fn test_handler_failure_does_not_stop_batch() {
    let handler = RecordingHandler::new(Some("2"));
    let batch = vec![
        raw("1", "x@s.whatsapp.net", Some(text_content("a"))),
        raw("2", "x@s.whatsapp.net", Some(text_content("b"))),
        raw("3", "x@s.whatsapp.net", Some(text_content("c"))),
    ];
    dispatch_batch(&handler, batch).await;

    assert_eq!(*handler.seen.lock().unwrap(), vec!["1", "3"]);
    let errors = handler.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].1, "2");
    assert!(errors[0].0.contains("handler exploded"));
}
