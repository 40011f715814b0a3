use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub color: String,
    pub title: String,
    pub text: String,
}

/// One piece of a message to post. Options are applied in order; a later
/// option replaces the field an earlier one set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOption {
    Text { text: String, escape: bool },
    Attachments(Vec<Attachment>),
    Blocks(Vec<Block>),
}

impl MessageOption {
    pub fn text(text: impl Into<String>, escape: bool) -> Self {
        Self::Text { text: text.into(), escape }
    }
}

/// Handler output: the options handed to the message poster.
pub type Output = Vec<MessageOption>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn into_output(self) -> Output {
        vec![MessageOption::text(self.fallback_text, false), MessageOption::Blocks(self.blocks)]
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Output of a routing miss: a single red attachment listing the verbs the
/// router knows about.
pub fn invalid_command_message(verbs: &[String]) -> Output {
    vec![MessageOption::Attachments(vec![Attachment {
        color: "bad".to_owned(),
        title: "invalid command".to_owned(),
        text: format!("supported commands: {}", verbs.join(", ")),
    }])]
}

/// Body of a `chat.postMessage` call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PostMessage {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl PostMessage {
    pub fn render(channel: &str, options: &[MessageOption]) -> Self {
        let mut message = Self { channel: channel.to_owned(), ..Self::default() };
        for option in options {
            match option {
                MessageOption::Text { text, escape } => {
                    message.text =
                        Some(if *escape { escape_text(text) } else { text.clone() });
                }
                MessageOption::Attachments(attachments) => {
                    message.attachments = attachments.clone();
                }
                MessageOption::Blocks(blocks) => message.blocks = blocks.clone(),
            }
        }
        message
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        invalid_command_message, Block, MessageBuilder, MessageOption, PostMessage, TextObject,
    };

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .section("status.summary.v1", |section| {
                section.mrkdwn("*Connected*");
            })
            .context("status.context.v1", |context| {
                context.plain("since boot");
            })
            .build();

        assert_eq!(message.blocks.len(), 2);
        assert!(matches!(
            &message.blocks[0],
            Block::Section {
                block_id,
                text: TextObject::Mrkdwn { .. }
            } if block_id == "status.summary.v1"
        ));
        assert!(matches!(
            &message.blocks[1],
            Block::Context { elements, .. } if elements.len() == 1
        ));
    }

    #[test]
    fn invalid_command_renders_as_bad_attachment() {
        let options = invalid_command_message(&["bar".to_owned(), "foo".to_owned()]);
        let body = serde_json::to_value(PostMessage::render("C1", &options)).expect("serialize");

        assert_eq!(
            body,
            json!({
                "channel": "C1",
                "attachments": [{
                    "color": "bad",
                    "title": "invalid command",
                    "text": "supported commands: bar, foo"
                }]
            })
        );
    }

    #[test]
    fn escaped_text_encodes_control_characters() {
        let body = PostMessage::render("C1", &[MessageOption::text("a < b & c", true)]);
        assert_eq!(body.text.as_deref(), Some("a &lt; b &amp; c"));

        let raw = PostMessage::render("C1", &[MessageOption::text("<@U1>", false)]);
        assert_eq!(raw.text.as_deref(), Some("<@U1>"));
    }

    #[test]
    fn later_options_replace_earlier_ones() {
        let body = PostMessage::render(
            "C1",
            &[MessageOption::text("first", false), MessageOption::text("second", false)],
        );
        assert_eq!(body.text.as_deref(), Some("second"));
    }

    #[test]
    fn template_output_carries_fallback_and_blocks() {
        let template = MessageBuilder::new("pong")
            .section("ping.v1", |section| {
                section.plain("pong");
            })
            .build();

        let body = serde_json::to_value(PostMessage::render("C9", &template.into_output()))
            .expect("serialize");
        assert_eq!(body["text"], "pong");
        assert_eq!(body["blocks"][0]["type"], "section");
        assert_eq!(body["blocks"][0]["text"]["type"], "plain_text");
    }
}
