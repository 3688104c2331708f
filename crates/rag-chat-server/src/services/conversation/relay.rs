use tokio::sync::mpsc;
use tracing::debug;

use crate::models::chat::ChatStreamEvent;

/// Forwards events to an optional caller and accumulates the answer text.
///
/// Once the caller goes away the relay keeps accumulating, so the exchange
/// can still be committed in full.
pub struct Relay {
    sender: Option<mpsc::Sender<ChatStreamEvent>>,
    text: String,
}

impl Relay {
    /// No caller: text is only accumulated.
    pub fn buffered() -> Self {
        Self {
            sender: None,
            text: String::new(),
        }
    }

    pub fn streaming(sender: mpsc::Sender<ChatStreamEvent>) -> Self {
        Self {
            sender: Some(sender),
            text: String::new(),
        }
    }

    pub async fn emit(&mut self, event: ChatStreamEvent) {
        let text = event.text().map(str::to_owned);

        if let Some(sender) = &self.sender {
            if sender.send(event).await.is_err() {
                debug!("Stream receiver dropped, continuing without caller");
                self.sender = None;
            }
        }

        if let Some(text) = text {
            self.text.push_str(&text);
        }
    }

    pub async fn token(&mut self, delta: impl Into<String>) {
        self.emit(ChatStreamEvent::Token {
            delta: delta.into(),
        })
        .await;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_attached(&self) -> bool {
        self.sender.is_some()
    }
}
