//! Structured messages and the append-only communication history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consensus::AgentId;
use crate::edrr::Phase;

/// Message priority. Higher priorities are processed first within a round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Critique,
    Review,
    Decision,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::Notification => write!(f, "notification"),
            Self::Critique => write!(f, "critique"),
            Self::Review => write!(f, "review"),
            Self::Decision => write!(f, "decision"),
        }
    }
}

/// Addressee of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(AgentId),
    /// Every agent except the sender.
    Broadcast,
}

impl Recipient {
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }
}

/// Origin tag for messages the team itself emits.
pub const TEAM_SENDER: &str = "team";

/// A delivered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Position in the communication history.
    pub seq: u64,
    pub sender: AgentId,
    /// Resolved recipients; a broadcast is expanded at send time.
    pub recipients: Vec<AgentId>,
    pub broadcast: bool,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub payload: Value,
    pub cycle_id: Option<String>,
    pub phase: Option<Phase>,
    pub sent_at: DateTime<Utc>,
}

/// Outgoing message before the team assigns identity and resolves recipients.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: AgentId,
    pub to: Recipient,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub payload: Value,
    pub cycle_id: Option<String>,
    pub phase: Option<Phase>,
}

impl Envelope {
    pub fn new(sender: &str, to: Recipient, message_type: MessageType, payload: Value) -> Self {
        Self {
            sender: sender.to_string(),
            to,
            message_type,
            priority: MessagePriority::Normal,
            payload,
            cycle_id: None,
            phase: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_scope(mut self, cycle_id: &str, phase: Phase) -> Self {
        self.cycle_id = Some(cycle_id.to_string());
        self.phase = Some(phase);
        self
    }
}

/// Query over the communication history. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender: Option<AgentId>,
    pub recipient: Option<AgentId>,
    pub message_type: Option<MessageType>,
    pub cycle_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, id: &str) -> Self {
        self.sender = Some(id.to_string());
        self
    }

    pub fn recipient(mut self, id: &str) -> Self {
        self.recipient = Some(id.to_string());
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn cycle(mut self, cycle_id: &str) -> Self {
        self.cycle_id = Some(cycle_id.to_string());
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.sender.as_ref().map_or(true, |s| &message.sender == s)
            && self
                .recipient
                .as_ref()
                .map_or(true, |r| message.recipients.contains(r))
            && self
                .message_type
                .map_or(true, |t| message.message_type == t)
            && self
                .cycle_id
                .as_ref()
                .map_or(true, |c| message.cycle_id.as_ref() == Some(c))
            && self.since.map_or(true, |t| message.sent_at >= t)
            && self.until.map_or(true, |t| message.sent_at <= t)
    }
}

/// Append-only log of every message sent through the team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationHistory {
    messages: Vec<Message>,
}

impl CommunicationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next message will receive.
    pub fn next_seq(&self) -> u64 {
        self.messages.len() as u64
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn query(&self, filter: &MessageFilter) -> Vec<&Message> {
        self.messages.iter().filter(|m| filter.matches(m)).collect()
    }

    /// Messages of one cycle phase, for persistence.
    pub fn for_phase(&self, cycle_id: &str, phase: Phase) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.cycle_id.as_deref() == Some(cycle_id) && m.phase == Some(phase))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Order messages for processing: priority first, then arrival.
pub fn processing_order(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(seq: u64, sender: &str, to: &[&str], priority: MessagePriority) -> Message {
        Message {
            id: format!("m{}", seq),
            seq,
            sender: sender.to_string(),
            recipients: to.iter().map(|s| s.to_string()).collect(),
            broadcast: false,
            message_type: MessageType::Notification,
            priority,
            payload: json!({}),
            cycle_id: Some("c1".into()),
            phase: Some(Phase::Expand),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_processing_order_by_priority_then_seq() {
        let mut batch = vec![
            message(0, "a", &["b"], MessagePriority::Low),
            message(1, "a", &["b"], MessagePriority::Critical),
            message(2, "a", &["b"], MessagePriority::Normal),
            message(3, "a", &["b"], MessagePriority::Critical),
        ];
        processing_order(&mut batch);
        let seqs: Vec<u64> = batch.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_filter_by_sender_recipient_and_type() {
        let mut history = CommunicationHistory::new();
        history.append(message(0, "a", &["b"], MessagePriority::Normal));
        history.append(message(1, "b", &["a", "c"], MessagePriority::Normal));
        let mut review = message(2, "c", &["a"], MessagePriority::High);
        review.message_type = MessageType::Review;
        history.append(review);

        assert_eq!(history.query(&MessageFilter::new().sender("b")).len(), 1);
        assert_eq!(history.query(&MessageFilter::new().recipient("a")).len(), 2);
        assert_eq!(
            history
                .query(&MessageFilter::new().message_type(MessageType::Review))
                .len(),
            1
        );
        assert_eq!(history.query(&MessageFilter::new()).len(), 3);
    }

    #[test]
    fn test_filter_by_time_range() {
        let mut history = CommunicationHistory::new();
        let mut old = message(0, "a", &["b"], MessagePriority::Normal);
        old.sent_at = Utc::now() - chrono::Duration::hours(2);
        history.append(old);
        history.append(message(1, "a", &["b"], MessagePriority::Normal));

        let since = Utc::now() - chrono::Duration::minutes(5);
        let recent = history.query(&MessageFilter::new().between(since, Utc::now()));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].seq, 1);
    }

    #[test]
    fn test_for_phase() {
        let mut history = CommunicationHistory::new();
        history.append(message(0, "a", &["b"], MessagePriority::Normal));
        let mut other = message(1, "a", &["b"], MessagePriority::Normal);
        other.phase = Some(Phase::Refine);
        history.append(other);
        assert_eq!(history.for_phase("c1", Phase::Expand).len(), 1);
        assert_eq!(history.for_phase("c2", Phase::Expand).len(), 0);
    }
}
