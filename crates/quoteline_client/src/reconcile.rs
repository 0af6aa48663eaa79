#![forbid(unsafe_code)]

//! Local message list that merges optimistic sends with server echoes.
//!
//! Every entry is identified by its natural key `(sender, text, sent_at_ms)`.
//! A message the client appended before the server confirmed it, the
//! broadcast of that same message, and any copy that comes back through a
//! snapshot after a reconnect all collapse into one entry.

use std::collections::HashMap;

use quoteline_domain::{ChannelScope, ChatMessage, CustomerId, MessageKey, Sender, ServerMessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
	pub key: MessageKey,
	/// Set once the server has stored the message.
	pub server_id: Option<ServerMessageId>,
}

impl LogEntry {
	pub fn is_pending(&self) -> bool {
		self.server_id.is_none()
	}
}

/// Outcome of merging one server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
	/// Not seen before; appended.
	Inserted,
	/// Matched a pending optimistic entry, which is now confirmed.
	Confirmed,
	/// Already confirmed; nothing changed.
	Duplicate,
	/// Belongs to another conversation; ignored.
	OtherChannel,
}

/// Messages of one conversation, ordered by `sent_at_ms`.
#[derive(Debug, Clone)]
pub struct MessageLog {
	customer_id: CustomerId,
	scope: ChannelScope,
	entries: Vec<LogEntry>,
	index: HashMap<MessageKey, ServerState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
	Pending,
	Confirmed,
}

impl MessageLog {
	pub fn new(customer_id: CustomerId, scope: ChannelScope) -> Self {
		Self {
			customer_id,
			scope,
			entries: Vec::new(),
			index: HashMap::new(),
		}
	}

	pub fn customer_id(&self) -> &CustomerId {
		&self.customer_id
	}

	pub fn scope(&self) -> &ChannelScope {
		&self.scope
	}

	pub fn entries(&self) -> &[LogEntry] {
		&self.entries
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn pending(&self) -> impl Iterator<Item = &LogEntry> {
		self.entries.iter().filter(|e| e.is_pending())
	}

	/// Latest `sent_at_ms` among confirmed entries; the `since` value for a
	/// resync snapshot.
	pub fn confirmed_watermark(&self) -> i64 {
		self.entries
			.iter()
			.filter(|e| !e.is_pending())
			.map(|e| e.key.sent_at_ms)
			.max()
			.unwrap_or(0)
	}

	/// Append a message the user just sent. Returns false if an entry with
	/// the same key already exists.
	pub fn insert_optimistic(&mut self, sender: Sender, text: impl Into<String>, sent_at_ms: i64) -> bool {
		let key = MessageKey {
			sender,
			text: text.into(),
			sent_at_ms,
		};
		if self.index.contains_key(&key) {
			return false;
		}

		self.index.insert(key.clone(), ServerState::Pending);
		self.insert_sorted(LogEntry { key, server_id: None });
		true
	}

	/// Merge a message received from the server (ack, broadcast or snapshot).
	pub fn apply_confirmed(&mut self, message: &ChatMessage) -> Applied {
		if message.customer_id != self.customer_id || message.scope != self.scope {
			return Applied::OtherChannel;
		}

		let key = message.natural_key();
		match self.index.get(&key).copied() {
			Some(ServerState::Confirmed) => Applied::Duplicate,
			Some(ServerState::Pending) => {
				if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
					entry.server_id = Some(message.id);
				}
				self.index.insert(key, ServerState::Confirmed);
				Applied::Confirmed
			}
			None => {
				self.index.insert(key.clone(), ServerState::Confirmed);
				self.insert_sorted(LogEntry {
					key,
					server_id: Some(message.id),
				});
				Applied::Inserted
			}
		}
	}

	/// Merge a snapshot after reconnecting. Returns how many entries were new.
	pub fn resync<'a>(&mut self, messages: impl IntoIterator<Item = &'a ChatMessage>) -> usize {
		messages
			.into_iter()
			.filter(|m| self.apply_confirmed(m) == Applied::Inserted)
			.count()
	}

	/// Drop a pending entry whose send failed. Confirmed entries stay.
	pub fn discard_pending(&mut self, key: &MessageKey) -> bool {
		if self.index.get(key) != Some(&ServerState::Pending) {
			return false;
		}
		self.index.remove(key);
		self.entries.retain(|e| &e.key != key);
		true
	}

	fn insert_sorted(&mut self, entry: LogEntry) {
		// Equal timestamps keep arrival order.
		let at = self
			.entries
			.partition_point(|e| e.key.sent_at_ms <= entry.key.sent_at_ms);
		self.entries.insert(at, entry);
	}
}
