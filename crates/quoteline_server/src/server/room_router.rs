#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use quoteline_domain::RoomKey;
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::events::{Outbox, RoomEvent, SessionId};

/// Room membership index. Fans events out to member outboxes.
#[derive(Debug, Default)]
pub struct RoomRouter {
	rooms: DashMap<RoomKey, HashMap<SessionId, Outbox>>,
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
	pub delivered: usize,

	/// Members whose outbox was full. The caller decides what to do with them.
	pub overflowed: Vec<SessionId>,

	/// Members whose receiver is already gone.
	pub closed: Vec<SessionId>,
}

impl BroadcastReport {
	pub fn failed(&self) -> impl Iterator<Item = SessionId> + '_ {
		self.overflowed.iter().chain(self.closed.iter()).copied()
	}
}

impl RoomRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add `session` to `room`. Returns false if it was already a member.
	pub fn join(&self, room: RoomKey, session: SessionId, outbox: Outbox) -> bool {
		let mut members = self.rooms.entry(room).or_default();
		members.insert(session, outbox).is_none()
	}

	/// Remove `session` from `room`; the room entry is dropped once empty.
	pub fn leave(&self, room: &RoomKey, session: SessionId) -> bool {
		let removed = match self.rooms.get_mut(room) {
			Some(mut members) => members.remove(&session).is_some(),
			None => return false,
		};

		self.rooms.remove_if(room, |_, members| members.is_empty());
		removed
	}

	/// Deliver `event` to every member of `event.room`. Never blocks.
	pub fn broadcast(&self, event: Arc<RoomEvent>) -> BroadcastReport {
		let mut report = BroadcastReport::default();

		let Some(members) = self.rooms.get(&event.room) else {
			return report;
		};

		for (session, outbox) in members.iter() {
			match outbox.try_send(Arc::clone(&event)) {
				Ok(()) => report.delivered += 1,
				Err(mpsc::error::TrySendError::Full(_)) => report.overflowed.push(*session),
				Err(mpsc::error::TrySendError::Closed(_)) => report.closed.push(*session),
			}
		}
		drop(members);

		if !report.overflowed.is_empty() {
			debug!(
				room = %event.room,
				kind = event.kind(),
				overflowed = report.overflowed.len(),
				"room router: member outbox full"
			);
		}

		report
	}

	pub fn member_count(&self, room: &RoomKey) -> usize {
		self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
	}

	pub fn is_member(&self, room: &RoomKey, session: SessionId) -> bool {
		self.rooms.get(room).is_some_and(|m| m.contains_key(&session))
	}

	pub fn members(&self, room: &RoomKey) -> Vec<SessionId> {
		let mut out: Vec<SessionId> = self
			.rooms
			.get(room)
			.map(|m| m.keys().copied().collect())
			.unwrap_or_default();
		out.sort();
		out
	}

	/// Number of non-empty rooms.
	pub fn room_count(&self) -> usize {
		self.rooms.len()
	}
}
