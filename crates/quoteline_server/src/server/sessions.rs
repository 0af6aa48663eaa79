#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use quoteline_domain::{Identity, RoomKey};
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::error::HubError;
use crate::server::events::{Outbox, RoomEvent, SessionId};
use crate::server::room_router::RoomRouter;

#[derive(Debug)]
struct SessionEntry {
	identity: Identity,
	rooms: HashSet<RoomKey>,
	outbox: Outbox,
}

/// Live sessions and their room memberships.
///
/// Membership changes for one session happen under that session's entry, so
/// a join racing a disconnect either lands before the removal (and is undone
/// by it) or fails.
#[derive(Debug)]
pub struct SessionRegistry {
	sessions: DashMap<SessionId, SessionEntry>,
	router: Arc<RoomRouter>,
	next_id: AtomicU64,
	queue_capacity: usize,
}

impl SessionRegistry {
	pub fn new(router: Arc<RoomRouter>, queue_capacity: usize) -> Self {
		Self {
			sessions: DashMap::new(),
			router,
			next_id: AtomicU64::new(1),
			queue_capacity: queue_capacity.max(1),
		}
	}

	pub fn router(&self) -> &Arc<RoomRouter> {
		&self.router
	}

	/// Create a session. The receiver ends once the session is disconnected.
	pub fn register(&self, identity: Identity) -> (SessionId, mpsc::Receiver<Arc<RoomEvent>>) {
		let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let (outbox, rx) = mpsc::channel(self.queue_capacity);

		debug!(session_id = %id, user_id = %identity.id, role = %identity.role, "session registered");
		self.sessions.insert(
			id,
			SessionEntry {
				identity,
				rooms: HashSet::new(),
				outbox,
			},
		);

		(id, rx)
	}

	/// Returns true when the session was not already in `room`.
	pub fn join_room(&self, id: SessionId, room: RoomKey) -> Result<bool, HubError> {
		let mut entry = self.sessions.get_mut(&id).ok_or(HubError::SessionClosed)?;
		let newly = entry.rooms.insert(room.clone());
		self.router.join(room, id, entry.outbox.clone());
		Ok(newly)
	}

	/// Returns true when the session was a member of `room`.
	pub fn leave_room(&self, id: SessionId, room: &RoomKey) -> Result<bool, HubError> {
		let mut entry = self.sessions.get_mut(&id).ok_or(HubError::SessionClosed)?;
		let was_member = entry.rooms.remove(room);
		self.router.leave(room, id);
		Ok(was_member)
	}

	/// Remove the session and every membership it holds.
	///
	/// Returns the rooms it was in; `None` if it was already gone.
	pub fn disconnect(&self, id: SessionId) -> Option<Vec<RoomKey>> {
		let (_, entry) = self.sessions.remove(&id)?;

		let mut rooms: Vec<RoomKey> = entry.rooms.into_iter().collect();
		for room in &rooms {
			self.router.leave(room, id);
		}
		rooms.sort_by_key(ToString::to_string);

		debug!(session_id = %id, rooms = rooms.len(), "session disconnected");
		Some(rooms)
	}

	pub fn identity(&self, id: SessionId) -> Option<Identity> {
		self.sessions.get(&id).map(|e| e.identity.clone())
	}

	pub fn rooms(&self, id: SessionId) -> Vec<RoomKey> {
		let mut out: Vec<RoomKey> = self
			.sessions
			.get(&id)
			.map(|e| e.rooms.iter().cloned().collect())
			.unwrap_or_default();
		out.sort_by_key(ToString::to_string);
		out
	}

	pub fn contains(&self, id: SessionId) -> bool {
		self.sessions.contains_key(&id)
	}

	pub fn count(&self) -> usize {
		self.sessions.len()
	}
}
