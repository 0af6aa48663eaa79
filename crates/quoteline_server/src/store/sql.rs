#![forbid(unsafe_code)]

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use quoteline_domain::{
	ChannelScope, ChatMessage, CounterKey, CustomerId, Direction, Notification, Order, OrderId, Sender,
	ServerMessageId, TrackingEntry, UnreadCounts, UserId,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use super::{CounterOp, InsertOutcome, Store};

/// SQLite-backed store.
///
/// Orders are kept as a JSON body plus indexed columns; tracking history lives
/// in its own append-only table.
#[derive(Clone)]
pub struct SqlStore {
	pool: SqlitePool,
}

type MessageRow = (String, String, String, String, String, i64);
type NotificationRow = (String, String, String, String, String, Option<String>, bool, i64);

impl SqlStore {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url (use sqlite:)"));
		}

		let options = SqliteConnectOptions::from_str(database_url)
			.context("parse sqlite url")?
			.create_if_missing(true)
			.busy_timeout(Duration::from_secs(5));

		// In-memory databases are per connection.
		let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections)
			.connect_with(options)
			.await
			.context("connect sqlite")?;

		sqlx::migrate!("migrations/sqlite")
			.run(&pool)
			.await
			.context("run sqlite migrations")?;

		info!(max_connections, "sqlite store ready");
		Ok(Self { pool })
	}

	async fn write_order(tx: &mut Transaction<'_, Sqlite>, order: &Order) -> anyhow::Result<()> {
		let body = order_body(order)?;
		let res = sqlx::query("UPDATE orders SET status = ?, body = ?, updated_at_ms = ? WHERE id = ?")
			.bind(order.status.as_str())
			.bind(body)
			.bind(order.updated_at_ms)
			.bind(order.id.as_str())
			.execute(&mut **tx)
			.await
			.context("update order")?;

		if res.rows_affected() == 0 {
			return Err(anyhow!("order {} does not exist", order.id));
		}
		Ok(())
	}

	async fn push_history(
		tx: &mut Transaction<'_, Sqlite>,
		order_id: &OrderId,
		entry: &TrackingEntry,
	) -> anyhow::Result<()> {
		sqlx::query(
			"INSERT INTO order_tracking_history (order_id, seq, step_index, step_name, changed_at_ms) \
			VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM order_tracking_history WHERE order_id = ?), ?, ?, ?)",
		)
		.bind(order_id.as_str())
		.bind(order_id.as_str())
		.bind(entry.step_index as i64)
		.bind(&entry.step_name)
		.bind(entry.changed_at_ms)
		.execute(&mut **tx)
		.await
		.context("insert tracking history")?;
		Ok(())
	}

	async fn read_counts<'e, E>(executor: E, key: &CounterKey) -> anyhow::Result<UnreadCounts>
	where
		E: sqlx::Executor<'e, Database = Sqlite>,
	{
		let row: Option<(i64, i64)> =
			sqlx::query_as("SELECT to_staff, to_customer FROM unread_counters WHERE customer_id = ? AND scope = ?")
				.bind(key.customer_id.as_str())
				.bind(key.scope.storage_key())
				.fetch_optional(executor)
				.await
				.context("select unread counter")?;

		Ok(row
			.map(|(to_staff, to_customer)| UnreadCounts {
				to_staff: to_staff.max(0) as u64,
				to_customer: to_customer.max(0) as u64,
			})
			.unwrap_or_default())
	}
}

/// JSON body without history; history is reassembled from its own table.
fn order_body(order: &Order) -> anyhow::Result<String> {
	let mut body = order.clone();
	body.tracking_history.clear();
	serde_json::to_string(&body).context("encode order body")
}

fn message_from_row(row: MessageRow) -> anyhow::Result<ChatMessage> {
	let (id, customer_id, scope, sender, text, sent_at_ms) = row;
	Ok(ChatMessage {
		id: ServerMessageId(uuid::Uuid::parse_str(&id).context("parse message id")?),
		scope: ChannelScope::parse_storage_key(&scope)?,
		customer_id: CustomerId::new(customer_id)?,
		sender: sender.parse::<Sender>()?,
		text,
		sent_at_ms,
	})
}

fn notification_from_row(row: NotificationRow) -> anyhow::Result<Notification> {
	let (id, user_id, title, text, kind, related_id, seen, created_at_ms) = row;
	Ok(Notification {
		id: uuid::Uuid::parse_str(&id).context("parse notification id")?,
		user_id: UserId::new(user_id)?,
		title,
		text,
		kind: kind.parse()?,
		related_id,
		seen,
		created_at_ms,
	})
}

const fn counter_upsert_sql(direction: Direction, op: CounterOp) -> &'static str {
	match (direction, op) {
		(Direction::ToStaff, CounterOp::Increment(_)) => {
			"INSERT INTO unread_counters (customer_id, scope, to_staff) VALUES (?, ?, ?) \
			ON CONFLICT(customer_id, scope) DO UPDATE SET to_staff = to_staff + excluded.to_staff"
		}
		(Direction::ToStaff, CounterOp::ResetTo(_)) => {
			"INSERT INTO unread_counters (customer_id, scope, to_staff) VALUES (?, ?, ?) \
			ON CONFLICT(customer_id, scope) DO UPDATE SET to_staff = excluded.to_staff"
		}
		(Direction::ToCustomer, CounterOp::Increment(_)) => {
			"INSERT INTO unread_counters (customer_id, scope, to_customer) VALUES (?, ?, ?) \
			ON CONFLICT(customer_id, scope) DO UPDATE SET to_customer = to_customer + excluded.to_customer"
		}
		(Direction::ToCustomer, CounterOp::ResetTo(_)) => {
			"INSERT INTO unread_counters (customer_id, scope, to_customer) VALUES (?, ?, ?) \
			ON CONFLICT(customer_id, scope) DO UPDATE SET to_customer = excluded.to_customer"
		}
	}
}

#[async_trait::async_trait]
impl Store for SqlStore {
	async fn get_order(&self, id: &OrderId) -> anyhow::Result<Option<Order>> {
		let row: Option<(String,)> = sqlx::query_as("SELECT body FROM orders WHERE id = ?")
			.bind(id.as_str())
			.fetch_optional(&self.pool)
			.await
			.context("select order")?;

		let Some((body,)) = row else {
			return Ok(None);
		};
		let mut order: Order = serde_json::from_str(&body).context("decode order body")?;

		let history = sqlx::query_as::<_, (i64, String, i64)>(
			"SELECT step_index, step_name, changed_at_ms FROM order_tracking_history WHERE order_id = ? ORDER BY seq ASC",
		)
		.bind(id.as_str())
		.fetch_all(&self.pool)
		.await
		.context("select tracking history")?;

		order.tracking_history = history
			.into_iter()
			.map(|(step_index, step_name, changed_at_ms)| TrackingEntry {
				step_index: step_index as u32,
				step_name,
				changed_at_ms,
			})
			.collect();

		Ok(Some(order))
	}

	async fn insert_order(&self, order: &Order) -> anyhow::Result<()> {
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;

		sqlx::query(
			"INSERT INTO orders (id, customer_id, status, body, created_at_ms, updated_at_ms) VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(order.id.as_str())
		.bind(order.customer_id.as_str())
		.bind(order.status.as_str())
		.bind(order_body(order)?)
		.bind(order.created_at_ms)
		.bind(order.updated_at_ms)
		.execute(&mut *tx)
		.await
		.context("insert order")?;

		for entry in &order.tracking_history {
			Self::push_history(&mut tx, &order.id, entry).await?;
		}

		tx.commit().await.context("commit sqlite tx")?;
		Ok(())
	}

	async fn update_order(&self, order: &Order) -> anyhow::Result<()> {
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;
		Self::write_order(&mut tx, order).await?;
		tx.commit().await.context("commit sqlite tx")?;
		Ok(())
	}

	async fn append_tracking_history(&self, order_id: &OrderId, entry: &TrackingEntry) -> anyhow::Result<()> {
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;
		Self::push_history(&mut tx, order_id, entry).await?;
		tx.commit().await.context("commit sqlite tx")?;
		Ok(())
	}

	async fn commit_transition(&self, order: &Order, entry: Option<&TrackingEntry>) -> anyhow::Result<()> {
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;
		Self::write_order(&mut tx, order).await?;
		if let Some(entry) = entry {
			Self::push_history(&mut tx, &order.id, entry).await?;
		}
		tx.commit().await.context("commit sqlite tx")?;
		Ok(())
	}

	async fn insert_message(&self, msg: &ChatMessage, count: Option<Direction>) -> anyhow::Result<InsertOutcome> {
		let scope = msg.scope.storage_key();
		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;

		let res = sqlx::query(
			"INSERT INTO chat_messages (id, customer_id, scope, sender, text, sent_at_ms) VALUES (?, ?, ?, ?, ?, ?) \
			ON CONFLICT(customer_id, scope, sender, sent_at_ms, text) DO NOTHING",
		)
		.bind(msg.id.to_string())
		.bind(msg.customer_id.as_str())
		.bind(&scope)
		.bind(msg.sender.as_str())
		.bind(&msg.text)
		.bind(msg.sent_at_ms)
		.execute(&mut *tx)
		.await
		.context("insert chat message")?;

		if res.rows_affected() == 0 {
			let row: MessageRow = sqlx::query_as(
				"SELECT id, customer_id, scope, sender, text, sent_at_ms FROM chat_messages \
				WHERE customer_id = ? AND scope = ? AND sender = ? AND sent_at_ms = ? AND text = ?",
			)
			.bind(msg.customer_id.as_str())
			.bind(&scope)
			.bind(msg.sender.as_str())
			.bind(msg.sent_at_ms)
			.bind(&msg.text)
			.fetch_one(&mut *tx)
			.await
			.context("select duplicate chat message")?;
			tx.rollback().await.context("rollback sqlite tx")?;
			return Ok(InsertOutcome::Duplicate(message_from_row(row)?));
		}

		let counts = match count {
			Some(direction) => {
				let key = CounterKey::new(msg.customer_id.clone(), msg.scope.clone());
				sqlx::query(counter_upsert_sql(direction, CounterOp::Increment(1)))
					.bind(key.customer_id.as_str())
					.bind(&scope)
					.bind(1i64)
					.execute(&mut *tx)
					.await
					.context("increment unread counter")?;
				Some(Self::read_counts(&mut *tx, &key).await?)
			}
			None => None,
		};

		tx.commit().await.context("commit sqlite tx")?;
		Ok(InsertOutcome::Inserted { counts })
	}

	async fn list_messages(
		&self,
		customer_id: &CustomerId,
		scope: &ChannelScope,
		since_ms: i64,
	) -> anyhow::Result<Vec<ChatMessage>> {
		let rows: Vec<MessageRow> = sqlx::query_as(
			"SELECT id, customer_id, scope, sender, text, sent_at_ms FROM chat_messages \
			WHERE customer_id = ? AND scope = ? AND sent_at_ms >= ? ORDER BY sent_at_ms ASC, rowid ASC",
		)
		.bind(customer_id.as_str())
		.bind(scope.storage_key())
		.bind(since_ms)
		.fetch_all(&self.pool)
		.await
		.context("select chat messages")?;

		rows.into_iter().map(message_from_row).collect()
	}

	async fn upsert_unread_counter(
		&self,
		key: &CounterKey,
		direction: Direction,
		op: CounterOp,
	) -> anyhow::Result<UnreadCounts> {
		let value = match op {
			CounterOp::Increment(n) | CounterOp::ResetTo(n) => n as i64,
		};

		let mut tx = self.pool.begin().await.context("begin sqlite tx")?;
		sqlx::query(counter_upsert_sql(direction, op))
			.bind(key.customer_id.as_str())
			.bind(key.scope.storage_key())
			.bind(value)
			.execute(&mut *tx)
			.await
			.context("upsert unread counter")?;
		let counts = Self::read_counts(&mut *tx, key).await?;
		tx.commit().await.context("commit sqlite tx")?;
		Ok(counts)
	}

	async fn get_unread_counter(&self, key: &CounterKey) -> anyhow::Result<UnreadCounts> {
		Self::read_counts(&self.pool, key).await
	}

	async fn list_unread_counters(&self, customer_id: &CustomerId) -> anyhow::Result<Vec<(ChannelScope, UnreadCounts)>> {
		let rows: Vec<(String, i64, i64)> = sqlx::query_as(
			"SELECT scope, to_staff, to_customer FROM unread_counters WHERE customer_id = ? ORDER BY scope ASC",
		)
		.bind(customer_id.as_str())
		.fetch_all(&self.pool)
		.await
		.context("select unread counters")?;

		rows.into_iter()
			.map(|(scope, to_staff, to_customer)| {
				Ok((
					ChannelScope::parse_storage_key(&scope)?,
					UnreadCounts {
						to_staff: to_staff.max(0) as u64,
						to_customer: to_customer.max(0) as u64,
					},
				))
			})
			.collect()
	}

	async fn insert_notification(&self, n: &Notification) -> anyhow::Result<()> {
		sqlx::query(
			"INSERT INTO notifications (id, user_id, title, text, kind, related_id, seen, created_at_ms) \
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(n.id.to_string())
		.bind(n.user_id.as_str())
		.bind(&n.title)
		.bind(&n.text)
		.bind(n.kind.as_str())
		.bind(n.related_id.as_deref())
		.bind(n.seen)
		.bind(n.created_at_ms)
		.execute(&self.pool)
		.await
		.context("insert notification")?;
		Ok(())
	}

	async fn list_notifications(&self, user_id: &UserId) -> anyhow::Result<Vec<Notification>> {
		let rows: Vec<NotificationRow> = sqlx::query_as(
			"SELECT id, user_id, title, text, kind, related_id, seen, created_at_ms FROM notifications \
			WHERE user_id = ? ORDER BY created_at_ms DESC, rowid DESC",
		)
		.bind(user_id.as_str())
		.fetch_all(&self.pool)
		.await
		.context("select notifications")?;

		rows.into_iter().map(notification_from_row).collect()
	}

	async fn mark_notifications_seen(&self, user_id: &UserId) -> anyhow::Result<u64> {
		let res = sqlx::query("UPDATE notifications SET seen = 1 WHERE user_id = ? AND seen = 0")
			.bind(user_id.as_str())
			.execute(&self.pool)
			.await
			.context("mark notifications seen")?;
		Ok(res.rows_affected())
	}

	async fn delete_seen_notifications(&self, user_id: &UserId) -> anyhow::Result<u64> {
		let res = sqlx::query("DELETE FROM notifications WHERE user_id = ? AND seen = 1")
			.bind(user_id.as_str())
			.execute(&self.pool)
			.await
			.context("delete seen notifications")?;
		Ok(res.rows_affected())
	}
}
