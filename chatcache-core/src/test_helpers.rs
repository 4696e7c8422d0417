//! Test helpers and fixtures for chatcache tests

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::cache::{CacheBackend, WriteThrough};
use crate::config::{MessageCacheConfig, TtlConfig};
use crate::models::{Message, MessageId, NewMessage, ReactionAction, Room, RoomId, UserId};
use crate::service::{MessageCache, RoomDirectory};
use crate::store::MessageStore;
use crate::{Error, Result};

pub fn test_room_id(id: &str) -> RoomId {
    RoomId::from(id)
}

pub fn test_user_id(id: &str) -> UserId {
    UserId::from(id)
}

/// Fixed epoch so that store timestamps are deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Document store kept in process memory
///
/// Each created message is timestamped one second after the previous one,
/// so ordering by `created_at` is strict.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<Message>>,
    rooms: Mutex<HashMap<RoomId, Room>>,
    failing_rooms: Mutex<HashSet<RoomId>>,
    clock: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(self, room_id: &str, participants: &[&str]) -> Self {
        let room = RoomFixture::new()
            .with_id(test_room_id(room_id))
            .with_participants(participants)
            .build();
        self.rooms.lock().insert(room.id.clone(), room);
        self
    }

    /// Make every message query for `room_id` fail
    pub fn fail_room(&self, room_id: &RoomId) {
        self.failing_rooms.lock().insert(room_id.clone());
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn stored(&self, id: &MessageId) -> Option<Message> {
        self.messages.lock().iter().find(|m| &m.id == id).cloned()
    }

    fn check_room(&self, room_id: &RoomId) -> Result<()> {
        if self.failing_rooms.lock().contains(room_id) {
            return Err(Error::Store(format!("room {room_id} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create_message(&self, new: NewMessage) -> Result<Message> {
        self.check_room(&new.room_id)?;
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Message::from_new(new, base_time() + Duration::seconds(tick));
        self.messages.lock().push(message.clone());
        Ok(message)
    }

    async fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.stored(id))
    }

    async fn list_messages(
        &self,
        room_id: &RoomId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.check_room(room_id)?;
        let mut rows: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| &m.room_id == room_id)
            .filter(|m| before.is_none_or(|cursor| m.created_at < cursor))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_messages(&self, room_id: &RoomId) -> Result<u64> {
        self.check_room(room_id)?;
        Ok(self
            .messages
            .lock()
            .iter()
            .filter(|m| &m.room_id == room_id)
            .count() as u64)
    }

    async fn mark_read(
        &self,
        ids: &[MessageId],
        user_id: &UserId,
        read_at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut changed = 0;
        for message in self.messages.lock().iter_mut() {
            if ids.contains(&message.id) && message.mark_read(user_id, read_at) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn toggle_reaction(
        &self,
        id: &MessageId,
        reaction: &str,
        user_id: &UserId,
        action: ReactionAction,
    ) -> Result<Option<Message>> {
        let mut messages = self.messages.lock();
        let Some(message) = messages.iter_mut().find(|m| &m.id == id) else {
            return Ok(None);
        };
        message.apply_reaction(reaction, user_id, action);
        Ok(Some(message.clone()))
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| &m.id != id);
        Ok(messages.len() != before)
    }

    async fn find_room(&self, id: &RoomId) -> Result<Option<Room>> {
        Ok(self.rooms.lock().get(id).cloned())
    }

    async fn room_participants(&self, id: &RoomId) -> Result<Vec<UserId>> {
        Ok(self
            .rooms
            .lock()
            .get(id)
            .map(|room| room.participants.clone())
            .unwrap_or_default())
    }

    async fn user_rooms(&self, user_id: &UserId) -> Result<Vec<RoomId>> {
        let mut rooms: Vec<RoomId> = self
            .rooms
            .lock()
            .values()
            .filter(|room| room.has_participant(user_id))
            .map(|room| room.id.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }
}

/// Test fixture builder for Room
pub struct RoomFixture {
    id: RoomId,
    name: String,
    participants: Vec<UserId>,
}

impl RoomFixture {
    pub fn new() -> Self {
        Self {
            id: RoomId::new(),
            name: "Test Room".to_string(),
            participants: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: RoomId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_participants(mut self, participants: &[&str]) -> Self {
        self.participants = participants.iter().map(|p| test_user_id(p)).collect();
        self
    }

    pub fn build(self) -> Room {
        Room {
            id: self.id,
            name: self.name,
            participants: self.participants,
            created_at: base_time(),
            updated_at: base_time(),
        }
    }
}

impl Default for RoomFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Message cache over an in-memory backend
pub fn message_cache(store: Arc<dyn MessageStore>) -> (MessageCache, Arc<CacheBackend>) {
    let backend = Arc::new(CacheBackend::in_memory());
    let cache = WriteThrough::new(backend.clone(), TtlConfig::default());
    let directory = RoomDirectory::new(cache.clone(), store.clone());
    (
        MessageCache::new(cache, store, directory, MessageCacheConfig::default()),
        backend,
    )
}

type StubData = Arc<Mutex<HashMap<String, String>>>;

/// Minimal RESP server speaking the string commands the cache backend sends
///
/// Keys live in a plain map and TTLs are ignored. `SCAN` always reports an
/// empty keyspace. Unknown commands answer `+OK`.
pub struct StubRedis {
    addr: SocketAddr,
    accept: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StubRedis {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let data = StubData::default();
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let tracked = connections.clone();
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tracked
                    .lock()
                    .push(tokio::spawn(serve_connection(socket, data.clone())));
            }
        });

        Self {
            addr,
            accept,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.addr)
    }

    /// Stop accepting and close every open connection
    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
        let connections: Vec<JoinHandle<()>> = std::mem::take(&mut *self.connections.lock());
        for connection in connections {
            connection.abort();
            let _ = connection.await;
        }
    }
}

async fn serve_connection(mut socket: TcpStream, data: StubData) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        pending.extend_from_slice(&chunk[..read]);

        let mut out = Vec::new();
        while let Some((args, used)) = parse_command(&pending) {
            pending.drain(..used);
            out.extend(reply(&args, &data));
        }
        if socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

/// One complete `*<n>` array of bulk strings, with the bytes it used
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = read_header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = read_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }
    Some((args, pos))
}

fn read_header(buf: &[u8], pos: usize, prefix: u8) -> Option<(usize, usize)> {
    if *buf.get(pos)? != prefix {
        return None;
    }
    let line_end = buf[pos..].windows(2).position(|w| w == b"\r\n")? + pos;
    let value = std::str::from_utf8(&buf[pos + 1..line_end]).ok()?.parse().ok()?;
    Some((value, line_end + 2))
}

fn reply(args: &[String], data: &StubData) -> Vec<u8> {
    let Some((command, rest)) = args.split_first() else {
        return b"+OK\r\n".to_vec();
    };
    let mut data = data.lock();
    match (command.to_ascii_uppercase().as_str(), rest) {
        ("PING", _) => b"+PONG\r\n".to_vec(),
        ("GET", [key]) => match data.get(key) {
            Some(value) => format!("${}\r\n{value}\r\n", value.len()).into_bytes(),
            None => b"$-1\r\n".to_vec(),
        },
        ("SET", [key, value, ..]) | ("SETEX", [key, _, value]) => {
            data.insert(key.clone(), value.clone());
            b"+OK\r\n".to_vec()
        }
        ("DEL", keys) => {
            let removed = keys.iter().filter(|key| data.remove(*key).is_some()).count();
            format!(":{removed}\r\n").into_bytes()
        }
        ("EXPIRE", _) => b":1\r\n".to_vec(),
        ("SCAN", _) => b"*2\r\n$1\r\n0\r\n*0\r\n".to_vec(),
        _ => b"+OK\r\n".to_vec(),
    }
}
