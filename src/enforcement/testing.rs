//! In-memory platform used by the enforcement tests

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::enforcement::{GuildPlatform, MemberRecord, PlatformError, UserRecord};

#[derive(Default)]
struct FakeState {
    members: DashMap<u64, MemberRecord>,
    order: Mutex<Vec<u64>>,
    removal_calls: AtomicUsize,
    removed: Mutex<Vec<u64>>,
    messages: Mutex<Vec<(u64, String)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fail_listing: AtomicBool,
    ignore_removals: AtomicBool,
    fetch_delay: Mutex<Duration>,
    removal_delay: Mutex<Duration>,
    permission_denied: DashMap<u64, ()>,
    system_channel: Mutex<Option<u64>>,
}

/// A single guild held in memory
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, member: MemberRecord) {
        let id = member.user_id;
        if self.state.members.insert(id, member).is_none() {
            self.state.order.lock().push(id);
        }
    }

    pub fn remove(&self, user_id: u64) {
        self.state.members.remove(&user_id);
        self.state.order.lock().retain(|id| *id != user_id);
    }

    pub fn rename(&self, user_id: u64, nick: &str) {
        if let Some(mut member) = self.state.members.get_mut(&user_id) {
            member.nick = Some(nick.to_string());
        }
    }

    pub fn is_member(&self, user_id: u64) -> bool {
        self.state.members.contains_key(&user_id)
    }

    pub fn removal_calls(&self) -> usize {
        self.state.removal_calls.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<u64> {
        self.state.removed.lock().clone()
    }

    pub fn messages(&self) -> Vec<(u64, String)> {
        self.state.messages.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.state.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Removal calls report success but leave the member in place
    pub fn set_ignore_removals(&self, ignore: bool) {
        self.state.ignore_removals.store(ignore, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.state.fetch_delay.lock() = delay;
    }

    pub fn set_removal_delay(&self, delay: Duration) {
        *self.state.removal_delay.lock() = delay;
    }

    pub fn deny_removal(&self, user_id: u64) {
        self.state.permission_denied.insert(user_id, ());
    }

    pub fn set_system_channel(&self, channel_id: Option<u64>) {
        *self.state.system_channel.lock() = channel_id;
    }
}

#[async_trait]
impl GuildPlatform for FakePlatform {
    async fn list_members(&self, guild_id: u64) -> Result<Vec<MemberRecord>, PlatformError> {
        if self.state.fail_listing.load(Ordering::SeqCst) {
            return Err(PlatformError::Transient(format!("cannot list guild {guild_id}")));
        }
        let order = self.state.order.lock().clone();
        Ok(order
            .iter()
            .filter_map(|id| self.state.members.get(id).map(|m| m.value().clone()))
            .collect())
    }

    async fn fetch_member(&self, _guild_id: u64, user_id: u64) -> Result<MemberRecord, PlatformError> {
        let delay = *self.state.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state
            .members
            .get(&user_id)
            .map(|m| m.value().clone())
            .ok_or_else(|| PlatformError::NotFound(format!("member {user_id}")))
    }

    async fn fetch_user(&self, user_id: u64) -> Result<UserRecord, PlatformError> {
        self.state
            .members
            .get(&user_id)
            .map(|m| UserRecord {
                user_id,
                global_name: m.global_name.clone(),
                username: m.username.clone(),
                bot: m.bot,
            })
            .ok_or_else(|| PlatformError::NotFound(format!("user {user_id}")))
    }

    async fn remove_member(&self, _guild_id: u64, user_id: u64, _reason: &str) -> Result<(), PlatformError> {
        self.state.removal_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.state.removal_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.state.permission_denied.contains_key(&user_id) {
            return Err(PlatformError::Permission("Missing Permissions".to_string()));
        }
        if !self.state.members.contains_key(&user_id) {
            return Err(PlatformError::NotFound(format!("member {user_id}")));
        }
        if !self.state.ignore_removals.load(Ordering::SeqCst) {
            self.remove(user_id);
            self.state.removed.lock().push(user_id);
        }
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<(), PlatformError> {
        self.state.messages.lock().push((channel_id, text.to_string()));
        Ok(())
    }

    async fn system_channel(&self, _guild_id: u64) -> Result<Option<u64>, PlatformError> {
        Ok(*self.state.system_channel.lock())
    }
}
