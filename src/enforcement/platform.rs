//! Chat platform boundary
//!
//! Everything the enforcement core needs from Discord goes through
//! [`GuildPlatform`], so the pipeline can be driven by a mock in tests.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, Http, Member, User, UserId};
use std::sync::Arc;
use tracing::debug;

use crate::enforcement::PlatformError;

/// Page size used when listing guild members
const MEMBER_PAGE_SIZE: u64 = 1000;

/// A guild member as seen by the enforcement core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberRecord {
    pub user_id: u64,
    /// Guild-specific nickname
    pub nick: Option<String>,
    /// Account-wide display name
    pub global_name: Option<String>,
    /// Unique account name
    pub username: Option<String>,
    pub bot: bool,
}

impl MemberRecord {
    #[must_use]
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub const fn as_bot(mut self) -> Self {
        self.bot = true;
        self
    }
}

impl From<&Member> for MemberRecord {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.user.id.get(),
            nick: member.nick.clone(),
            global_name: member.user.global_name.clone(),
            username: Some(member.user.name.clone()),
            bot: member.user.bot,
        }
    }
}

/// A platform user, independent of any guild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: u64,
    pub global_name: Option<String>,
    pub username: Option<String>,
    pub bot: bool,
}

impl From<&User> for UserRecord {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.get(),
            global_name: user.global_name.clone(),
            username: Some(user.name.clone()),
            bot: user.bot,
        }
    }
}

/// Calls the enforcement core makes against the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildPlatform: Send + Sync {
    /// Full member listing of a guild
    async fn list_members(&self, guild_id: u64) -> Result<Vec<MemberRecord>, PlatformError>;

    /// A single member; `PlatformError::NotFound` when they are not in the guild
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<MemberRecord, PlatformError>;

    /// A user's global profile
    async fn fetch_user(&self, user_id: u64) -> Result<UserRecord, PlatformError>;

    /// Remove (kick) a member from the guild
    async fn remove_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError>;

    /// Post a message to a channel
    async fn send_message(&self, channel_id: u64, text: &str) -> Result<(), PlatformError>;

    /// The guild's system channel, where the platform posts join messages
    async fn system_channel(&self, guild_id: u64) -> Result<Option<u64>, PlatformError>;
}

/// [`GuildPlatform`] backed by the serenity HTTP client
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    #[must_use]
    pub const fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn guild(id: u64) -> Result<GuildId, PlatformError> {
    (id != 0)
        .then(|| GuildId::new(id))
        .ok_or_else(|| PlatformError::Other("guild id 0 is invalid".to_string()))
}

fn user(id: u64) -> Result<UserId, PlatformError> {
    (id != 0)
        .then(|| UserId::new(id))
        .ok_or_else(|| PlatformError::NotFound("user id 0 is invalid".to_string()))
}

#[async_trait]
impl GuildPlatform for SerenityPlatform {
    async fn list_members(&self, guild_id: u64) -> Result<Vec<MemberRecord>, PlatformError> {
        let guild_id = guild(guild_id)?;
        let mut records = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = guild_id
                .members(&self.http, Some(MEMBER_PAGE_SIZE), after)
                .await?;
            let page_len = page.len();
            after = page.last().map(|member| member.user.id);
            records.extend(page.iter().map(MemberRecord::from));

            debug!("Fetched {page_len} members of guild {guild_id}");
            if u64::try_from(page_len).unwrap_or_default() < MEMBER_PAGE_SIZE {
                break;
            }
        }

        Ok(records)
    }

    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<MemberRecord, PlatformError> {
        let member = guild(guild_id)?.member(&*self.http, user(user_id)?).await?;
        Ok(MemberRecord::from(&member))
    }

    async fn fetch_user(&self, user_id: u64) -> Result<UserRecord, PlatformError> {
        let fetched = user(user_id)?.to_user(&*self.http).await?;
        Ok(UserRecord::from(&fetched))
    }

    async fn remove_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError> {
        guild(guild_id)?
            .kick_with_reason(&self.http, user(user_id)?, reason)
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<(), PlatformError> {
        if channel_id == 0 {
            return Err(PlatformError::Other("channel id 0 is invalid".to_string()));
        }
        ChannelId::new(channel_id).say(&self.http, text).await?;
        Ok(())
    }

    async fn system_channel(&self, guild_id: u64) -> Result<Option<u64>, PlatformError> {
        let partial = guild(guild_id)?.to_partial_guild(&*self.http).await?;
        Ok(partial.system_channel_id.map(ChannelId::get))
    }
}
