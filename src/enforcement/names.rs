//! Display name resolution
//!
//! Names are taken from the first non-empty source in a fixed order: member
//! profile fields, then whatever the triggering event carried, then a user
//! lookup, and finally the bare identifier.

use tracing::debug;

use crate::ENFORCEMENT_TARGET;
use crate::enforcement::{GuildPlatform, MemberRecord, UserRecord};

/// Name sources available without a platform call
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSources<'a> {
    pub member: Option<&'a MemberRecord>,
    /// Name supplied by the event itself (for example a join payload)
    pub session_name: Option<&'a str>,
}

type NameAccessor = for<'a> fn(&NameSources<'a>) -> Option<&'a str>;

fn member_nick<'a>(sources: &NameSources<'a>) -> Option<&'a str> {
    sources.member.and_then(|member| member.nick.as_deref())
}

fn member_global_name<'a>(sources: &NameSources<'a>) -> Option<&'a str> {
    sources.member.and_then(|member| member.global_name.as_deref())
}

fn member_username<'a>(sources: &NameSources<'a>) -> Option<&'a str> {
    sources.member.and_then(|member| member.username.as_deref())
}

fn session_name<'a>(sources: &NameSources<'a>) -> Option<&'a str> {
    sources.session_name
}

/// Accessors tried in order
const LOCAL_ACCESSORS: [NameAccessor; 4] = [member_nick, member_global_name, member_username, session_name];

fn non_empty(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|name| !name.is_empty())
}

/// Resolve a name using only the local sources
#[must_use]
pub fn resolve_local(sources: &NameSources<'_>) -> Option<String> {
    LOCAL_ACCESSORS
        .iter()
        .find_map(|accessor| non_empty(accessor(sources)))
        .map(ToString::to_string)
}

fn from_user(user: &UserRecord) -> Option<String> {
    non_empty(user.global_name.as_deref())
        .or_else(|| non_empty(user.username.as_deref()))
        .map(ToString::to_string)
}

/// Resolve a display name, falling back to a user lookup and then the identifier
pub async fn resolve_display_name(
    platform: &dyn GuildPlatform,
    user_id: u64,
    sources: &NameSources<'_>,
) -> String {
    if let Some(name) = resolve_local(sources) {
        return name;
    }

    match platform.fetch_user(user_id).await {
        Ok(user) => {
            if let Some(name) = from_user(&user) {
                return name;
            }
        }
        Err(e) => {
            debug!(
                target: ENFORCEMENT_TARGET,
                user_id,
                error = %e,
                "User lookup failed while resolving display name"
            );
        }
    }

    user_id.to_string()
}
