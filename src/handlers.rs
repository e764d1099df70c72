use poise::serenity_prelude::{self as serenity, FullEvent};
use tracing::{error, info, warn};

use crate::enforcement::{JoinEvent, JoinOutcome, MemberRecord, ScanError};
use crate::{Data, EVENT_TARGET, Error};

/// Gateway event dispatch
///
/// # Errors
///
/// Never fails; every handler logs its own errors so one bad event cannot
/// stop the stream.
pub async fn event_handler(
    ctx: &serenity::Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(
                target: EVENT_TARGET,
                user = %data_about_bot.user.name,
                shard = ctx.shard_id.0,
                guilds = data_about_bot.guilds.len(),
                "Connected"
            );
        }
        FullEvent::GuildMemberAddition { new_member } => {
            handle_member_addition(ctx, new_member, data);
        }
        FullEvent::GuildCreate { guild, is_new } => {
            let channel = guild.system_channel_id.map(|id| id.get());
            handle_guild_create(guild.id.get(), *is_new, channel, data);
        }
        _ => {}
    }
    Ok(())
}

/// Join checks run in their own task so the removal pipeline's waits don't
/// hold up the event stream
fn handle_member_addition(ctx: &serenity::Context, member: &serenity::Member, data: &Data) {
    let event = JoinEvent {
        guild_id: member.guild_id.get(),
        user_id: member.user.id.get(),
        member: Some(MemberRecord::from(member)),
        session_name: None,
        context: system_channel(ctx, member.guild_id),
    };
    let warden = data.warden.clone();

    tokio::spawn(async move {
        let (guild_id, user_id) = (event.guild_id, event.user_id);
        match warden.handle_member_join(event).await {
            JoinOutcome::Removed(outcome) if !outcome.is_success() => {
                warn!(target: EVENT_TARGET, guild_id, user_id, ?outcome, "Blacklisted member could not be removed");
            }
            outcome => {
                info!(target: EVENT_TARGET, guild_id, user_id, ?outcome, "Member join handled");
            }
        }
    });
}

/// The guild's system channel as cached from the gateway
fn system_channel(ctx: &serenity::Context, guild_id: serenity::GuildId) -> Option<u64> {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.system_channel_id)
        .map(|id| id.get())
}

fn handle_guild_create(guild_id: u64, is_new: Option<bool>, channel: Option<u64>, data: &Data) {
    info!(target: EVENT_TARGET, guild_id, is_new = ?is_new, "Guild available");
    let warden = data.warden.clone();

    tokio::spawn(async move {
        match warden.join_scan(guild_id, channel).await {
            None => {}
            Some(Ok(report)) => {
                info!(target: EVENT_TARGET, guild_id, %report, "Join scan finished");
            }
            Some(Err(ScanError::AlreadyRunning(_))) => {
                info!(target: EVENT_TARGET, guild_id, "Join scan skipped, scan already running");
            }
            Some(Err(e)) => {
                error!(target: EVENT_TARGET, guild_id, error = %e, "Join scan failed");
            }
        }
    });
}
