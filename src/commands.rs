use crate::{Data, Error};
use poise::{Context, command};

/// Manage the member blacklist
#[command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS",
    subcommands("scan", "add", "remove", "list", "stats"),
    subcommand_required
)]
pub async fn blacklist(_ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    Ok(())
}

/// Scan every member of this server against the blacklist
#[command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn scan(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Err("This command only works in a server".into());
    };
    ctx.defer().await?;

    let reply = ctx
        .data()
        .warden
        .command_scan(guild_id.get(), Some(ctx.channel_id().get()))
        .await;
    ctx.say(reply).await?;
    Ok(())
}

/// Add a user ID to the blacklist
#[command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn add(
    ctx: Context<'_, Data, Error>,
    #[description = "User ID to blacklist"] id: String,
) -> Result<(), Error> {
    let reply = ctx.data().warden.command_add(&id);
    ctx.say(reply).await?;
    Ok(())
}

/// Remove a user ID from the blacklist
#[command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn remove(
    ctx: Context<'_, Data, Error>,
    #[description = "User ID to remove"] id: String,
) -> Result<(), Error> {
    let reply = ctx.data().warden.command_remove(&id);
    ctx.say(reply).await?;
    Ok(())
}

/// Show the blacklisted user IDs
#[command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn list(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let reply = ctx.data().warden.command_list();
    ctx.say(reply).await?;
    Ok(())
}

/// Show scan statistics
#[command(prefix_command, slash_command, guild_only, required_permissions = "KICK_MEMBERS")]
pub async fn stats(ctx: Context<'_, Data, Error>) -> Result<(), Error> {
    let reply = ctx.data().warden.command_stats();
    ctx.say(reply).await?;
    Ok(())
}
