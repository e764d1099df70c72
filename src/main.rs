use std::env;
use std::sync::Arc;

use blacklist_warden::enforcement::{SerenityPlatform, Warden};
use blacklist_warden::{CONSOLE_TARGET, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let config_path = Data::config_path_from_env();
    let config = Data::load_config(&config_path).await?;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::blacklist()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx).await;
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx).await;
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let poise::FrameworkError::Command { error, ctx, .. } = error {
                        let _ = ctx.say(format!("Command failed: {error}")).await;
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let platform = Arc::new(SerenityPlatform::new(Arc::clone(&ctx.http)));
                let warden = Warden::new(platform, config);
                let data = Data::new(warden.clone(), config_path);
                let _reload = data.spawn_config_reload();

                let shard_manager = Arc::clone(framework.shard_manager());
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!(target: CONSOLE_TARGET, "Ctrl-C received, shutting down");
                        warden.shutdown();
                        shard_manager.shutdown_all().await;
                    }
                });

                Ok(data)
            })
        })
        .build();

    // Member joins need the privileged GUILD_MEMBERS intent
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!(error = %err, "Client stopped");
    }

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
    }
}
