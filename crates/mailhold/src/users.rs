//! The `user` commands.

use anyhow::{Context, Result};
use mailhold_core::{Config, DeliveryPipeline, Directory, MailboxKind, NewUser};

use crate::cli::UserCommand;
use crate::server::open_store;

pub async fn run(config: &Config, command: UserCommand) -> Result<()> {
    let store = open_store(config).await?;
    let directory = Directory::new(store.clone());

    match command {
        UserCommand::Add(add) => {
            let identity = directory
                .create_user(NewUser {
                    email: add.email.clone(),
                    username: add.username,
                    password: add.password,
                    full_name: add.full_name,
                })
                .await
                .with_context(|| format!("creating {}", add.email))?;
            let pipeline = DeliveryPipeline::new(store, directory, config.delivery_policy());
            let mailboxes = pipeline.provision(&identity).await?;
            println!(
                "Created {} ({} mailboxes)",
                identity.email,
                mailboxes.len()
            );
        }
        UserCommand::Passwd { email, password } => {
            directory.set_password(&email, &password).await?;
            println!("Password changed for {email}");
        }
        UserCommand::List => {
            for user in directory.list_users().await? {
                let locked = user
                    .locked_until
                    .map(|until| format!(" locked until {}", until.format("%Y-%m-%d %H:%M UTC")))
                    .unwrap_or_default();
                println!(
                    "{:<32} {:<16} {}{locked}",
                    user.email, user.username, user.status
                );
            }
        }
        UserCommand::Lock { email, minutes } => {
            directory.lock_user(&email, minutes).await?;
            println!("Locked {email} for {minutes} minutes");
        }
        UserCommand::Unlock { email } => {
            directory.unlock_user(&email).await?;
            println!("Unlocked {email}");
        }
        UserCommand::Quota { email, megabytes } => {
            let identity = directory
                .user_by_email(&email)
                .await?
                .with_context(|| format!("no user {email}"))?;
            let bytes = i64::from(megabytes) * 1024 * 1024;
            let inbox = store
                .get_or_create_mailbox(identity.user_id, "INBOX", MailboxKind::Inbox, bytes)
                .await?;
            store.set_quota(inbox.id, bytes).await?;
            println!("INBOX quota for {email} is now {megabytes} MiB");
        }
        UserCommand::Status { email, status } => {
            directory.set_status(&email, status.into()).await?;
            println!("Status of {email} set");
        }
    }
    Ok(())
}
