//! Command execution against the configured backend.

use std::sync::Arc;

use change_channel::{ChannelHub, RealtimeConfig, RealtimeTransport, Transport};
use collection_sync::{CollectionSynchronizer, SyncConfig};
use dashboard_sync::{Dashboard, DashboardConfig};
use remote_gateway::{EqFilter, Record, RemoteGateway, SupabaseStore, TaskAttachment};
use teamsync_config::Config;
use tracing::info;

use crate::render;
use crate::{Collection, Commands, ReadKind};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Who is signed in. Authentication itself happens elsewhere.
#[derive(Debug, Default)]
pub struct Session {
    pub access_token: Option<String>,
    pub user_id: Option<String>,
}

pub async fn run(config: Config, session: Session, command: Commands) -> AppResult<()> {
    let store = Arc::new(SupabaseStore::new(
        config.supabase_url.clone(),
        config.supabase_anon_key.clone(),
    ));
    let mut realtime_config = RealtimeConfig::new(config.realtime_url()?.to_string());
    if let Some(token) = &session.access_token {
        store.set_access_token(token.clone()).await;
        realtime_config = realtime_config.with_access_token(token.clone());
    }

    let mut realtime = None;
    let hub = ChannelHub::with_transport(|feed| {
        let transport = RealtimeTransport::new(realtime_config, feed);
        realtime = Some(Arc::clone(&transport));
        transport as Arc<dyn Transport>
    });

    let mut dashboard_config = DashboardConfig::new(session.user_id.clone().unwrap_or_default());
    dashboard_config.sync = SyncConfig {
        poll_interval: config.poll_interval(),
    };
    dashboard_config.attachments.bucket = config.attachments_bucket.clone();
    dashboard_config.attachments.max_upload_bytes = config.max_upload_bytes;
    let dashboard = Dashboard::new(RemoteGateway::new(store), hub, dashboard_config);

    match command {
        Commands::Watch {
            collection,
            task,
            workspace,
        } => {
            if let Some(transport) = &realtime {
                transport.start();
            }
            let result = watch_collection(&dashboard, &config, collection, task, workspace).await;
            if let Some(transport) = &realtime {
                transport.shutdown().await;
            }
            result?;
        }
        Commands::Send { to, text } => {
            if dashboard.user_id().is_empty() {
                return Err("sending needs the signed-in user: set TEAMSYNC_USER_ID".into());
            }
            let message = dashboard.send_message(&to, &text).await?;
            println!("sent {}", message.id);
        }
        Commands::MarkRead { kind, id } => {
            match kind {
                ReadKind::Notification => {
                    dashboard.mark_notification_read(&id).await?;
                }
                ReadKind::Message => {
                    dashboard.mark_message_read(&id).await?;
                }
            }
            println!("marked {} read", id);
        }
        Commands::Attach { task, file } => {
            let name = file
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or("file has no usable name")?
                .to_string();
            let bytes = tokio::fs::read(&file).await?;
            let record = dashboard.attach(&task, bytes, &name).await?;
            println!("{} {}", record.id, record.file_url);
        }
        Commands::Detach {
            task,
            attachment_id,
        } => {
            let attachments: Vec<TaskAttachment> = dashboard
                .gateway()
                .fetch_collection(Some(EqFilter::new("task_id", task.as_str())))
                .await?;
            match attachments.iter().find(|a| a.id == attachment_id) {
                Some(attachment) => {
                    dashboard.detach(attachment).await?;
                    println!("removed {}", attachment_id);
                }
                None => println!("{} is already gone", attachment_id),
            }
        }
    }

    Ok(())
}

async fn watch_collection(
    dashboard: &Dashboard,
    config: &Config,
    collection: Collection,
    task: Option<String>,
    workspace: Option<String>,
) -> AppResult<()> {
    match collection {
        Collection::Notifications => {
            follow(dashboard.mount_notifications().await, render::notifications).await
        }
        Collection::Messages => {
            let me = dashboard.user_id().to_string();
            follow(dashboard.mount_messages().await, move |rows| {
                render::messages(rows, &me)
            })
            .await
        }
        Collection::Tasks => follow(dashboard.mount_tasks().await, render::tasks).await,
        Collection::Projects => follow(dashboard.mount_projects().await, render::projects).await,
        Collection::Attachments => {
            let task = task.ok_or("--task is required for attachments")?;
            follow(dashboard.mount_attachments(&task).await, render::attachments).await
        }
        Collection::Roster => {
            let workspace = workspace
                .or_else(|| config.workspace_id.clone())
                .ok_or("no workspace: pass --workspace or set TEAMSYNC_WORKSPACE_ID")?;
            follow(dashboard.mount_roster(&workspace).await, render::roster).await
        }
    }
}

/// Print the view on every change until Ctrl-C, then unmount.
async fn follow<R, F>(sync: CollectionSynchronizer<R>, lines: F) -> AppResult<()>
where
    R: Record,
    F: Fn(&[R]) -> Vec<String>,
{
    let title = sync.key().to_string();
    let mut rx = sync.watch();
    loop {
        let view = rx.borrow_and_update().clone();
        render::print_view(&title, &view, &lines);

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!(topic = %title, "Stopping watch");
    sync.close().await;
    Ok(())
}
