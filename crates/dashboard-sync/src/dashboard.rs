use std::sync::Arc;

use attachment_lifecycle::{AttachmentManager, AttachmentManagerConfig};
use change_channel::{ChannelHub, TopicKey};
use collection_sync::{CollectionSynchronizer, ProcedureSource, SyncConfig, TableSource};
use remote_gateway::{
    EqFilter, Message, NewMessage, Notification, Project, Record, RemoteGateway, Task,
    TaskAttachment, TeamMember,
};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{ActionError, ActionResult};

/// Row procedure returning a workspace's members.
pub const ROSTER_PROCEDURE: &str = "get_workspace_members";

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// The signed-in user; sender of outgoing messages.
    pub user_id: String,
    pub sync: SyncConfig,
    pub attachments: AttachmentManagerConfig,
}

impl DashboardConfig {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            sync: SyncConfig::default(),
            attachments: AttachmentManagerConfig::default(),
        }
    }
}

pub struct Dashboard {
    gateway: RemoteGateway,
    hub: Arc<ChannelHub>,
    attachments: AttachmentManager,
    config: DashboardConfig,
}

impl Dashboard {
    pub fn new(gateway: RemoteGateway, hub: Arc<ChannelHub>, config: DashboardConfig) -> Self {
        let attachments = AttachmentManager::new(gateway.clone(), config.attachments.clone());
        Self {
            gateway,
            hub,
            attachments,
            config,
        }
    }

    pub fn gateway(&self) -> &RemoteGateway {
        &self.gateway
    }

    pub fn hub(&self) -> &Arc<ChannelHub> {
        &self.hub
    }

    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    pub async fn mount_notifications(&self) -> CollectionSynchronizer<Notification> {
        self.mount_table(None).await
    }

    pub async fn mount_messages(&self) -> CollectionSynchronizer<Message> {
        self.mount_table(None).await
    }

    pub async fn mount_tasks(&self) -> CollectionSynchronizer<Task> {
        self.mount_table(None).await
    }

    pub async fn mount_projects(&self) -> CollectionSynchronizer<Project> {
        self.mount_table(None).await
    }

    /// Attachments of one task. Attach and detach on that task refresh it.
    pub async fn mount_attachments(&self, task_id: &str) -> CollectionSynchronizer<TaskAttachment> {
        let sync = self
            .mount_table::<TaskAttachment>(Some(EqFilter::new("task_id", task_id)))
            .await;
        self.attachments.track(task_id, sync.refresh_handle());
        sync
    }

    /// Close a view from [`Dashboard::mount_attachments`]. Later attach and
    /// detach calls on the task no longer refresh it.
    pub async fn unmount_attachments(
        &self,
        task_id: &str,
        sync: CollectionSynchronizer<TaskAttachment>,
    ) {
        sync.close().await;
        self.attachments.untrack(task_id);
    }

    /// Team roster, read through [`ROSTER_PROCEDURE`].
    pub async fn mount_roster(&self, workspace_id: &str) -> CollectionSynchronizer<TeamMember> {
        let source = ProcedureSource::new(
            self.gateway.clone(),
            ROSTER_PROCEDURE,
            json!({ "workspace_id": workspace_id }),
        );
        let key = TopicKey::for_record::<TeamMember>(Some(EqFilter::new(
            "workspace_id",
            workspace_id,
        )));
        CollectionSynchronizer::mount(source, &self.hub, key, self.config.sync.clone()).await
    }

    async fn mount_table<R: Record>(&self, filter: Option<EqFilter>) -> CollectionSynchronizer<R> {
        let key = TopicKey::for_record::<R>(filter.clone());
        let source = TableSource::new(self.gateway.clone(), filter);
        CollectionSynchronizer::mount(source, &self.hub, key, self.config.sync.clone()).await
    }

    /// Send `content` from the current user to `recipient_id`.
    pub async fn send_message(&self, recipient_id: &str, content: &str) -> ActionResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ActionError::Validation("message content is empty".to_string()));
        }
        if recipient_id.trim().is_empty() {
            return Err(ActionError::Validation("message recipient is empty".to_string()));
        }

        let new = NewMessage {
            content: content.to_string(),
            sender_id: self.config.user_id.clone(),
            recipient_id: recipient_id.to_string(),
            read: false,
        };
        let message = self.gateway.insert::<Message>(&new).await?;
        info!(id = %message.id, recipient_id, "Message sent");
        Ok(message)
    }

    pub async fn mark_notification_read(&self, id: &str) -> ActionResult<Notification> {
        self.mark_read::<Notification>(id).await
    }

    pub async fn mark_message_read(&self, id: &str) -> ActionResult<Message> {
        self.mark_read::<Message>(id).await
    }

    async fn mark_read<R: Record>(&self, id: &str) -> ActionResult<R> {
        let record = self.gateway.update::<R>(id, json!({ "read": true })).await?;
        debug!(table = R::TABLE, id, "Marked read");
        Ok(record)
    }

    pub async fn attach(
        &self,
        task_id: &str,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> ActionResult<TaskAttachment> {
        Ok(self.attachments.attach(task_id, bytes, file_name).await?)
    }

    pub async fn detach(&self, attachment: &TaskAttachment) -> ActionResult<()> {
        Ok(self.attachments.detach(attachment).await?)
    }
}

impl std::fmt::Debug for Dashboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dashboard")
            .field("user_id", &self.config.user_id)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}
