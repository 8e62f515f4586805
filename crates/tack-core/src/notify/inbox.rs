//! Recipient actions on notifications.

use std::sync::Arc;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::ids::{NotificationId, UserId};
use crate::model::Notification;
use crate::store::NotificationStore;

#[derive(Clone)]
pub struct Inbox {
    store: Arc<dyn NotificationStore>,
}

impl Inbox {
    #[must_use]
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Newest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn notifications_for(&self, user: UserId) -> CoreResult<Vec<Notification>> {
        self.store.notifications_for(user).await
    }

    /// # Errors
    ///
    /// `NotFound` if missing, `Forbidden` if `user` is not the recipient.
    pub async fn mark_read(&self, id: NotificationId, user: UserId) -> CoreResult<()> {
        self.owned(id, user).await?;
        self.store.mark_notification_read(id).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if missing, `Forbidden` if `user` is not the recipient.
    pub async fn delete_notification(&self, id: NotificationId, user: UserId) -> CoreResult<()> {
        self.owned(id, user).await?;
        self.store.delete_notification(id).await?;
        debug!(notification = %id, user = %user, "Notification deleted");
        Ok(())
    }

    async fn owned(&self, id: NotificationId, user: UserId) -> CoreResult<Notification> {
        let notification = self
            .store
            .notification(id)
            .await?
            .ok_or_else(|| CoreError::not_found("notification", id))?;
        if notification.recipient != user {
            return Err(CoreError::forbidden("only the recipient may act on a notification"));
        }
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NotificationKind, Related};
    use crate::store::InMemoryStore;

    async fn seeded() -> (Arc<InMemoryStore>, Notification) {
        let store = Arc::new(InMemoryStore::new());
        let n = Notification::new(
            UserId::new(),
            Some(UserId::new()),
            NotificationKind::BoardRenamed,
            "renamed",
            Related::default(),
        );
        store.insert_notification(n.clone()).await.unwrap();
        (store, n)
    }

    #[tokio::test]
    async fn test_recipient_marks_read_and_deletes() {
        let (store, n) = seeded().await;
        let inbox = Inbox::new(store.clone());

        inbox.mark_read(n.id, n.recipient).await.unwrap();
        assert!(store.notification(n.id).await.unwrap().unwrap().read);

        inbox.delete_notification(n.id, n.recipient).await.unwrap();
        assert!(inbox.notifications_for(n.recipient).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_users_are_forbidden() {
        let (store, n) = seeded().await;
        let inbox = Inbox::new(store.clone());
        let intruder = UserId::new();

        assert!(matches!(
            inbox.delete_notification(n.id, intruder).await,
            Err(CoreError::Forbidden { .. })
        ));
        assert!(matches!(
            inbox.mark_read(NotificationId::new(), intruder).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(store.notification(n.id).await.unwrap().is_some());
    }
}
