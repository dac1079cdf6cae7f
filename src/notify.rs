use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    domain::{Notification, NotificationKind},
    store::Store,
};

/// Notification sink. Unknown recipients are a no-op, not an error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: Uuid,
        message: String,
        kind: NotificationKind,
        related_donation: Option<Uuid>,
    ) -> anyhow::Result<Option<Notification>>;
}

/// Writes notifications into the entity store.
pub struct StoreNotifier {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(
        &self,
        recipient: Uuid,
        message: String,
        kind: NotificationKind,
        related_donation: Option<Uuid>,
    ) -> anyhow::Result<Option<Notification>> {
        if self.store.user(recipient).await?.is_none() {
            warn!(%recipient, %kind, "notification for unknown recipient dropped");
            return Ok(None);
        }
        let n = Notification {
            id: Uuid::new_v4(),
            recipient,
            message,
            kind,
            related_donation,
            is_read: false,
            created_at: self.clock.now(),
        };
        self.store.insert_notification(&n).await?;
        debug!(%recipient, %kind, "notification stored");
        Ok(Some(n))
    }
}

/// Fire a notification whose failure must not undo the transition that caused it.
pub async fn best_effort(
    notifier: &dyn Notifier,
    recipient: Uuid,
    message: String,
    kind: NotificationKind,
    related_donation: Option<Uuid>,
) {
    if let Err(e) = notifier
        .notify(recipient, message, kind, related_donation)
        .await
    {
        warn!(error = %e, %recipient, %kind, "notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, store::MemoryStore, testutil::donor};

    #[tokio::test]
    async fn unknown_recipient_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let notifier = StoreNotifier::new(store.clone(), Arc::new(SystemClock::default()));
        let out = notifier
            .notify(Uuid::new_v4(), "hi".into(), NotificationKind::DonationClaimed, None)
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn stores_for_known_recipient() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let d = donor("bakery");
        store.insert_user(&d).await.unwrap();
        let notifier = StoreNotifier::new(store.clone(), Arc::new(SystemClock::default()));
        notifier
            .notify(d.id, "claimed".into(), NotificationKind::DonationClaimed, None)
            .await
            .unwrap()
            .unwrap();
        let listed = store.notifications_for(d.id, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_read);
    }
}
