//! Due-date reminder sweep.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::CoreResult;
use crate::ids::{CardId, UserId};
use crate::model::{Card, Notification, NotificationKind, Related};
use crate::store::{BoardStore, Store};

/// Default look-ahead window: 24 hours.
#[must_use]
pub fn default_due_window() -> Duration {
    Duration::hours(24)
}

/// One reminder per (user, card, UTC day).
#[must_use]
pub fn dedupe_key(user: UserId, card: CardId, day: NaiveDate) -> String {
    format!("due:{user}:{card}:{}", day.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cards: usize,
    pub created: usize,
    /// Already reminded today.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReminderSweep {
    store: Arc<dyn Store>,
    window: Duration,
}

impl ReminderSweep {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_window(store, default_due_window())
    }

    #[must_use]
    pub fn with_window(store: Arc<dyn Store>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Remind every assignee of each open card due within the window.
    ///
    /// Safe to run concurrently with itself: the store's conditional insert
    /// keeps one reminder per key.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due cards cannot be listed.
    pub async fn run(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        let cards = self.store.cards_due_between(now, now + self.window).await?;
        let day = now.date_naive();
        let mut report = SweepReport {
            cards: cards.len(),
            ..SweepReport::default()
        };

        for card in &cards {
            for assignee in &card.members {
                let reminder = reminder_for(card, *assignee, day);
                match self.store.insert_notification_once(reminder).await {
                    Ok(true) => report.created += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(card = %card.id, recipient = %assignee, error = %e, "Failed to write due reminder");
                    }
                }
            }
        }

        if report.created > 0 {
            info!(created = report.created, cards = report.cards, "Due reminders sent");
        } else {
            debug!(cards = report.cards, skipped = report.skipped, "Due reminder sweep found nothing new");
        }
        Ok(report)
    }
}

fn reminder_for(card: &Card, user: UserId, day: NaiveDate) -> Notification {
    let when = card
        .due_date
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_default();
    Notification::new(
        user,
        None,
        NotificationKind::DueSoon,
        format!("Card \"{}\" is due {when}", card.title),
        Related {
            workspace: None,
            board: Some(card.board_id),
            list: Some(card.list_id),
            card: Some(card.id),
        },
    )
    .with_dedupe_key(dedupe_key(user, card.id, day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::BoardId;
    use crate::model::List;
    use crate::store::{InMemoryStore, NotificationStore};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    async fn seed(store: &InMemoryStore, due_in: Duration, assignees: Vec<UserId>) -> Card {
        let list = List::new(BoardId::new(), "Todo", 0);
        let mut card = Card::new(&list, "Invoice", UserId::new(), 0).with_due_date(now() + due_in);
        card.members = assignees;
        store.insert_list(list).await.unwrap();
        store.insert_card(card.clone()).await.unwrap();
        card
    }

    #[test]
    fn test_dedupe_key_format() {
        let user = UserId::new();
        let card = CardId::new();
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(dedupe_key(user, card, day), format!("due:{user}:{card}:2026-03-02"));
    }

    #[tokio::test]
    async fn test_sweep_reminds_each_assignee_once_per_day() {
        let store = Arc::new(InMemoryStore::new());
        let (a, b) = (UserId::new(), UserId::new());
        seed(&store, Duration::hours(3), vec![a, b]).await;

        let sweep = ReminderSweep::new(store.clone());
        let first = sweep.run(now()).await.unwrap();
        assert_eq!(first.created, 2);

        let second = sweep.run(now() + Duration::hours(1)).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.skipped, 2);

        let inbox = store.notifications_for(a).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::DueSoon);
        assert_eq!(inbox[0].sender, None);
    }

    #[tokio::test]
    async fn test_sweep_ignores_cards_outside_window_and_completed() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        seed(&store, Duration::hours(30), vec![user]).await;
        let done = seed(&store, Duration::hours(2), vec![user]).await;
        let mut completed = store.card(done.id).await.unwrap().unwrap();
        completed.completed = true;
        store.insert_card(completed).await.unwrap();

        let report = ReminderSweep::new(store.clone()).run(now()).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_create_one_reminder() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        seed(&store, Duration::hours(1), vec![user]).await;

        let sweep = ReminderSweep::new(store.clone());
        let (r1, r2) = tokio::join!(sweep.run(now()), sweep.run(now()));
        assert_eq!(r1.unwrap().created + r2.unwrap().created, 1);
        assert_eq!(store.notifications_for(user).await.unwrap().len(), 1);
    }
}
