//! Social graph collaborator: follow edges

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set, TransactionTrait};
use tracing::{debug, info};

use crate::change_feed::{ChangeEvent, ChangeOp, ChangeRow};
use crate::entities::follows;
use crate::error::StoreResult;
use crate::events::Notification;
use crate::{notification_center, now_millis, Store};

/// Questions the interaction core asks about follow relationships.
///
/// The core never stores follow edges itself; it only calls through this trait.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Whether `follower` follows `followee`
    async fn is_following(&self, follower: &str, followee: &str) -> StoreResult<bool>;

    /// Whether both users follow each other
    async fn are_mutual(&self, a: &str, b: &str) -> StoreResult<bool> {
        Ok(self.is_following(a, b).await? && self.is_following(b, a).await?)
    }

    /// Create the edge `follower -> followee`. Creating an existing edge is a no-op.
    async fn follow(&self, follower: &str, followee: &str) -> StoreResult<()>;

    /// Remove the edge `follower -> followee`, returning whether it existed.
    ///
    /// The follow notification it triggered, if still undecided, goes with it.
    async fn unfollow(&self, follower: &str, followee: &str) -> StoreResult<bool>;
}

/// [`SocialGraph`] over the `follows` table
#[derive(Clone)]
pub struct FollowGraph {
    store: Store,
}

impl FollowGraph {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn follower_count(&self, user_id: &str) -> StoreResult<u64> {
        Ok(follows::Entity::find()
            .filter(follows::Column::FolloweeId.eq(user_id))
            .count(&self.store.db)
            .await?)
    }
}

#[async_trait]
impl SocialGraph for FollowGraph {
    async fn is_following(&self, follower: &str, followee: &str) -> StoreResult<bool> {
        let edge = follows::Entity::find_by_id((follower.to_string(), followee.to_string()))
            .one(&self.store.db)
            .await?;

        Ok(edge.is_some())
    }

    async fn follow(&self, follower: &str, followee: &str) -> StoreResult<()> {
        let edge = follows::ActiveModel {
            follower_id: Set(follower.to_string()),
            followee_id: Set(followee.to_string()),
            created_at: Set(now_millis()),
        };

        let inserted = follows::Entity::insert(edge)
            .on_conflict(
                OnConflict::columns([follows::Column::FollowerId, follows::Column::FolloweeId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.store.db)
            .await?;

        if inserted > 0 {
            info!("{} now follows {}", follower, followee);
        } else {
            debug!("{} already follows {}", follower, followee);
        }
        Ok(())
    }

    async fn unfollow(&self, follower: &str, followee: &str) -> StoreResult<bool> {
        let txn = self.store.db.begin().await?;

        let result = follows::Entity::delete_many()
            .filter(follows::Column::FollowerId.eq(follower))
            .filter(follows::Column::FolloweeId.eq(followee))
            .exec(&txn)
            .await?;
        let withdrawn =
            notification_center::withdraw_follow_requests(&txn, followee, follower).await?;

        txn.commit().await?;

        if result.rows_affected > 0 {
            info!("{} unfollowed {}", follower, followee);
        }
        for model in withdrawn {
            debug!("Withdrew follow notification {}", model.id);
            self.store.feed.publish(ChangeEvent::new(
                ChangeOp::Delete,
                ChangeRow::Notification(Notification::try_from(model)?),
                i64::MAX,
            ));
        }
        Ok(result.rows_affected > 0)
    }
}
