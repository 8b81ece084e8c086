//! Profile directory for resolving user display names

use std::collections::HashMap;

use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entities::profiles;
use crate::error::StoreResult;
use crate::{now_millis, Store};

/// Display-facing profile data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<profiles::Model> for Profile {
    fn from(model: profiles::Model) -> Self {
        Self {
            user_id: model.user_id,
            display_name: model.display_name,
            avatar_url: model.avatar_url,
        }
    }
}

/// Read mostly lookup of user profiles; profile editing lives outside this crate
#[derive(Clone)]
pub struct ProfileDirectory {
    store: Store,
}

impl ProfileDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert or replace the profile of a user
    pub async fn upsert(
        &self,
        user_id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
    ) -> StoreResult<()> {
        let model = profiles::ActiveModel {
            user_id: Set(user_id.to_string()),
            display_name: Set(display_name.to_string()),
            avatar_url: Set(avatar_url.map(str::to_string)),
            updated_at: Set(now_millis()),
        };

        profiles::Entity::insert(model)
            .on_conflict(
                OnConflict::column(profiles::Column::UserId)
                    .update_columns([
                        profiles::Column::DisplayName,
                        profiles::Column::AvatarUrl,
                        profiles::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.store.db)
            .await?;

        debug!("Upserted profile for {}", user_id);
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> StoreResult<Option<Profile>> {
        let profile = profiles::Entity::find_by_id(user_id.to_string())
            .one(&self.store.db)
            .await?;

        Ok(profile.map(Profile::from))
    }

    /// Display name of a user, falling back to the raw id for users without a profile
    pub async fn display_name(&self, user_id: &str) -> StoreResult<String> {
        Ok(self
            .get(user_id)
            .await?
            .map(|p| p.display_name)
            .unwrap_or_else(|| user_id.to_string()))
    }

    /// Display names for many users at once; users without a profile map to their id
    pub async fn display_names(&self, user_ids: &[String]) -> StoreResult<HashMap<String, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let found = profiles::Entity::find()
            .filter(profiles::Column::UserId.is_in(user_ids.iter().cloned()))
            .all(&self.store.db)
            .await?;

        let mut names: HashMap<String, String> = found
            .into_iter()
            .map(|p| (p.user_id, p.display_name))
            .collect();

        for id in user_ids {
            names.entry(id.clone()).or_insert_with(|| id.clone());
        }

        Ok(names)
    }
}
