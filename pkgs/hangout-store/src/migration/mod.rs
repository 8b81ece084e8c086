//! Sea-ORM migrations for the hangout-store schema

pub use sea_orm_migration::prelude::*;

mod m20260105_000001_create_conversations_table;
mod m20260105_000002_create_participants_table;
mod m20260105_000003_create_messages_table;
mod m20260105_000004_create_read_marks_table;
mod m20260105_000005_create_notifications_table;
mod m20260112_000001_create_follows_table;
mod m20260112_000002_create_profiles_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260105_000001_create_conversations_table::Migration),
            Box::new(m20260105_000002_create_participants_table::Migration),
            Box::new(m20260105_000003_create_messages_table::Migration),
            Box::new(m20260105_000004_create_read_marks_table::Migration),
            Box::new(m20260105_000005_create_notifications_table::Migration),
            Box::new(m20260112_000001_create_follows_table::Migration),
            Box::new(m20260112_000002_create_profiles_table::Migration),
        ]
    }
}
