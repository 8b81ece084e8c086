//! Sea-ORM entities for hangout-store

pub mod conversations;
pub mod follows;
pub mod messages;
pub mod notifications;
pub mod participants;
pub mod profiles;
pub mod read_marks;

pub use conversations::Entity as Conversations;
pub use follows::Entity as Follows;
pub use messages::Entity as Messages;
pub use notifications::Entity as Notifications;
pub use participants::Entity as Participants;
pub use profiles::Entity as Profiles;
pub use read_marks::Entity as ReadMarks;
