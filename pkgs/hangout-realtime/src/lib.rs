//! Hangout Realtime - scoped live delivery and the session-level client surface
//!
//! Built on top of `hangout-store`: every committed change published on the
//! store's change feed is routed to the subscribers entitled to see it.
//!
//! # Architecture
//!
//! - **Dispatcher**: one pump task per subscription, filtering by conversation scope,
//!   recipient and per-entity version, with a bounded buffer per subscriber
//! - **Subscription / SubscriptionHandle**: pull-style receiving side and a cloneable,
//!   idempotent cancel handle
//! - **SessionVerifier**: token to user resolution; [`StaticSessions`] for local use
//! - **InteractionCore / Session**: the operations a client may call, with side-effect
//!   notifications running in the background
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hangout_realtime::{DispatcherConfig, Draft, InteractionCore, RealtimeEvent, StaticSessions};
//! use hangout_store::{FollowGraph, Store, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(StoreConfig::default()).await?;
//! let sessions = Arc::new(StaticSessions::new());
//! let core = InteractionCore::new(
//!     store.clone(),
//!     Arc::new(FollowGraph::new(store)),
//!     sessions.clone(),
//!     DispatcherConfig::default(),
//! );
//!
//! let bob = core.session(&sessions.issue("bob")).await?;
//! let mut live = bob.subscribe().await?;
//!
//! let alice = core.session(&sessions.issue("alice")).await?;
//! let conversation_id = alice.create_direct("bob").await?;
//! alice.send_message(&conversation_id, Draft::text("hi bob")).await?;
//!
//! while let Some(event) = live.recv().await {
//!     match event {
//!         RealtimeEvent::Change(change) => println!("{:?}", change.row),
//!         RealtimeEvent::Resync { .. } => { /* refetch conversations and counters */ }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod interaction;
pub mod session;
pub mod subscription;

mod filter;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ServiceError, ServiceResult};
pub use interaction::{Draft, InteractionCore, Session};
pub use session::{SessionVerifier, StaticSessions};
pub use subscription::{RealtimeEvent, Subscription, SubscriptionHandle};
