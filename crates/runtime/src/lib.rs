//! Supervised registry for long-lived, expensive-to-create components.
//!
//! Components are created by a [`ComponentFactory`], run in their own task,
//! and are reachable only through typed [`Handle`]s. Uses read-acquire a
//! [`WriterPriorityLock`]; stops write-acquire it and cancel whatever uses are
//! still in flight, which then observe [`RegistryError::NotRegistered`].

mod component;
mod error;
mod registry;
mod rwlock;

pub use component::{Component, ComponentFactory, ComponentGuard, ManagedComponent};
pub use error::{ReadCancelledByWriter, RegistryError, Result};
pub use registry::{ComponentRegistry, Handle};
pub use rwlock::{ReadGuard, WriteGuard, WriterPriorityLock};
