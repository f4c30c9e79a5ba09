//! Process-wide table of long-lived components.
//!
//! The registry owns every [`ManagedComponent`] it starts and hands out opaque
//! typed [`Handle`]s in exchange. Each component runs in its own supervised
//! task; a crash in one task tears that component down and leaves its siblings
//! untouched.
//!
//! The table is guarded by its own mutex, which is never held across a
//! component's startup or stop. A component whose task ends without being
//! unregistered (a crash, or supervision returning) removes its own entry.

use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span};

use crate::component::{ComponentFactory, ComponentGuard, ManagedComponent};
use crate::error::{RegistryError, Result};

/// Opaque key of one registered component.
///
/// Handles are minted by [`ComponentRegistry::register`] and never reused by
/// the same registry.
pub struct Handle<C> {
	id: u64,
	_component: PhantomData<fn() -> C>,
}

impl<C> Handle<C> {
	fn new(id: u64) -> Self {
		Self { id, _component: PhantomData }
	}

	pub fn id(&self) -> u64 {
		self.id
	}
}

impl<C> Clone for Handle<C> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<C> Copy for Handle<C> {}

impl<C> PartialEq for Handle<C> {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl<C> Eq for Handle<C> {}

impl<C> Hash for Handle<C> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl<C> std::fmt::Debug for Handle<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Handle({})", self.id)
	}
}

/// Stops a started component if its registration is abandoned before the
/// table holds it.
struct PendingRegistration(Option<Arc<ManagedComponent>>);

impl PendingRegistration {
	fn disarm(mut self) {
		self.0 = None;
	}
}

impl Drop for PendingRegistration {
	fn drop(&mut self) {
		if let Some(managed) = self.0.take() {
			managed.abandon();
		}
	}
}

/// Registry of supervised components, keyed by [`Handle`].
#[derive(Debug)]
pub struct ComponentRegistry {
	components: Arc<Mutex<HashMap<u64, Arc<ManagedComponent>>>>,
	next_handle: AtomicU64,
	shutdown: CancellationToken,
	tasks: TaskTracker,
}

impl Default for ComponentRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl ComponentRegistry {
	pub fn new() -> Self {
		Self {
			components: Arc::new(Mutex::new(HashMap::new())),
			next_handle: AtomicU64::new(1),
			shutdown: CancellationToken::new(),
			tasks: TaskTracker::new(),
		}
	}

	/// Starts `factory` in a supervised task and registers the component.
	///
	/// Returns once the component has started. Errors raised by the factory
	/// before that point are returned as [`RegistryError::ComponentFailure`];
	/// later failures only show up as [`RegistryError::NotRegistered`] on the
	/// next acquisition.
	pub async fn register<F: ComponentFactory>(&self, factory: F) -> Result<Handle<F::Component>> {
		if self.shutdown.is_cancelled() {
			return Err(RegistryError::ShutDown);
		}

		let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
		let managed = Arc::new(ManagedComponent::new(self.shutdown.child_token()));
		let (started_tx, started_rx) = oneshot::channel();
		let span = info_span!("component", handle = id);
		let task = {
			let managed = managed.clone();
			let components = Arc::downgrade(&self.components);
			async move {
				managed.clone().run(factory, started_tx).await;
				// A component that stopped on its own leaves the table too.
				if let Some(components) = components.upgrade() {
					let mut components = components.lock();
					if components.get(&id).is_some_and(|entry| Arc::ptr_eq(entry, &managed)) {
						components.remove(&id);
						debug!(target = "tether.registry", handle = id, "stopped component removed");
					}
				}
			}
		};
		self.tasks.spawn(task.instrument(span));
		let pending = PendingRegistration(Some(managed.clone()));

		let started = started_rx.await;
		if self.shutdown.is_cancelled() {
			return Err(RegistryError::ShutDown);
		}
		match started {
			Ok(Ok(())) => {}
			Ok(Err(err)) => return Err(RegistryError::ComponentFailure(err)),
			Err(_) => return Err(RegistryError::ComponentFailure(anyhow::anyhow!("component task panicked during startup"))),
		}

		self.components.lock().insert(id, managed);
		if self.shutdown.is_cancelled() {
			self.components.lock().remove(&id);
			return Err(RegistryError::ShutDown);
		}

		pending.disarm();
		debug!(target = "tether.registry", handle = id, "component registered");
		Ok(Handle::new(id))
	}

	/// Removes `handle` from the table and stops its component.
	///
	/// Waits for in-flight users to be cancelled and for teardown to finish.
	pub async fn unregister<C>(&self, handle: Handle<C>) -> Result<()> {
		let managed = self.components.lock().remove(&handle.id).ok_or(RegistryError::NotRegistered)?;
		debug!(target = "tether.registry", handle = handle.id, "unregistering component");
		managed.stop().await;
		debug!(target = "tether.registry", handle = handle.id, "component unregistered");
		Ok(())
	}

	/// Acquires the component behind `handle` for the lifetime of the guard.
	pub async fn acquire<C: Send + Sync + 'static>(&self, handle: Handle<C>) -> Result<ComponentGuard<C>> {
		let managed = self.components.lock().get(&handle.id).cloned().ok_or(RegistryError::NotRegistered)?;
		managed.acquire().await?.downcast::<C>()
	}

	/// Runs `body` against the component behind `handle`.
	///
	/// `body` is dropped if the component starts stopping while it runs, and
	/// the call then fails with [`RegistryError::NotRegistered`].
	pub async fn with_component<C, F, Fut>(&self, handle: Handle<C>, body: F) -> Result<Fut::Output>
	where
		C: Send + Sync + 'static,
		F: FnOnce(Arc<C>) -> Fut,
		Fut: Future,
	{
		let guard = self.acquire(handle).await?;
		let component = guard.component().clone();
		guard.run(body(component)).await
	}

	/// Returns whether `handle` is currently in the table.
	///
	/// The answer may be stale as soon as it is returned.
	pub fn is_registered<C>(&self, handle: Handle<C>) -> bool {
		self.components.lock().contains_key(&handle.id)
	}

	pub fn len(&self) -> usize {
		self.components.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.components.lock().is_empty()
	}

	/// Cancels every supervised task as a group and waits for them to exit.
	///
	/// Bypasses the per-component write lock; use [`Self::unregister`] for an
	/// orderly stop. Later registrations fail with [`RegistryError::ShutDown`].
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		self.tasks.close();
		self.tasks.wait().await;
		self.components.lock().clear();
		debug!(target = "tether.registry", "registry shut down");
	}
}

impl Drop for ComponentRegistry {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}
