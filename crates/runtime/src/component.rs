//! Lifetime management for a single long-lived component.
//!
//! A [`ManagedComponent`] runs one [`ComponentFactory`] inside a supervised
//! task. Every use of the component goes through a read acquisition of the
//! component's [`WriterPriorityLock`], every stop through a write acquisition,
//! so a stop waits for (and cancels) in-flight users before teardown starts.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RegistryError, Result};
use crate::rwlock::{ReadGuard, WriterPriorityLock};

/// Type-erased component stored by the registry.
pub trait Component: DowncastSync {}

impl<T: Send + Sync + 'static> Component for T {}

impl_downcast!(sync Component);

/// Builds, supervises and tears down one component.
///
/// `start` runs inside the supervised task; its error is reported back to the
/// caller waiting on registration. Once started, `supervise` runs alongside
/// the component until it stops: returning (or failing) tears the component
/// down. `teardown` runs exactly once, after the component has been made
/// unreachable to new acquirers.
pub trait ComponentFactory: Sized + Send + 'static {
	type Component: Send + Sync + 'static;

	fn start(&mut self) -> impl Future<Output = anyhow::Result<Self::Component>> + Send;

	fn supervise(&mut self, component: Arc<Self::Component>) -> impl Future<Output = anyhow::Result<()>> + Send {
		drop(component);
		std::future::pending()
	}

	fn teardown(self, component: Arc<Self::Component>) -> impl Future<Output = ()> + Send {
		async move { drop(component) }
	}
}

/// One component plus the lock and tokens that govern its lifetime.
pub struct ManagedComponent {
	lock: WriterPriorityLock,
	slot: Mutex<Option<Arc<dyn Component>>>,
	cancel: CancellationToken,
	stopped: CancellationToken,
}

impl std::fmt::Debug for ManagedComponent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManagedComponent")
			.field("running", &self.slot.lock().is_some())
			.field("stopped", &self.stopped.is_cancelled())
			.finish()
	}
}

/// Clears the slot and flags the component stopped however the task exits.
struct StoppedGuard<'a>(&'a ManagedComponent);

impl Drop for StoppedGuard<'_> {
	fn drop(&mut self) {
		self.0.slot.lock().take();
		self.0.stopped.cancel();
	}
}

impl ManagedComponent {
	/// Creates an empty component whose task will stop when `cancel` fires.
	pub(crate) fn new(cancel: CancellationToken) -> Self {
		Self {
			lock: WriterPriorityLock::new(),
			slot: Mutex::new(None),
			cancel,
			stopped: CancellationToken::new(),
		}
	}

	/// Body of the supervised task.
	///
	/// Reports the outcome of `start` through `started`. If nobody is left to
	/// receive that report, the component is torn down straight away.
	pub(crate) async fn run<F: ComponentFactory>(self: Arc<Self>, mut factory: F, started: oneshot::Sender<anyhow::Result<()>>) {
		let _stopped = StoppedGuard(&*self);

		let component = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => {
				let _ = started.send(Err(anyhow::anyhow!("component cancelled during startup")));
				return;
			}
			result = factory.start() => match result {
				Ok(component) => Arc::new(component),
				Err(err) => {
					debug!(target = "tether.registry", error = %err, "component failed to start");
					let _ = started.send(Err(err));
					return;
				}
			},
		};

		*self.slot.lock() = Some(component.clone() as Arc<dyn Component>);
		if started.send(Ok(())).is_err() {
			debug!(target = "tether.registry", "registration abandoned; stopping component");
			self.cancel.cancel();
		}

		let crashed = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => false,
			outcome = factory.supervise(component.clone()) => {
				match outcome {
					Ok(()) => debug!(target = "tether.registry", "component finished on its own"),
					Err(err) => warn!(target = "tether.registry", error = %err, "component crashed"),
				}
				true
			}
		};

		// On a crash nobody holds the write lock yet, unless a concurrent stop
		// already won it, in which case that stop cancels us.
		let _write = if crashed {
			tokio::select! {
				guard = self.lock.write_acquire() => Some(guard),
				_ = self.cancel.cancelled() => None,
			}
		} else {
			None
		};

		self.slot.lock().take();
		factory.teardown(component).await;
		debug!(target = "tether.registry", "component stopped");
	}

	/// Write-acquires the lock, stops the component and waits for teardown.
	///
	/// Calling this again after the component stopped returns immediately.
	pub async fn stop(&self) {
		let _write = self.lock.write_acquire().await;
		self.cancel.cancel();
		self.stopped.cancelled().await;
	}

	/// Stops the component without waiting, for one nobody can reach yet.
	pub(crate) fn abandon(&self) {
		self.cancel.cancel();
	}

	/// Read-acquires the component for the lifetime of the returned guard.
	pub async fn acquire(&self) -> Result<ComponentGuard<dyn Component>> {
		let read = self.lock.read_acquire().await;
		let Some(component) = self.slot.lock().clone() else {
			return Err(RegistryError::NotRegistered);
		};
		Ok(ComponentGuard { component, read })
	}

	/// Returns `true` once teardown completed.
	pub fn is_stopped(&self) -> bool {
		self.stopped.is_cancelled()
	}
}

/// A component held for the duration of one use.
///
/// Holds a read acquisition of the component's lock. A concurrent stop cancels
/// the acquisition; work run through [`ComponentGuard::run`] then fails with
/// [`RegistryError::NotRegistered`].
#[must_use = "the component is released as soon as the guard is dropped"]
pub struct ComponentGuard<C: ?Sized> {
	component: Arc<C>,
	read: ReadGuard,
}

impl<C: ?Sized> ComponentGuard<C> {
	pub fn component(&self) -> &Arc<C> {
		&self.component
	}

	/// Returns `true` once a stop has cancelled this use.
	pub fn is_cancelled(&self) -> bool {
		self.read.is_cancelled()
	}

	/// Resolves when a stop cancels this use.
	pub async fn cancelled(&self) {
		self.read.cancelled().await
	}

	/// Drives `fut` until it completes or the component starts stopping.
	pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
		Ok(self.read.run_until_cancelled(fut).await?)
	}

	/// Releases the component, failing if a stop cancelled this use.
	pub fn release(self) -> Result<()> {
		Ok(self.read.release()?)
	}
}

impl ComponentGuard<dyn Component> {
	/// Recovers the concrete component type.
	pub fn downcast<C: Send + Sync + 'static>(self) -> Result<ComponentGuard<C>> {
		let Self { component, read } = self;
		match component.downcast_arc::<C>() {
			Ok(component) => Ok(ComponentGuard { component, read }),
			Err(_) => Err(RegistryError::NotRegistered),
		}
	}
}

impl<C: ?Sized> Deref for ComponentGuard<C> {
	type Target = C;

	fn deref(&self) -> &C {
		&self.component
	}
}

impl<C: ?Sized> std::fmt::Debug for ComponentGuard<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComponentGuard").field("cancelled", &self.is_cancelled()).finish()
	}
}
