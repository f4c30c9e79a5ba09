//! Hosting of in-progress enrollment handshakes.
//!
//! An enrollment runs as a sequence of requests against the same backend
//! connection. Each handshake is registered as a component keyed by its
//! [`InvitationAddr`]; the component holds the connection ("peer") and a
//! single slot with the current step. Steps are advanced one request at a
//! time under a per-context mutex, since the connection does not support
//! concurrent operations.
//!
//! Starting a handshake for an address that already has one stops the old one
//! first. Once a request leaves the step slot empty (finished or aborted) the
//! context is unregistered.

pub mod claim;
pub mod greet;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_protocol::InvitationAddr;
use tether_runtime::{ComponentFactory, ComponentRegistry, Handle, RegistryError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A step of a handshake protocol.
pub trait Step: Send + 'static {
	fn name(&self) -> &'static str;
}

/// Opens the connection for one handshake and runs its first exchange.
pub trait Handshake: Send + 'static {
	type Peer: Send + Sync + 'static;
	type Step: Step;

	fn start(self) -> impl Future<Output = anyhow::Result<(Self::Peer, Self::Step)>> + Send;
}

/// A running handshake: its connection and current step.
pub struct EnrollmentCtx<P, S> {
	peer: P,
	step: Arc<AsyncMutex<Option<S>>>,
	terminated: AtomicBool,
}

impl<P, S> EnrollmentCtx<P, S> {
	pub fn peer(&self) -> &P {
		&self.peer
	}

	pub fn is_terminated(&self) -> bool {
		self.terminated.load(Ordering::Acquire)
	}
}

struct HandshakeFactory<H: Handshake> {
	handshake: Option<H>,
}

impl<H: Handshake> ComponentFactory for HandshakeFactory<H> {
	type Component = EnrollmentCtx<H::Peer, H::Step>;

	async fn start(&mut self) -> anyhow::Result<Self::Component> {
		let handshake = self.handshake.take().ok_or_else(|| anyhow::anyhow!("handshake already started"))?;
		let (peer, step) = handshake.start().await?;
		Ok(EnrollmentCtx {
			peer,
			step: Arc::new(AsyncMutex::new(Some(step))),
			terminated: AtomicBool::new(false),
		})
	}
}

/// Exclusive access to a context's current step for one request.
pub struct StepSlot<P, S> {
	ctx: Arc<EnrollmentCtx<P, S>>,
	step: OwnedMutexGuard<Option<S>>,
}

impl<P, S: Step> StepSlot<P, S> {
	pub fn peer(&self) -> &P {
		&self.ctx.peer
	}

	pub fn current(&self) -> Option<&S> {
		self.step.as_ref()
	}

	/// Name of the current step, `"terminated"` once the slot is empty.
	pub fn current_name(&self) -> &'static str {
		self.step.as_ref().map_or("terminated", Step::name)
	}

	pub fn update(&mut self, step: S) {
		*self.step = Some(step);
	}

	pub fn take(&mut self) -> Option<S> {
		self.step.take()
	}

	pub fn mark_as_terminated(&mut self) {
		*self.step = None;
	}

	pub fn is_terminated(&self) -> bool {
		self.step.is_none()
	}

	pub(crate) fn invalid_state(&self, expected: &'static str) -> Error {
		Error::InvalidState {
			expected,
			found: self.current_name(),
		}
	}
}

impl<P, S> Drop for StepSlot<P, S> {
	fn drop(&mut self) {
		self.ctx.terminated.store(self.step.is_none(), Ordering::Release);
	}
}

/// Registry client hosting one handshake context per invitation address.
pub struct EnrollmentManager<P, S> {
	registry: Arc<ComponentRegistry>,
	contexts: Mutex<HashMap<InvitationAddr, Handle<EnrollmentCtx<P, S>>>>,
	label: &'static str,
}

impl<P, S> EnrollmentManager<P, S>
where
	P: Send + Sync + 'static,
	S: Step,
{
	/// `label` names the manager in logs, e.g. `"claim"` or `"greet"`.
	pub fn new(registry: Arc<ComponentRegistry>, label: &'static str) -> Self {
		Self {
			registry,
			contexts: Mutex::new(HashMap::new()),
			label,
		}
	}

	/// Starts `handshake` for `addr`, replacing any running one, then runs `body`
	/// against the new context.
	pub async fn start_context<H, F, Fut, T>(&self, addr: &InvitationAddr, handshake: H, body: F) -> Result<T>
	where
		H: Handshake<Peer = P, Step = S>,
		F: FnOnce(StepSlot<P, S>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let previous = self.contexts.lock().get(addr).copied();
		if let Some(previous) = previous {
			info!(target = "tether.enrollment", kind = self.label, %addr, "superseding running context");
			self.stop_context(addr, previous).await;
		}

		let handle = self
			.registry
			.register(HandshakeFactory { handshake: Some(handshake) })
			.await
			.map_err(|err| Error::from_registry(err, Error::ContextNotStarted))?;

		let displaced = self.contexts.lock().insert(addr.clone(), handle);
		if let Some(displaced) = displaced.filter(|displaced| *displaced != handle) {
			// A concurrent start for the same address registered in between.
			unregister_quietly(&self.registry, displaced).await;
		}
		debug!(target = "tether.enrollment", kind = self.label, %addr, handle = handle.id(), "context started");

		self.run_in_context(addr, handle, body).await
	}

	/// Runs `body` against the running context for `addr`.
	pub async fn retrieve_context<F, Fut, T>(&self, addr: &InvitationAddr, body: F) -> Result<T>
	where
		F: FnOnce(StepSlot<P, S>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let handle = self.contexts.lock().get(addr).copied().ok_or(Error::ContextNotStarted)?;
		self.run_in_context(addr, handle, body).await
	}

	/// Stops the context for `addr`, if any.
	pub async fn stop(&self, addr: &InvitationAddr) -> bool {
		let handle = self.contexts.lock().get(addr).copied();
		match handle {
			Some(handle) => {
				self.stop_context(addr, handle).await;
				true
			}
			None => false,
		}
	}

	pub fn is_started(&self, addr: &InvitationAddr) -> bool {
		self.contexts.lock().contains_key(addr)
	}

	pub fn len(&self) -> usize {
		self.contexts.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.contexts.lock().is_empty()
	}

	async fn run_in_context<F, Fut, T>(&self, addr: &InvitationAddr, handle: Handle<EnrollmentCtx<P, S>>, body: F) -> Result<T>
	where
		F: FnOnce(StepSlot<P, S>) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let guard = self
			.registry
			.acquire(handle)
			.await
			.map_err(|err| Error::from_registry(err, Error::ContextNotStarted))?;
		let ctx = guard.component().clone();

		let outcome = guard
			.run(async {
				let step = ctx.step.clone().lock_owned().await;
				body(StepSlot { ctx: ctx.clone(), step }).await
			})
			.await;
		// Release the read lock before a possible stop write-acquires it.
		drop(guard);

		let terminated = ctx.is_terminated();
		drop(ctx);

		let outcome = outcome.map_err(|err| Error::from_registry(err, Error::ContextNotStarted))?;
		if terminated {
			debug!(target = "tether.enrollment", kind = self.label, %addr, "context finished");
			self.stop_context(addr, handle).await;
		}
		outcome
	}

	/// Unregisters `handle` and forgets it, unless `addr` already maps to a newer context.
	async fn stop_context(&self, addr: &InvitationAddr, handle: Handle<EnrollmentCtx<P, S>>) {
		{
			let mut contexts = self.contexts.lock();
			if contexts.get(addr) == Some(&handle) {
				contexts.remove(addr);
			}
		}
		unregister_quietly(&self.registry, handle).await;
	}
}

async fn unregister_quietly<C>(registry: &ComponentRegistry, handle: Handle<C>) {
	match registry.unregister(handle).await {
		Ok(()) | Err(RegistryError::NotRegistered) => {}
		Err(err) => debug!(target = "tether.enrollment", handle = handle.id(), error = %err, "failed to stop context"),
	}
}
