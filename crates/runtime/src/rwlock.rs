//! Read/write lock where a pending writer preempts the readers holding it.
//!
//! Readers are admitted concurrently as long as no writer is active. Once a
//! writer wins the lock it immediately closes the door to new readers, cancels
//! every reader currently registered, and waits for all of them to release
//! before its guard is handed out.
//!
//! Cancellation is cooperative: a reader learns about it through
//! [`ReadGuard::cancelled`] or by running its work inside
//! [`ReadGuard::run_until_cancelled`]. A reader that never looks at its token
//! keeps the writer waiting for as long as it holds the guard.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::ReadCancelledByWriter;

#[derive(Debug, Default)]
struct LockState {
	writer_active: bool,
	next_reader: u64,
	readers: HashMap<u64, CancellationToken>,
}

/// Writer-priority read/write lock.
///
/// Cloning yields another handle on the same lock.
#[derive(Debug, Clone)]
pub struct WriterPriorityLock {
	state: Arc<watch::Sender<LockState>>,
}

impl Default for WriterPriorityLock {
	fn default() -> Self {
		Self::new()
	}
}

impl WriterPriorityLock {
	pub fn new() -> Self {
		let (state, _) = watch::channel(LockState::default());
		Self { state: Arc::new(state) }
	}

	/// Waits until no writer is active, then registers a new reader.
	pub async fn read_acquire(&self) -> ReadGuard {
		loop {
			if let Some(guard) = self.try_read_acquire() {
				return guard;
			}
			let mut rx = self.state.subscribe();
			// The sender lives as long as `self`, so this only returns once the writer is gone.
			let _ = rx.wait_for(|state| !state.writer_active).await;
		}
	}

	/// Registers a reader if no writer currently holds or awaits the lock.
	pub fn try_read_acquire(&self) -> Option<ReadGuard> {
		let mut admitted = None;
		self.state.send_if_modified(|state| {
			if state.writer_active {
				return false;
			}
			let id = state.next_reader;
			state.next_reader += 1;
			let token = CancellationToken::new();
			state.readers.insert(id, token.clone());
			admitted = Some((id, token));
			true
		});

		admitted.map(|(id, token)| ReadGuard {
			state: Arc::clone(&self.state),
			id,
			token,
		})
	}

	/// Takes the writer slot, cancels current readers and waits for them to drain.
	///
	/// Dropping the returned future before completion gives the writer slot back.
	pub async fn write_acquire(&self) -> WriteGuard {
		let mut rx = self.state.subscribe();
		loop {
			let won = self.state.send_if_modified(|state| {
				if state.writer_active {
					return false;
				}
				state.writer_active = true;
				true
			});
			if won {
				break;
			}
			let _ = rx.wait_for(|state| !state.writer_active).await;
		}

		// From here on no reader can join; the guard restores that on drop.
		let guard = WriteGuard {
			state: Arc::clone(&self.state),
		};

		let cancelled = {
			let state = self.state.borrow();
			for token in state.readers.values() {
				token.cancel();
			}
			state.readers.len()
		};
		if cancelled > 0 {
			trace!(target = "tether.lock", readers = cancelled, "writer cancelled active readers");
		}

		let _ = rx.wait_for(|state| state.readers.is_empty()).await;
		guard
	}

	/// Number of readers currently holding the lock.
	pub fn reader_count(&self) -> usize {
		self.state.borrow().readers.len()
	}

	/// Returns `true` while a writer holds or is acquiring the lock.
	pub fn writer_active(&self) -> bool {
		self.state.borrow().writer_active
	}
}

/// Shared access to a [`WriterPriorityLock`].
///
/// Released on drop. A writer may cancel the guard at any time; callers that
/// care about the difference use [`ReadGuard::release`] or
/// [`ReadGuard::run_until_cancelled`].
#[derive(Debug)]
#[must_use = "the read lock is released as soon as the guard is dropped"]
pub struct ReadGuard {
	state: Arc<watch::Sender<LockState>>,
	id: u64,
	token: CancellationToken,
}

impl ReadGuard {
	/// Returns `true` once a writer has asked this reader to go away.
	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Resolves when a writer cancels this reader.
	pub async fn cancelled(&self) {
		self.token.cancelled().await
	}

	/// Drives `fut` until it completes or a writer cancels this reader.
	///
	/// On cancellation `fut` is dropped before this returns.
	pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, ReadCancelledByWriter> {
		if self.token.is_cancelled() {
			return Err(ReadCancelledByWriter);
		}
		tokio::select! {
			biased;
			_ = self.token.cancelled() => Err(ReadCancelledByWriter),
			output = fut => Ok(output),
		}
	}

	/// Releases the lock, reporting whether a writer cancelled this read.
	pub fn release(self) -> Result<(), ReadCancelledByWriter> {
		if self.token.is_cancelled() { Err(ReadCancelledByWriter) } else { Ok(()) }
	}
}

impl Drop for ReadGuard {
	fn drop(&mut self) {
		let id = self.id;
		self.state.send_if_modified(|state| state.readers.remove(&id).is_some() && state.readers.is_empty());
	}
}

/// Exclusive access to a [`WriterPriorityLock`]. Released on drop.
#[derive(Debug)]
#[must_use = "the write lock is released as soon as the guard is dropped"]
pub struct WriteGuard {
	state: Arc<watch::Sender<LockState>>,
}

impl Drop for WriteGuard {
	fn drop(&mut self) {
		self.state.send_modify(|state| state.writer_active = false);
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::time::timeout;

	use super::*;

	#[tokio::test]
	async fn readers_share_the_lock() {
		let lock = WriterPriorityLock::new();
		let first = lock.read_acquire().await;
		let second = lock.read_acquire().await;

		assert_eq!(lock.reader_count(), 2);
		assert!(first.release().is_ok());
		assert!(second.release().is_ok());
		assert_eq!(lock.reader_count(), 0);
	}

	#[tokio::test]
	async fn writer_cancels_readers_and_waits_for_drain() {
		let lock = WriterPriorityLock::new();
		let reader = lock.read_acquire().await;

		let writer = tokio::spawn({
			let lock = lock.clone();
			async move {
				let _guard = lock.write_acquire().await;
			}
		});

		timeout(Duration::from_secs(1), reader.cancelled()).await.expect("writer should cancel the reader");
		assert!(lock.writer_active());
		assert!(!writer.is_finished());

		assert!(reader.release().is_err());
		timeout(Duration::from_secs(1), writer).await.expect("writer should be granted").unwrap();
		assert!(!lock.writer_active());
	}

	#[tokio::test]
	async fn pending_writer_blocks_new_readers() {
		let lock = WriterPriorityLock::new();
		let writer = lock.write_acquire().await;

		assert!(lock.try_read_acquire().is_none());
		assert!(timeout(Duration::from_millis(50), lock.read_acquire()).await.is_err());

		drop(writer);
		let reader = timeout(Duration::from_secs(1), lock.read_acquire()).await.expect("reader admitted after writer");
		assert!(!reader.is_cancelled());
	}

	#[tokio::test]
	async fn writers_are_mutually_exclusive() {
		let lock = WriterPriorityLock::new();
		let first = lock.write_acquire().await;

		let second = tokio::spawn({
			let lock = lock.clone();
			async move {
				let _guard = lock.write_acquire().await;
			}
		});
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!second.is_finished());

		drop(first);
		timeout(Duration::from_secs(1), second).await.expect("second writer granted").unwrap();
	}

	#[tokio::test]
	async fn run_until_cancelled_drops_work_on_cancel() {
		let lock = WriterPriorityLock::new();
		let reader = lock.read_acquire().await;

		let writer = tokio::spawn({
			let lock = lock.clone();
			async move {
				let _guard = lock.write_acquire().await;
			}
		});

		let outcome = reader.run_until_cancelled(std::future::pending::<()>()).await;
		assert_eq!(outcome, Err(ReadCancelledByWriter));
		drop(reader);
		timeout(Duration::from_secs(1), writer).await.expect("writer granted").unwrap();
	}

	#[tokio::test]
	async fn dropped_write_acquire_restores_readers() {
		let lock = WriterPriorityLock::new();
		let reader = lock.read_acquire().await;

		// Writer stalls on the reader and then gives up.
		assert!(timeout(Duration::from_millis(20), lock.write_acquire()).await.is_err());
		assert!(!lock.writer_active());
		drop(reader);

		let again = lock.try_read_acquire();
		assert!(again.is_some());
	}
}
