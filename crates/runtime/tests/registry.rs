use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tether_runtime::{ComponentFactory, ComponentRegistry, RegistryError, WriterPriorityLock};
use tokio::sync::Notify;
use tokio::time::timeout;

#[derive(Default)]
struct Counters {
	started: AtomicUsize,
	torn_down: AtomicUsize,
}

struct Service {
	counters: Arc<Counters>,
	crash: Option<Arc<Notify>>,
}

impl Service {
	fn new(counters: &Arc<Counters>) -> Self {
		Self {
			counters: counters.clone(),
			crash: None,
		}
	}
}

impl ComponentFactory for Service {
	type Component = &'static str;

	async fn start(&mut self) -> anyhow::Result<&'static str> {
		self.counters.started.fetch_add(1, Ordering::SeqCst);
		Ok("service")
	}

	async fn supervise(&mut self, _component: Arc<&'static str>) -> anyhow::Result<()> {
		match &self.crash {
			Some(trigger) => {
				trigger.notified().await;
				anyhow::bail!("backend connection lost")
			}
			None => std::future::pending().await,
		}
	}

	async fn teardown(self, _component: Arc<&'static str>) {
		self.counters.torn_down.fetch_add(1, Ordering::SeqCst);
	}
}

#[tokio::test]
async fn concurrent_readers_are_all_granted() {
	let lock = WriterPriorityLock::new();
	let guards = join_all((0..16).map(|_| lock.read_acquire())).await;

	assert_eq!(lock.reader_count(), 16);
	for guard in guards {
		assert!(guard.release().is_ok());
	}
}

#[tokio::test]
async fn writer_waits_for_every_cancelled_reader() {
	let lock = WriterPriorityLock::new();
	let released = Arc::new(AtomicUsize::new(0));

	let mut readers = Vec::new();
	for _ in 0..4 {
		let guard = lock.read_acquire().await;
		let released = released.clone();
		readers.push(tokio::spawn(async move {
			guard.cancelled().await;
			tokio::time::sleep(Duration::from_millis(10)).await;
			released.fetch_add(1, Ordering::SeqCst);
			guard.release()
		}));
	}

	let _write = timeout(Duration::from_secs(2), lock.write_acquire()).await.expect("writer granted");
	assert_eq!(released.load(Ordering::SeqCst), 4);
	for reader in readers {
		assert!(reader.await.unwrap().is_err());
	}
}

#[tokio::test]
async fn register_then_acquire_succeeds() {
	let registry = ComponentRegistry::new();
	let counters = Arc::new(Counters::default());

	let handle = registry.register(Service::new(&counters)).await.unwrap();
	let guard = registry.acquire(handle).await.unwrap();

	assert_eq!(*guard, "service");
	assert_eq!(counters.started.load(Ordering::SeqCst), 1);
	assert!(registry.is_registered(handle));
}

#[tokio::test]
async fn abandoned_registration_tears_the_component_down() {
	let registry = ComponentRegistry::new();
	let counters = Arc::new(Counters::default());

	let mut registration = Box::pin(registry.register(Service::new(&counters)));
	assert!(futures_util::poll!(&mut registration).is_pending());
	timeout(Duration::from_secs(2), async {
		while counters.started.load(Ordering::SeqCst) == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("component starts");
	drop(registration);

	timeout(Duration::from_secs(2), async {
		while counters.torn_down.load(Ordering::SeqCst) == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("abandoned component is torn down");
	assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
	assert!(registry.is_empty());
}

#[tokio::test]
async fn acquire_after_unregister_fails_for_every_racer() {
	let registry = Arc::new(ComponentRegistry::new());
	let counters = Arc::new(Counters::default());
	let handle = registry.register(Service::new(&counters)).await.unwrap();

	let racers: Vec<_> = (0..8)
		.map(|_| {
			let registry = registry.clone();
			tokio::spawn(async move {
				registry
					.with_component(handle, |_service| async {
						tokio::time::sleep(Duration::from_secs(30)).await;
					})
					.await
			})
		})
		.collect();
	tokio::time::sleep(Duration::from_millis(10)).await;

	timeout(Duration::from_secs(2), registry.unregister(handle)).await.expect("unregister completes").unwrap();

	for racer in racers {
		assert!(matches!(racer.await.unwrap(), Err(RegistryError::NotRegistered)));
	}
	assert!(matches!(registry.acquire(handle).await, Err(RegistryError::NotRegistered)));
	assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failure_during_startup_propagates_from_register() {
	struct Refuses;

	impl ComponentFactory for Refuses {
		type Component = ();

		async fn start(&mut self) -> anyhow::Result<()> {
			anyhow::bail!("bad credentials")
		}
	}

	let registry = ComponentRegistry::new();
	let err = registry.register(Refuses).await.unwrap_err();

	assert!(matches!(err, RegistryError::ComponentFailure(_)));
	assert!(registry.is_empty());
}

#[tokio::test]
async fn panic_during_startup_propagates_from_register() {
	struct Panics;

	impl ComponentFactory for Panics {
		type Component = ();

		async fn start(&mut self) -> anyhow::Result<()> {
			panic!("engine bug")
		}
	}

	let registry = ComponentRegistry::new();
	let err = registry.register(Panics).await.unwrap_err();
	assert!(matches!(err, RegistryError::ComponentFailure(_)));
}

#[tokio::test]
async fn crash_after_start_only_affects_that_component() {
	let registry = ComponentRegistry::new();
	let counters = Arc::new(Counters::default());
	let trigger = Arc::new(Notify::new());

	let crashing = registry
		.register(Service {
			counters: counters.clone(),
			crash: Some(trigger.clone()),
		})
		.await
		.unwrap();
	let sibling = registry.register(Service::new(&counters)).await.unwrap();

	trigger.notify_one();
	timeout(Duration::from_secs(2), async {
		while registry.is_registered(crashing) {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("crashed component leaves the table");

	assert_eq!(counters.torn_down.load(Ordering::SeqCst), 1);
	assert!(matches!(registry.acquire(crashing).await, Err(RegistryError::NotRegistered)));
	assert!(matches!(registry.unregister(crashing).await, Err(RegistryError::NotRegistered)));
	assert!(registry.acquire(sibling).await.is_ok());
	assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn shutdown_tears_down_every_component() {
	let registry = ComponentRegistry::new();
	let counters = Arc::new(Counters::default());
	for _ in 0..3 {
		registry.register(Service::new(&counters)).await.unwrap();
	}

	timeout(Duration::from_secs(2), registry.shutdown()).await.expect("shutdown completes");
	assert_eq!(counters.torn_down.load(Ordering::SeqCst), 3);
	assert!(registry.is_empty());
}
