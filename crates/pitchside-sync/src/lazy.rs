//! # Visibility-Triggered Lazy Loading
//!
//! ```text
//! setup(observer, ".player-card", loader)
//!    │  observer.query(selector) ──► [e1, e2, e3]
//!    │  observer.observe(e, tx)  for each
//!    ▼
//! listener task:  rx ◄── e2 became visible
//!                  ├── first time? unobserve(e2), spawn loader(e2)
//!                  └── repeat     ignored
//! ```
//!
//! Each element loads at most once. Dropping the [`LazyLoadHandle`] stops the
//! listener and unobserves whatever has not become visible yet.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::lock;

/// Opaque element identifier issued by the observer.
pub type ElementId = String;

/// Platform viewport-intersection primitive.
pub trait ViewportObserver: Send + Sync {
    /// Elements matching `selector`.
    fn query(&self, selector: &str) -> Vec<ElementId>;

    /// Starts watching `element`; send its id on `visible` when it intersects
    /// the viewport.
    fn observe(&self, element: &ElementId, visible: mpsc::UnboundedSender<ElementId>);

    fn unobserve(&self, element: &ElementId);
}

/// Listener for one `setup` call.
pub struct LazyLoadHandle {
    task: Option<JoinHandle<()>>,
    waiting: Arc<Mutex<HashSet<ElementId>>>,
    observer: Arc<dyn ViewportObserver>,
}

impl LazyLoadHandle {
    /// Elements still waiting to become visible.
    pub fn remaining(&self) -> usize {
        lock(&self.waiting).len()
    }

    /// Stops listening and unobserves the remaining elements.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let remaining: Vec<ElementId> = lock(&self.waiting).drain().collect();
        for element in &remaining {
            self.observer.unobserve(element);
        }
        if !remaining.is_empty() {
            debug!(count = remaining.len(), "Lazy loading cancelled");
        }
    }
}

impl Drop for LazyLoadHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn setup<F, Fut>(
    observer: Arc<dyn ViewportObserver>,
    selector: &str,
    loader: F,
) -> LazyLoadHandle
where
    F: Fn(ElementId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    let elements = observer.query(selector);
    let waiting = Arc::new(Mutex::new(elements.iter().cloned().collect::<HashSet<_>>()));
    debug!(selector, count = elements.len(), "Observing elements for lazy load");

    let (tx, mut rx) = mpsc::unbounded_channel();
    for element in &elements {
        observer.observe(element, tx.clone());
    }
    drop(tx);

    let task_waiting = Arc::clone(&waiting);
    let task_observer = Arc::clone(&observer);
    let task = tokio::spawn(async move {
        while let Some(element) = rx.recv().await {
            let remaining = {
                let mut waiting = lock(&task_waiting);
                if !waiting.remove(&element) {
                    continue;
                }
                waiting.len()
            };

            task_observer.unobserve(&element);
            debug!(element, "Element visible, loading");

            let load = loader(element.clone());
            tokio::spawn(async move {
                if let Err(e) = load.await {
                    warn!(element, ?e, "Lazy load failed");
                }
            });

            if remaining == 0 {
                break;
            }
        }
    });

    LazyLoadHandle {
        task: Some(task),
        waiting,
        observer,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In-process observer: tests decide when elements become visible.
    #[derive(Default)]
    pub struct FakeObserver {
        pub elements: Vec<ElementId>,
        pub observed: Mutex<HashMap<ElementId, mpsc::UnboundedSender<ElementId>>>,
        pub unobserved: Mutex<Vec<ElementId>>,
    }

    impl FakeObserver {
        pub fn with_elements(elements: &[&str]) -> Self {
            FakeObserver {
                elements: elements.iter().map(|e| e.to_string()).collect(),
                ..Default::default()
            }
        }

        /// Fires the intersection callback, if the element is still observed.
        pub fn reveal(&self, element: &str) {
            if let Some(tx) = lock(&self.observed).get(element) {
                let _ = tx.send(element.to_string());
            }
        }
    }

    impl ViewportObserver for FakeObserver {
        fn query(&self, _selector: &str) -> Vec<ElementId> {
            self.elements.clone()
        }

        fn observe(&self, element: &ElementId, visible: mpsc::UnboundedSender<ElementId>) {
            lock(&self.observed).insert(element.clone(), visible);
        }

        fn unobserve(&self, element: &ElementId) {
            lock(&self.observed).remove(element);
            lock(&self.unobserved).push(element.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeObserver;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loads_once_on_first_visibility() {
        let observer = Arc::new(FakeObserver::with_elements(&["card-1", "card-2"]));
        let loaded = Arc::new(Mutex::new(Vec::new()));

        let sink = loaded.clone();
        let handle = setup(observer.clone(), ".card", move |element| {
            let sink = sink.clone();
            async move {
                lock(&sink).push(element);
                Ok(())
            }
        });
        assert_eq!(handle.remaining(), 2);

        // Capture the sender so a repeat intersection can still be delivered
        let card1 = lock(&observer.observed).get("card-1").cloned().unwrap();
        observer.reveal("card-1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        card1.send("card-1".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*lock(&loaded), vec!["card-1".to_string()]);
        assert_eq!(handle.remaining(), 1);
        assert_eq!(*lock(&observer.unobserved), vec!["card-1".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_unobserves_pending() {
        let observer = Arc::new(FakeObserver::with_elements(&["a", "b"]));
        let handle = setup(observer.clone(), ".x", |_| async { Ok(()) });
        drop(handle);

        let mut unobserved = lock(&observer.unobserved).clone();
        unobserved.sort();
        assert_eq!(unobserved, vec!["a".to_string(), "b".to_string()]);
        assert!(lock(&observer.observed).is_empty());
    }
}
