//! In-memory stand-in for the remote file service.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use gemini_context_core::contract::{Handle, RemoteClient, RemoteError, UnitCount};

type CostFn = Box<dyn Fn(&str, &[u8]) -> UnitCount + Send + Sync>;

pub struct FakeRemote {
    live: Mutex<HashMap<String, (Handle, Vec<u8>)>>,
    next_id: AtomicU64,
    cost: CostFn,
    /// display_name -> (remaining failures, error to return)
    store_failures: Mutex<HashMap<String, (u32, RemoteError)>>,
    measure_delay: Option<Duration>,
    pub store_calls: AtomicUsize,
    pub measure_calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new(cost: impl Fn(&str, &[u8]) -> UnitCount + Send + Sync + 'static) -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cost: Box::new(cost),
            store_failures: Mutex::new(HashMap::new()),
            measure_delay: None,
            store_calls: AtomicUsize::new(0),
            measure_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Every file costs `cost` units.
    pub fn flat(cost: UnitCount) -> Self {
        Self::new(move |_, _| cost)
    }

    pub fn with_measure_delay(mut self, delay: Duration) -> Self {
        self.measure_delay = Some(delay);
        self
    }

    /// Make the next `times` stores of `display_name` fail with `error`.
    pub fn fail_store(&self, display_name: &str, times: u32, error: RemoteError) {
        self.store_failures
            .lock()
            .unwrap()
            .insert(display_name.to_string(), (times, error));
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn live_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .live
            .lock()
            .unwrap()
            .values()
            .map(|(h, _)| h.display_name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn content_of(&self, display_name: &str) -> Option<Vec<u8>> {
        self.live
            .lock()
            .unwrap()
            .values()
            .find(|(h, _)| h.display_name == display_name)
            .map(|(_, c)| c.clone())
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn store(
        &self,
        content: &[u8],
        display_name: &str,
        mime_type: &str,
    ) -> Result<Handle, RemoteError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        {
            let mut failures = self.store_failures.lock().unwrap();
            if let Some((remaining, error)) = failures.get_mut(display_name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Handle {
            id: format!("files/{n}"),
            uri: format!("https://fake.test/v1beta/files/{n}"),
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
        };
        self.live
            .lock()
            .unwrap()
            .insert(handle.id.clone(), (handle.clone(), content.to_vec()));
        Ok(handle)
    }

    async fn measure(&self, handle: &Handle) -> Result<UnitCount, RemoteError> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.measure_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        let live = self.live.lock().unwrap();
        match live.get(&handle.id) {
            Some((h, content)) => Ok((self.cost)(&h.display_name, content)),
            None => Err(RemoteError::Permanent(format!("{} not found", handle.id))),
        }
    }

    async fn delete(&self, handle: &Handle) -> Result<(), RemoteError> {
        tokio::task::yield_now().await;
        match self.live.lock().unwrap().remove(&handle.id) {
            Some(_) => {
                self.deleted.lock().unwrap().push(handle.id.clone());
                Ok(())
            }
            None => Err(RemoteError::Permanent(format!("{} not found", handle.id))),
        }
    }

    async fn list(&self) -> Result<Vec<Handle>, RemoteError> {
        Ok(self
            .live
            .lock()
            .unwrap()
            .values()
            .map(|(h, _)| h.clone())
            .collect())
    }
}
