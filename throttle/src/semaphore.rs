use std::sync::Arc;

/// Counting semaphore that can be switched off entirely.
///
/// A disabled semaphore hands out no permits and never blocks; this is how "0 = no limit"
/// settings are expressed without branching at every call site.
#[derive(Debug, Clone)]
pub struct Semaphore {
    enabled: bool,
    sem: Arc<tokio::sync::Semaphore>,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            enabled: value > 0,
            sem: Arc::new(tokio::sync::Semaphore::new(value)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn acquire_owned(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        if !self.enabled {
            return None;
        }
        // the semaphore is never closed, acquire can only fail after close()
        Some(
            self.sem
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed"),
        )
    }

    pub async fn consume(&self) {
        if self.enabled {
            self.sem
                .acquire()
                .await
                .expect("semaphore is never closed")
                .forget();
        }
    }

    pub async fn run_replenish_thread(&self, replenish: usize, interval: std::time::Duration) {
        if !self.enabled {
            return;
        }
        loop {
            tokio::time::sleep(interval).await;
            let curr_permits = self.sem.available_permits();
            if curr_permits >= replenish {
                continue;
            }
            self.sem.add_permits(replenish - curr_permits);
        }
    }
}
