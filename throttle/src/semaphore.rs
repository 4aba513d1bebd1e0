use std::sync::atomic::{AtomicBool, Ordering};

/// Token semaphore that is a no-op until configured with a non-zero size.
pub struct Semaphore {
    enabled: AtomicBool,
    sem: tokio::sync::Semaphore,
}

impl Semaphore {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sem: tokio::sync::Semaphore::const_new(0),
        }
    }

    pub fn setup(&self, value: usize) {
        self.enabled.store(value > 0, Ordering::Release);
        if value == 0 {
            return;
        }
        self.sem.forget_permits(self.sem.available_permits());
        self.sem.add_permits(value);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    // the semaphore is never closed, acquire can only fail after close()
    pub async fn acquire(&self) -> Option<tokio::sync::SemaphorePermit<'_>> {
        if self.is_enabled() {
            self.sem.acquire().await.ok()
        } else {
            None
        }
    }

    pub async fn consume(&self) {
        if self.is_enabled()
            && let Ok(permit) = self.sem.acquire().await
        {
            permit.forget();
        }
    }

    pub async fn run_replenish_thread(&self, replenish: usize, interval: std::time::Duration) {
        if !self.is_enabled() {
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

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_semaphore_never_blocks() {
        let sem = Semaphore::new();
        assert!(sem.acquire().await.is_none());
        for _ in 0..1000 {
            sem.consume().await;
        }
    }

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let sem = Semaphore::new();
        sem.setup(1);
        let permit = sem.acquire().await;
        assert!(permit.is_some());
        assert_eq!(sem.sem.available_permits(), 0);
        drop(permit);
        assert_eq!(sem.sem.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_tokens_are_replenished() {
        let sem = std::sync::Arc::new(Semaphore::new());
        sem.setup(2);
        sem.consume().await;
        sem.consume().await;
        assert_eq!(sem.sem.available_permits(), 0);
        let replenish = {
            let sem = sem.clone();
            tokio::spawn(async move {
                sem.run_replenish_thread(2, std::time::Duration::from_millis(100))
                    .await;
            })
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), sem.consume())
            .await
            .expect("token should be replenished");
        replenish.abort();
    }
}
