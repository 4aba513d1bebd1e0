//! Transfer throttling for the TPC daemon
//!
//! Two independent limits can be configured, both disabled by default:
//!
//! 1. **Transfer slots** - bounds how many transfer workers pull data at the same time. A worker
//!    holds a [`TransferGuard`] from before it opens the remote source until it finishes.
//! 2. **Chunk throttle** - limits the number of chunks read from remote sources per second,
//!    summed over all workers. Implemented as a token bucket replenished at a fixed interval.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! throttle::set_max_transfers(16);
//!
//! // 200 chunks per second: 20 tokens every 100ms
//! throttle::init_chunk_tokens(20);
//! tokio::spawn(throttle::run_chunk_replenish_thread(20, Duration::from_millis(100)));
//!
//! let _slot = throttle::transfer_permit().await;
//! throttle::get_chunk_token().await;
//! // read one chunk here
//! # }
//! ```

mod semaphore;

static TRANSFER_SLOTS: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);
static CHUNK_THROTTLE: std::sync::LazyLock<semaphore::Semaphore> =
    std::sync::LazyLock::new(semaphore::Semaphore::new);

/// Limits the number of concurrently running transfers, 0 disables the limit.
pub fn set_max_transfers(max_transfers: usize) {
    TRANSFER_SLOTS.setup(max_transfers);
}

/// Holds one transfer slot, released on drop.
pub struct TransferGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn transfer_permit() -> TransferGuard {
    TransferGuard {
        _permit: TRANSFER_SLOTS.acquire().await,
    }
}

pub fn init_chunk_tokens(chunk_tokens: usize) {
    CHUNK_THROTTLE.setup(chunk_tokens);
}

pub async fn get_chunk_token() {
    CHUNK_THROTTLE.consume().await;
}

pub async fn run_chunk_replenish_thread(replenish: usize, interval: std::time::Duration) {
    tracing::debug!(
        "replenishing {} chunk tokens every {:?}",
        replenish,
        interval
    );
    CHUNK_THROTTLE
        .run_replenish_thread(replenish, interval)
        .await;
}
