//! Transfer concurrency limits and dispatch rate limiting
//!
//! Transfers are blocking I/O (large copies, cross-device moves, `rclone` processes). When many
//! delayed dispatch jobs fire together they would otherwise all hit the disk at once. This crate
//! provides two process-wide knobs, both disabled by default:
//!
//! 1. **Transfer slots** - maximum number of transfers executing simultaneously
//! 2. **Dispatch throttle** - maximum number of dispatches started per second
//!
//! # Transfer slots
//!
//! ```rust,no_run
//! # async fn example() {
//! throttle::set_max_concurrent_transfers(4);
//!
//! let _slot = throttle::transfer_permit().await;
//! // run the transfer, the slot is released when `_slot` is dropped
//! # }
//! ```
//!
//! # Dispatch throttle
//!
//! Token bucket replenished by a background task:
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! # async fn example() {
//! // 10 tokens every 100ms = 100 dispatches per second
//! throttle::init_dispatch_tokens(10);
//! tokio::spawn(throttle::run_dispatch_replenish_thread(10, Duration::from_millis(100)));
//!
//! throttle::get_dispatch_token().await;
//! # }
//! ```

mod semaphore;

static TRANSFER_SLOTS: semaphore::Semaphore = semaphore::Semaphore::new();
static DISPATCH_THROTTLE: semaphore::Semaphore = semaphore::Semaphore::new();

/// Limit the number of concurrently running transfers, 0 means no limit.
pub fn set_max_concurrent_transfers(max_transfers: usize) {
    TRANSFER_SLOTS.setup(max_transfers);
}

pub struct TransferGuard {
    _permit: Option<tokio::sync::SemaphorePermit<'static>>,
}

pub async fn transfer_permit() -> TransferGuard {
    TransferGuard {
        _permit: TRANSFER_SLOTS.acquire().await,
    }
}

pub fn init_dispatch_tokens(dispatch_tokens: usize) {
    DISPATCH_THROTTLE.setup(dispatch_tokens);
}

pub async fn get_dispatch_token() {
    DISPATCH_THROTTLE.consume().await;
}

pub async fn run_dispatch_replenish_thread(replenish: usize, interval: std::time::Duration) {
    DISPATCH_THROTTLE
        .run_replenish_thread(replenish, interval)
        .await;
}

/// Split a per-second rate into (tokens, interval) so that replenishment stays reasonably smooth.
pub fn replenish_schedule(per_second: usize) -> (usize, std::time::Duration) {
    let mut replenish = per_second;
    let mut interval = std::time::Duration::from_secs(1);
    while replenish > 10 && interval > std::time::Duration::from_millis(10) {
        replenish /= 10;
        interval /= 10;
    }
    (replenish, interval)
}
