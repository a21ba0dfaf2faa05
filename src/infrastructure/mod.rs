pub mod booking_http;
pub mod in_memory;
pub mod notifier;
pub mod payment_http;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
