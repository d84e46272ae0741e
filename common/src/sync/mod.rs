pub mod defer_lock;
pub use defer_lock::DeferLock;
