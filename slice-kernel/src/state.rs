use parking_lot::Mutex;
use std::sync::Arc;

/// Small synchronous state shared between tasks (pending requests, health).
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
