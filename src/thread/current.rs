//! The per-OS-thread "current thread data" pointer.
//!
//! Every measurement instance stores the [`ThreadData`](super::ThreadData)
//! that is current on this OS thread under its instance id. Usually there
//! is exactly one instance, so the list is inline.

use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;

type Entry = (u64, Arc<dyn Any + Send + Sync>);

thread_local! {
    static CURRENT: RefCell<SmallVec<[Entry; 2]>> = RefCell::new(SmallVec::new());
}

/// Makes `data` current for `instance` on this thread.
pub(crate) fn set<T: Any + Send + Sync>(instance: u64, data: Arc<T>) {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        let data: Arc<dyn Any + Send + Sync> = data;
        match current.iter_mut().find(|(id, _)| *id == instance) {
            Some(entry) => entry.1 = data,
            None => current.push((instance, data)),
        }
    });
}

/// The data current for `instance` on this thread, if it has type `T`.
pub(crate) fn get<T: Any + Send + Sync>(instance: u64) -> Option<Arc<T>> {
    CURRENT.with(|current| {
        current
            .borrow()
            .iter()
            .find(|(id, _)| *id == instance)
            .map(|(_, data)| Arc::clone(data))
    })
    .and_then(|data| data.downcast::<T>().ok())
}

/// Forgets the data of `instance` on this thread.
pub(crate) fn clear(instance: u64) {
    CURRENT.with(|current| current.borrow_mut().retain(|(id, _)| *id != instance));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_are_independent() {
        set(1, Arc::new(10_u32));
        set(2, Arc::new(String::from("two")));
        assert_eq!(get::<u32>(1).as_deref(), Some(&10));
        assert_eq!(get::<String>(2).as_deref().map(String::as_str), Some("two"));
        assert!(get::<u32>(2).is_none());

        set(1, Arc::new(11_u32));
        assert_eq!(get::<u32>(1).as_deref(), Some(&11));
        clear(1);
        assert!(get::<u32>(1).is_none());
        clear(2);
    }

    #[test]
    fn other_threads_see_nothing() {
        set(77, Arc::new(1_u8));
        let seen = std::thread::spawn(|| get::<u8>(77).is_some()).join().unwrap();
        assert!(!seen);
        clear(77);
    }
}
