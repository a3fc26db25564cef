//! Pool of register pages for reuse across evaluations.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::state::Page;

/// Shared pool of register pages. Cloning shares the pool.
#[derive(Default, Clone)]
pub struct PagePool {
    pages: Arc<Mutex<Vec<Box<Page>>>>,
}

impl PagePool {
    /// Take a cleared page from the pool, allocating when empty.
    pub fn take(&self) -> Box<Page> {
        let mut pages = self.pages.lock().expect("poisoned");
        pages.pop().unwrap_or_default()
    }

    /// Recycle a page back into the pool.
    pub fn recycle(&self, mut page: Box<Page>) {
        page.reset();
        let mut pages = self.pages.lock().expect("poisoned");
        pages.push(page);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pages.lock().expect("poisoned").len()
    }
}

impl fmt::Debug for PagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pages.lock() {
            Ok(pages) => write!(f, "PagePool {{ pages: [{} items] }}", pages.len()),
            Err(_) => write!(f, "PagePool {{ pages: [poisoned] }}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Locals;
    use crate::value::Value;

    #[test]
    fn released_pages_are_reused() {
        let pool = PagePool::default();
        let mut locals = Locals::new(pool.clone());
        // Slot 40 lives on the second page, forcing an overflow allocation.
        locals.set(40, Value::from(1i64));
        assert_eq!(pool.len(), 0);
        locals.release();
        assert_eq!(pool.len(), 1);

        let mut locals = Locals::new(pool.clone());
        locals.set(40, Value::from(2i64));
        assert_eq!(pool.len(), 0);
        assert_eq!(locals.get(40), Some(&Value::from(2i64)));
        locals.release();
    }
}
