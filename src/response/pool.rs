use std::sync::{Arc, Mutex, PoisonError};

use crate::http::HttpRequest;
use crate::session::Session;

use super::Response;

/// Reuses [`Response`] objects across requests.
///
/// A response comes back through its request's recovery hook, which runs once
/// the response has been written. It is only handed out again when nothing
/// else still holds it, so a handler clinging to an old response can never
/// complete somebody else's request.
pub struct ResponsePool {
    free: Mutex<Vec<Arc<Response>>>,
    max_pooled: usize,
}

impl ResponsePool {
    pub fn new(max_pooled: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        })
    }

    /// Take a reset response bound to `request` and `session`.
    pub fn acquire(
        self: &Arc<Self>,
        request: &Arc<HttpRequest>,
        session: Arc<dyn Session>,
    ) -> Arc<Response> {
        let response = self.take_free().unwrap_or_else(|| Arc::new(Response::new()));

        response.reset();
        response.bind(request.clone(), session);

        let pool = self.clone();
        let recycled = response.clone();
        request.on_recover(move || pool.release(recycled));

        response
    }

    pub fn num_free(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take_free(&self) -> Option<Arc<Response>> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(response) = free.pop() {
            if Arc::strong_count(&response) == 1 {
                return Some(response);
            }
        }

        None
    }

    fn release(&self, response: Arc<Response>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_pooled {
            free.push(response);
        }
    }
}
