//! Unhandled promise rejections
//!
//! QuickJS reports a rejected promise that has no handler, and reports it
//! again if a handler is attached later. Entries are keyed by the promise's
//! address on the host side; nothing is written onto the guest's objects.

use parking_lot::Mutex;
use rquickjs::{qjs, Ctx, Value};
use std::os::raw::{c_int, c_void};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::guest_error::GuestError;

type Pending = Mutex<Vec<(usize, String)>>;

/// Rejections still unhandled, in the order they happened
#[derive(Debug, Clone, Default)]
pub struct RejectionLog(Arc<Pending>);

impl RejectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered reason of the oldest unhandled rejection
    pub fn first(&self) -> Option<String> {
        self.0.lock().first().map(|(_, reason)| reason.clone())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Route the runtime's rejection notifications into this log.
    ///
    /// # Safety
    /// The log must stay alive for as long as the runtime behind `ctx` can
    /// run jobs; the runtime keeps only a raw pointer to it.
    pub(crate) unsafe fn install(&self, ctx: &Ctx<'_>) {
        let opaque = Arc::as_ptr(&self.0) as *mut c_void;
        unsafe {
            let runtime = qjs::JS_GetRuntime(ctx.as_raw().as_ptr());
            qjs::JS_SetHostPromiseRejectionTracker(runtime, Some(track), opaque);
        }
    }
}

unsafe extern "C" fn track(
    ctx: *mut qjs::JSContext,
    promise: qjs::JSValue,
    reason: qjs::JSValue,
    is_handled: c_int,
    opaque: *mut c_void,
) {
    let Some(ctx) = NonNull::new(ctx) else {
        return;
    };
    let pending = unsafe { &*(opaque as *const Pending) };
    let key = unsafe { qjs::JS_VALUE_GET_PTR(promise) } as usize;

    if is_handled != 0 {
        let mut pending = pending.lock();
        if let Some(index) = pending.iter().rposition(|(promise, _)| *promise == key) {
            pending.remove(index);
        }
        return;
    }

    // The callback runs with the runtime already locked by whoever is
    // executing the job; the reason is borrowed, so take a reference.
    let ctx = unsafe { Ctx::from_raw(ctx) };
    let reason = unsafe { Value::from_raw(ctx.clone(), qjs::JS_DupValue(reason)) };
    let message = GuestError::from_value(&ctx, &reason).message();
    pending.lock().push((key, message));
}
