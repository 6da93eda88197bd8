//! Heterogeneous, reflectable message container
//!
//! A message captures a tuple of values into recycled storage at the call
//! site and carries it across threads. Consumers either serialize the
//! arguments in order or interrogate individual arguments by type.

use crate::buffer::MessageStorage;
use crate::global;
use std::alloc::Layout;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// A value capturable into a message: text-renderable, type-queryable,
/// and safe to hand to consumer threads.
pub trait Value: fmt::Display + Any + Send + Sync {}

impl<T: fmt::Display + Any + Send + Sync> Value for T {}

/// Closure interface over a captured argument tuple.
///
/// Implemented for tuples of [`Value`] up to arity 8.
pub trait Capture: Send + Sync + 'static {
    /// Number of captured arguments.
    fn count(&self) -> usize;

    /// Render each argument's text representation, in order, with no
    /// delimiters.
    fn serialize(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Typed view of the argument at `index`.
    fn arg(&self, index: usize) -> Option<ArgView<'_>>;
}

/// Typed view of a single captured argument.
#[derive(Clone, Copy)]
pub struct ArgView<'a> {
    value: &'a dyn Any,
    type_name: &'static str,
}

impl<'a> ArgView<'a> {
    pub fn new(value: &'a dyn Any, type_name: &'static str) -> Self {
        Self { value, type_name }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Project to the concrete type; `None` when the test fails.
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        self.value.downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

macro_rules! impl_capture_for_tuple {
    ($count:expr => $( $name:ident : $index:tt ),+) => {
        impl<$( $name: Value ),+> Capture for ($( $name, )+) {
            fn count(&self) -> usize {
                $count
            }

            fn serialize(&self, out: &mut dyn fmt::Write) -> fmt::Result {
                $( write!(out, "{}", self.$index)?; )+
                Ok(())
            }

            fn arg(&self, index: usize) -> Option<ArgView<'_>> {
                match index {
                    $( $index => Some(ArgView::new(&self.$index, type_name::<$name>())), )+
                    _ => None,
                }
            }
        }
    };
}

impl_capture_for_tuple!(1 => A: 0);
impl_capture_for_tuple!(2 => A: 0, B: 1);
impl_capture_for_tuple!(3 => A: 0, B: 1, C: 2);
impl_capture_for_tuple!(4 => A: 0, B: 1, C: 2, D: 3);
impl_capture_for_tuple!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
impl_capture_for_tuple!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_capture_for_tuple!(7 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_capture_for_tuple!(8 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Body constructed in place inside `storage`.
struct MessageInner {
    storage: MessageStorage,
    // Fat pointer into `storage`; valid for the lifetime of the inner.
    body: *mut dyn Capture,
}

// The body is reachable only through &self once constructed, every
// captured value is Send + Sync, and the storage is exclusively owned.
unsafe impl Send for MessageInner {}
unsafe impl Sync for MessageInner {}

impl MessageInner {
    fn emplace<C: Capture>(storage: MessageStorage, args: C) -> Self {
        let base = storage.as_ptr() as *mut C;
        debug_assert!(base as usize % std::mem::align_of::<C>() == 0);
        unsafe { std::ptr::write(base, args) };
        Self {
            storage,
            body: base as *mut dyn Capture,
        }
    }

    /// Destroy the current body and construct a new one in the same
    /// storage. Caller checks the fit.
    unsafe fn replace<C: Capture>(&mut self, args: C) {
        unsafe { std::ptr::drop_in_place(self.body) };
        let base = self.storage.as_ptr() as *mut C;
        unsafe { std::ptr::write(base, args) };
        self.body = base as *mut dyn Capture;
    }

    fn body(&self) -> &dyn Capture {
        unsafe { &*self.body }
    }
}

impl Drop for MessageInner {
    fn drop(&mut self) {
        unsafe { std::ptr::drop_in_place(self.body) };
        // storage drop returns the allocation to its cache shard
    }
}

/// A populated-or-empty message. Move-only at the surface; the buffer is
/// shared internally so several consumers can hold the same payload.
#[derive(Default)]
pub struct Message {
    inner: Option<Arc<MessageInner>>,
}

fn body_layout<C: Capture>() -> Layout {
    let layout = Layout::new::<C>();
    // zero-size bodies still need a distinct address to carry the vtable
    if layout.size() == 0 {
        Layout::from_size_align(1, layout.align()).unwrap()
    } else {
        layout
    }
}

impl Message {
    pub fn new() -> Self {
        Self { inner: None }
    }

    /// Capture `args` into this message, reusing the current buffer when
    /// it is uniquely held and large enough.
    pub fn format<C: Capture>(&mut self, args: C) {
        let layout = body_layout::<C>();
        if let Some(inner) = self.inner.as_mut().and_then(Arc::get_mut) {
            if inner.storage.fits(layout) {
                unsafe { inner.replace(args) };
                return;
            }
        }
        let storage = crate::buffer::BufferCache::acquire(global::buffer_cache(), layout);
        self.inner = Some(Arc::new(MessageInner::emplace(storage, args)));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of captured arguments; zero when empty.
    pub fn count(&self) -> usize {
        self.inner.as_ref().map(|inner| inner.body().count()).unwrap_or(0)
    }

    /// Render the captured arguments in order.
    pub fn serialize(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match &self.inner {
            Some(inner) => inner.body().serialize(out),
            None => Ok(()),
        }
    }

    /// Typed view of the argument at `index`; `None` when out of range or
    /// empty.
    pub fn reflect(&self, index: usize) -> Option<ArgView<'_>> {
        self.inner.as_ref().and_then(|inner| inner.body().arg(index))
    }

    /// Cheap second handle onto the same payload, for multi-consumer
    /// fanout inside emitters.
    pub(crate) fn share(&self) -> Message {
        Message {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => inner.body().serialize(f),
            None => f.write_str("<empty message>"),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message({} args)", self.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message() {
        let message = Message::new();
        assert!(message.is_empty());
        assert_eq!(message.count(), 0);
        assert!(message.reflect(0).is_none());
        assert_eq!(format!("{message}"), "<empty message>");
    }

    #[test]
    fn serialize_in_order_without_delimiters() {
        let mut message = Message::new();
        message.format(("answer=", 42_u32, '!'));
        assert_eq!(format!("{message}"), "answer=42!");
        assert_eq!(message.count(), 3);
    }

    #[test]
    fn reflection_round_trip() {
        let mut message = Message::new();
        message.format(("pi ", 3.25_f64, 7_i64));
        let view = message.reflect(1).unwrap();
        assert!(view.is::<f64>());
        assert!(!view.is::<f32>());
        assert_eq!(view.downcast_ref::<f64>(), Some(&3.25));
        assert_eq!(message.reflect(2).unwrap().downcast_ref::<i64>(), Some(&7));
        assert!(message.reflect(3).is_none());
    }

    #[test]
    fn reflection_type_names() {
        let mut message = Message::new();
        message.format((1_u8,));
        assert!(message.reflect(0).unwrap().type_name().contains("u8"));
    }

    #[test]
    fn reformat_reuses_unique_buffer() {
        let mut message = Message::new();
        message.format((1_u64, 2_u64));
        let first = message.inner.as_ref().unwrap().storage.as_ptr();
        message.format((3_u64, 4_u64));
        let second = message.inner.as_ref().unwrap().storage.as_ptr();
        assert_eq!(first, second);
        assert_eq!(format!("{message}"), "34");
    }

    #[test]
    fn reformat_with_shared_buffer_allocates() {
        let mut message = Message::new();
        message.format((1_u64,));
        let shared = message.share();
        message.format((2_u64,));
        assert_eq!(format!("{shared}"), "1");
        assert_eq!(format!("{message}"), "2");
    }

    #[test]
    fn drops_captured_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Probe;
        impl Drop for Probe {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }
        impl fmt::Display for Probe {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("probe")
            }
        }
        {
            let mut message = Message::new();
            message.format((Probe,));
            assert_eq!(format!("{message}"), "probe");
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn messages_cross_threads() {
        let mut message = Message::new();
        message.format(("from ", String::from("here"),));
        let handle = std::thread::spawn(move || format!("{message}"));
        assert_eq!(handle.join().unwrap(), "from here");
    }
}
