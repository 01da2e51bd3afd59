//! kernel/list
//! Intrusive doubly-linked list primitive (arch-neutral)
//! BSD 3-Clause License
#![no_std]

use core::ptr::NonNull;

/// An intrusive list node. Embed this in a struct and use `Link::entry` to
/// recover the owner from a node pointer, the same way the rest of this
/// tree's wait/run queues thread through their owners.
///
/// A freshly constructed or fully removed node is self-linked
/// (`prev == next == self`), which is also the definition of "empty" for a
/// list head.
pub struct Link {
    prev: Option<NonNull<Link>>,
    next: Option<NonNull<Link>>,
}

impl Link {
    /// A detached node: not yet linked into any list.
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }

    /// Initialize `self` as a list head: self-linked, empty.
    ///
    /// # Safety
    /// `self` must not move after this call while linked into a list;
    /// callers normally pin list heads in a static or a `Box`.
    pub unsafe fn init(this: NonNull<Link>) {
        unsafe {
            (*this.as_ptr()).prev = Some(this);
            (*this.as_ptr()).next = Some(this);
        }
    }

    /// True if `this` is self-linked (either freshly initialized, or the
    /// sole remaining member of a list).
    ///
    /// # Safety
    /// `this` must point to a live, initialized `Link`.
    pub unsafe fn is_empty(this: NonNull<Link>) -> bool {
        unsafe {
            let node = &*this.as_ptr();
            node.prev == Some(this) && node.next == Some(this)
        }
    }

    /// Insert `new` immediately after `head`.
    ///
    /// # Safety
    /// `head` and `new` must point to live, initialized `Link`s. `new` must
    /// not already be linked into a list.
    pub unsafe fn add_after(head: NonNull<Link>, new: NonNull<Link>) {
        unsafe {
            let next = (*head.as_ptr()).next.unwrap_or(head);
            insert_between(new, head, next);
        }
    }

    /// Insert `new` immediately before `head` (i.e. at the tail when `head`
    /// is used as a list sentinel).
    ///
    /// # Safety
    /// Same obligations as [`Link::add_after`].
    pub unsafe fn add_before(head: NonNull<Link>, new: NonNull<Link>) {
        unsafe {
            let prev = (*head.as_ptr()).prev.unwrap_or(head);
            insert_between(new, prev, head);
        }
    }

    /// Remove `this` from whatever list it is part of and re-initialize it
    /// as a detached, self-linked node. Calling this on an already-detached
    /// node is a no-op.
    ///
    /// # Safety
    /// `this` must point to a live, initialized `Link`.
    pub unsafe fn remove(this: NonNull<Link>) {
        unsafe {
            let prev = (*this.as_ptr()).prev.unwrap_or(this);
            let next = (*this.as_ptr()).next.unwrap_or(this);
            (*prev.as_ptr()).next = Some(next);
            (*next.as_ptr()).prev = Some(prev);
            (*this.as_ptr()).prev = Some(this);
            (*this.as_ptr()).next = Some(this);
        }
    }

    /// Next node after `this`, or `None` if `this` is a self-linked head.
    ///
    /// # Safety
    /// `this` must point to a live, initialized `Link`.
    pub unsafe fn next(this: NonNull<Link>) -> Option<NonNull<Link>> {
        unsafe {
            let next = (*this.as_ptr()).next?;
            if next == this { None } else { Some(next) }
        }
    }

    /// Previous node before `this`, or `None` if `this` is a self-linked
    /// head.
    ///
    /// # Safety
    /// `this` must point to a live, initialized `Link`.
    pub unsafe fn prev(this: NonNull<Link>) -> Option<NonNull<Link>> {
        unsafe {
            let prev = (*this.as_ptr()).prev?;
            if prev == this { None } else { Some(prev) }
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn insert_between(new: NonNull<Link>, prev: NonNull<Link>, next: NonNull<Link>) {
    unsafe {
        (*prev.as_ptr()).next = Some(new);
        (*next.as_ptr()).prev = Some(prev);
        (*new.as_ptr()).next = Some(next);
        (*new.as_ptr()).prev = Some(prev);
    }
}

/// Recover a reference to the struct owning a `Link` field, given the
/// field's offset. Mirrors `LIST_ENTRY` from the C original: callers pass
/// the field name and the macro computes `container_of`.
#[macro_export]
macro_rules! list_entry {
    ($ptr:expr, $ty:ty, $field:ident) => {{
        let ptr: core::ptr::NonNull<$crate::Link> = $ptr;
        let offset = core::mem::offset_of!($ty, $field);
        let base = (ptr.as_ptr() as *mut u8).sub(offset) as *mut $ty;
        &mut *base
    }};
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;

    fn boxed_link() -> NonNull<Link> {
        let boxed = Box::new(Link::new());
        let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
        unsafe { Link::init(ptr) };
        ptr
    }

    #[test]
    fn fresh_head_is_empty() {
        let head = boxed_link();
        unsafe {
            assert!(Link::is_empty(head));
            assert!(Link::next(head).is_none());
        }
    }

    #[test]
    fn add_after_and_remove() {
        let head = boxed_link();
        let a = boxed_link();
        let b = boxed_link();
        unsafe {
            Link::add_after(head, a);
            Link::add_after(head, b);
            assert!(!Link::is_empty(head));
            assert_eq!(Link::next(head), Some(b));
            assert_eq!(Link::next(b), Some(a));
            assert!(Link::next(a).is_none());

            Link::remove(b);
            assert_eq!(Link::next(head), Some(a));
            assert!(Link::is_empty(b));

            Link::remove(a);
            assert!(Link::is_empty(head));
        }
    }

    #[test]
    fn add_before_is_tail_insert() {
        let head = boxed_link();
        let a = boxed_link();
        let b = boxed_link();
        unsafe {
            Link::add_before(head, a);
            Link::add_before(head, b);
            assert_eq!(Link::next(head), Some(a));
            assert_eq!(Link::next(a), Some(b));
        }
    }

    #[test]
    fn double_remove_is_noop() {
        let head = boxed_link();
        let a = boxed_link();
        unsafe {
            Link::add_after(head, a);
            Link::remove(a);
            Link::remove(a);
            assert!(Link::is_empty(a));
            assert!(Link::is_empty(head));
        }
    }
}
