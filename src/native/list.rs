// Native Lists
// Singly and doubly linked lists of pointers

use std::ffi::c_void;
use std::ptr;

/// Singly-linked list node.
#[repr(C)]
pub struct SList {
    pub data: *mut c_void,
    pub next: *mut SList,
}

/// Doubly-linked list node.
#[repr(C)]
pub struct List {
    pub data: *mut c_void,
    pub next: *mut List,
    pub prev: *mut List,
}

impl SList {
    pub fn prepend(head: *mut SList, data: *mut c_void) -> *mut SList {
        Box::into_raw(Box::new(SList { data, next: head }))
    }

    /// # Safety
    /// `head` must be a list built by [`SList::prepend`].
    pub unsafe fn free(mut head: *mut SList) {
        while !head.is_null() {
            let node = Box::from_raw(head);
            head = node.next;
        }
    }

    /// # Safety
    /// `head` must be a valid list or null.
    pub unsafe fn items(mut head: *mut SList) -> Vec<*mut c_void> {
        let mut items = Vec::new();
        while !head.is_null() {
            items.push((*head).data);
            head = (*head).next;
        }
        items
    }
}

impl List {
    pub fn prepend(head: *mut List, data: *mut c_void) -> *mut List {
        let node = Box::into_raw(Box::new(List {
            data,
            next: head,
            prev: ptr::null_mut(),
        }));
        if !head.is_null() {
            // SAFETY: `head` is a live node of the same list.
            unsafe { (*head).prev = node };
        }
        node
    }

    /// # Safety
    /// `head` must be a list built by [`List::prepend`].
    pub unsafe fn free(mut head: *mut List) {
        while !head.is_null() {
            let node = Box::from_raw(head);
            head = node.next;
        }
    }

    /// # Safety
    /// `head` must be a valid list or null.
    pub unsafe fn items(mut head: *mut List) -> Vec<*mut c_void> {
        let mut items = Vec::new();
        while !head.is_null() {
            items.push((*head).data);
            head = (*head).next;
        }
        items
    }
}
