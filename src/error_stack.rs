//! Thread-local error message stack
//!
//! Every failing engine operation pushes a human-readable message here before
//! returning its `Err`. Wrapping contexts push their own message after the
//! inner one, so `pop` yields the outermost context first. The engine never
//! clears the stack; callers drain it after a failing call.

use std::cell::RefCell;
use std::collections::VecDeque;

/// Default number of messages retained per thread
pub const DEFAULT_CAPACITY: usize = 16;

struct ErrorStack {
    messages: VecDeque<String>,
    capacity: usize,
}

impl ErrorStack {
    fn new() -> Self {
        Self {
            messages: VecDeque::with_capacity(DEFAULT_CAPACITY),
            capacity: DEFAULT_CAPACITY,
        }
    }

    fn push(&mut self, message: String) {
        if self.capacity == 0 {
            return;
        }
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }
}

thread_local! {
    static STACK: RefCell<ErrorStack> = RefCell::new(ErrorStack::new());
}

/// Push a message onto this thread's error stack, dropping the oldest
/// message when the stack is full
pub fn push(message: impl Into<String>) {
    let message = message.into();
    STACK.with(|stack| stack.borrow_mut().push(message));
}

/// Pop the most recent message
pub fn pop() -> Option<String> {
    STACK.with(|stack| stack.borrow_mut().messages.pop_back())
}

/// Remove and return all messages, most recent first
pub fn drain() -> Vec<String> {
    STACK.with(|stack| stack.borrow_mut().messages.drain(..).rev().collect())
}

/// Number of messages currently held
pub fn len() -> usize {
    STACK.with(|stack| stack.borrow().messages.len())
}

pub fn is_empty() -> bool {
    len() == 0
}

/// Discard all messages
pub fn clear() {
    STACK.with(|stack| stack.borrow_mut().messages.clear());
}

/// Change how many messages this thread retains. Excess old messages are
/// dropped immediately.
pub fn set_capacity(capacity: usize) {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.capacity = capacity;
        while stack.messages.len() > capacity {
            stack.messages.pop_front();
        }
    });
}

pub fn capacity() -> usize {
    STACK.with(|stack| stack.borrow().capacity)
}
