// SPDX-License-Identifier: CEPL-1.0
//! Doubly linked command lists threaded through a shared node pool.
//!
//! A list only stores its head and tail keys, so moving a whole pass onto
//! the device queue is two key updates regardless of its length.

use prism_core::{ObjectPool, PoolKey};

use crate::command::Command;

pub struct CommandNode {
    prev: Option<PoolKey>,
    next: Option<PoolKey>,
    command: Command<'static>,
}

pub type CommandPool = ObjectPool<CommandNode>;

#[derive(Debug, Default)]
pub struct CommandList {
    head: Option<PoolKey>,
    tail: Option<PoolKey>,
    len: usize,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn push_back(&mut self, pool: &mut CommandPool, command: Command<'static>) {
        let key = pool.insert(CommandNode {
            prev: self.tail,
            next: None,
            command,
        });
        match self.tail.and_then(|tail| pool.get_mut(tail)) {
            Some(tail) => tail.next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
    }

    /// Unlinks the oldest command and returns its slot to the pool.
    pub fn pop_front(&mut self, pool: &mut CommandPool) -> Option<Command<'static>> {
        let head = self.head?;
        let node = pool.remove(head)?;
        self.head = node.next;
        match node.next.and_then(|next| pool.get_mut(next)) {
            Some(next) => next.prev = None,
            None => self.tail = None,
        }
        self.len -= 1;
        Some(node.command)
    }

    /// Moves every node of `other` to the end of `self`, leaving `other`
    /// empty. Constant time.
    pub fn append(&mut self, pool: &mut CommandPool, other: &mut CommandList) {
        let Some(other_head) = other.head else {
            return;
        };
        match self.tail.and_then(|tail| pool.get_mut(tail)) {
            Some(tail) => {
                tail.next = Some(other_head);
                if let Some(head) = pool.get_mut(other_head) {
                    head.prev = self.tail;
                }
            }
            None => self.head = Some(other_head),
        }
        self.tail = other.tail;
        self.len += other.len;
        *other = CommandList::default();
    }

    /// Drops every queued command without executing it.
    pub fn clear(&mut self, pool: &mut CommandPool) -> usize {
        let mut dropped = 0;
        while self.pop_front(pool).is_some() {
            dropped += 1;
        }
        dropped
    }
}
