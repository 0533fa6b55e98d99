//! Thread-flavoured buffer backend: a [`Core`] shared within one process.

use std::sync::Arc;
use std::time::Duration;

use super::core::Core;
use super::{Backend, BufferId, Payload};
use crate::buffer::item::Item;
use crate::error::BufferError;
use crate::wakeup::Wakeup;

pub(crate) struct ThreadBackend<T> {
    core: Arc<Core<T>>,
}

impl<T: Payload> ThreadBackend<T> {
    pub(crate) fn new(
        name: &str,
        capacity: Option<usize>,
        grace: Duration,
        warn_on_discard: bool,
    ) -> Self {
        Self {
            core: Core::new(name, BufferId::next(), capacity, grace, warn_on_discard),
        }
    }
}

impl<T: Payload> Backend<T> for ThreadBackend<T> {
    fn name(&self) -> String {
        self.core.name().to_string()
    }

    fn id(&self) -> BufferId {
        self.core.id()
    }

    fn attach_publisher(&self) -> Result<(), BufferError> {
        self.core.attach_publisher()
    }

    fn detach_publisher(&self) {
        self.core.detach_publisher();
    }

    fn attach_subscriber(&self, wakeup: Wakeup) -> Result<(), BufferError> {
        self.core.attach_subscriber(wakeup)
    }

    fn detach_subscriber(&self) {
        self.core.detach_subscriber();
    }

    fn push(&self, item: Item<T>, block: bool) -> Result<(), BufferError> {
        self.core.push(item, block)
    }

    fn pop(&self) -> Option<Item<T>> {
        self.core.pop()
    }

    fn len(&self) -> usize {
        self.core.len()
    }
}
