use std::collections::HashMap;

use conduit_engine::{ObjRef, Slot};

/// Index into a request's [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Handle(u32);

pub(crate) enum Entry {
    Container(Slot),
    Object(ObjRef),
}

/// Script values the host holds proxies to.
///
/// Entries live until the request's engine shuts down, so a handle stays
/// valid for as long as its proxy can reach the engine at all.
#[derive(Default)]
pub(crate) struct HandleTable {
    entries: Vec<Entry>,
    objects: HashMap<u32, Handle>,
    slots: HashMap<usize, Handle>,
}

impl HandleTable {
    fn push(&mut self, entry: Entry) -> Handle {
        let handle = Handle(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        self.entries.push(entry);
        handle
    }

    /// A private copy of a container (value semantics).
    pub(crate) fn detached_container(&mut self, slot: Slot) -> Handle {
        self.push(Entry::Container(slot))
    }

    /// A container aliased through its storage slot; one handle per slot.
    pub(crate) fn aliased_container(&mut self, slot: &Slot) -> Handle {
        let key = std::rc::Rc::as_ptr(slot) as usize;
        if let Some(handle) = self.slots.get(&key) {
            return *handle;
        }
        let handle = self.push(Entry::Container(slot.clone()));
        self.slots.insert(key, handle);
        handle
    }

    pub(crate) fn object(&mut self, obj: &ObjRef) -> Handle {
        if let Some(handle) = self.objects.get(&obj.id()) {
            return *handle;
        }
        let handle = self.push(Entry::Object(obj.clone()));
        self.objects.insert(obj.id(), handle);
        handle
    }

    pub(crate) fn container_slot(&self, handle: Handle) -> Option<Slot> {
        match self.entries.get(handle.0 as usize)? {
            Entry::Container(slot) => Some(slot.clone()),
            Entry::Object(_) => None,
        }
    }

    pub(crate) fn object_ref(&self, handle: Handle) -> Option<ObjRef> {
        match self.entries.get(handle.0 as usize)? {
            Entry::Object(obj) => Some(obj.clone()),
            Entry::Container(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use conduit_engine::{Value, new_slot};

    use super::*;

    #[test]
    fn aliased_slots_share_a_handle() {
        let mut table = HandleTable::default();
        let slot = new_slot(Value::empty_array());
        let a = table.aliased_container(&slot);
        let b = table.aliased_container(&slot);
        let copy = table.detached_container(new_slot(Value::empty_array()));
        assert_eq!(a, b);
        assert_ne!(a, copy);
        assert!(table.container_slot(a).is_some());
        assert!(table.object_ref(a).is_none());
    }
}
