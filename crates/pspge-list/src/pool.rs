//! Fixed pool of display-list slots.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::addr::normalize_pc;
use crate::backend::QueuePlacement;
use crate::config::GeConfig;
use crate::error::{ListError, Result};
use crate::list::{DisplayList, ListOptParams, ListServices};

pub const DEFAULT_LIST_COUNT: usize = GeConfig::DEFAULT_LIST_COUNT;

#[derive(Debug)]
pub struct ListPool {
    lists: Vec<Arc<DisplayList>>,
    /// Serializes the busy check with slot allocation.
    admission: Mutex<()>,
}

impl ListPool {
    pub fn new(services: ListServices, count: usize) -> Self {
        let lists = (0..count)
            .map(|id| Arc::new(DisplayList::new(id, services.clone())))
            .collect();
        Self {
            lists,
            admission: Mutex::new(()),
        }
    }

    pub fn from_config(services: ListServices, config: &GeConfig) -> Self {
        Self::new(services, config.list_count)
    }

    /// Admits a new list and starts it on the backend.
    ///
    /// Fails with [`ListError::Busy`] if a list that is still running was submitted at the same
    /// address or shares the same guest stack, and with [`ListError::NoFreeList`] when every slot
    /// is occupied.
    pub fn enqueue(
        &self,
        list_addr: u32,
        stall_addr: u32,
        cbid: i32,
        opt_params: Option<ListOptParams>,
        placement: QueuePlacement,
    ) -> Result<Arc<DisplayList>> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);

        let list_addr = normalize_pc(list_addr);
        let stack_addr = opt_params.map_or(0, |p| p.stack_addr);
        if let Some(busy) = self
            .lists
            .iter()
            .find(|list| !list.is_done() && list.is_in_use(list_addr, stack_addr))
        {
            warn!(
                id = busy.id(),
                list = format_args!("0x{list_addr:08x}"),
                "GE enqueue rejected: list busy"
            );
            return Err(ListError::Busy { list_addr });
        }

        let Some(list) = self.lists.iter().find(|list| list.is_done()) else {
            warn!(list = format_args!("0x{list_addr:08x}"), "GE enqueue rejected: no free list");
            return Err(ListError::NoFreeList);
        };

        list.init(list_addr, stall_addr, cbid, opt_params);
        debug!(id = list.id(), ?placement, "GE list enqueued");
        match placement {
            QueuePlacement::Tail => list.start_list(),
            QueuePlacement::Head => list.start_list_head(),
        }
        Ok(Arc::clone(list))
    }

    pub fn get(&self, id: usize) -> Option<&Arc<DisplayList>> {
        self.lists.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DisplayList>> {
        self.lists.iter()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Number of slots holding a list that has not completed.
    pub fn active_count(&self) -> usize {
        self.lists.iter().filter(|list| !list.is_done()).count()
    }

    pub fn reset_all(&self) {
        for list in &self.lists {
            list.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, ListBackend, NullCallbackSink};
    use crate::status::ListStatus;
    use pspge_mem::GuestMemory;

    #[derive(Default)]
    struct RecordingBackend {
        submitted: Mutex<Vec<(usize, QueuePlacement)>>,
    }

    impl ListBackend for RecordingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Builtin
        }

        fn submit(&self, list: Arc<DisplayList>, placement: QueuePlacement) {
            self.submitted.lock().unwrap().push((list.id(), placement));
        }
    }

    fn pool(count: usize) -> (ListPool, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let services = ListServices {
            backend: backend.clone(),
            callbacks: Arc::new(NullCallbackSink),
            cursors: Arc::new(GuestMemory::new()),
        };
        (ListPool::new(services, count), backend)
    }

    #[test]
    fn slots_start_reset() {
        let (pool, _) = pool(4);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.active_count(), 0);
        assert!(pool.iter().enumerate().all(|(i, l)| l.id() == i && l.is_reset()));
    }

    #[test]
    fn enqueue_takes_first_done_slot() {
        let (pool, backend) = pool(4);
        let a = pool
            .enqueue(0x0880_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        let b = pool
            .enqueue(0x0881_0000, 0, 1, None, QueuePlacement::Head)
            .unwrap();
        assert_eq!((a.id(), b.id()), (0, 1));
        assert_eq!(a.status(), ListStatus::Queued);
        assert_eq!(
            *backend.submitted.lock().unwrap(),
            vec![(0, QueuePlacement::Tail), (1, QueuePlacement::Head)]
        );
    }

    #[test]
    fn duplicate_list_address_is_busy() {
        let (pool, _) = pool(4);
        pool.enqueue(0x0880_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        let err = pool
            .enqueue(0x4880_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap_err();
        assert_eq!(
            err,
            ListError::Busy {
                list_addr: 0x0880_0000
            }
        );
    }

    #[test]
    fn exhausted_pool_reports_no_free_list() {
        let (pool, _) = pool(2);
        pool.enqueue(0x0880_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        pool.enqueue(0x0881_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        assert!(matches!(
            pool.enqueue(0x0882_0000, 0, 1, None, QueuePlacement::Tail),
            Err(ListError::NoFreeList)
        ));

        pool.get(0).unwrap().set_status(ListStatus::Done);
        let reused = pool
            .enqueue(0x0882_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        assert_eq!(reused.id(), 0);
    }

    #[test]
    fn reset_all_frees_every_slot() {
        let (pool, _) = pool(2);
        pool.enqueue(0x0880_0000, 0, 1, None, QueuePlacement::Tail)
            .unwrap();
        assert_eq!(pool.active_count(), 1);
        pool.reset_all();
        assert_eq!(pool.active_count(), 0);
    }
}
