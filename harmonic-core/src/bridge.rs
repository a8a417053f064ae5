//! # Zero-Copy Buffer Bridge
//!
//! Region magnitude bins live in the engine's [`LinearMemory`]. A
//! [`RegionView`] is an `(offset, length)` window onto that memory; reading
//! it borrows the engine's bins in place, nothing is copied.
//!
//! Views are cached per region. A new view is only built when the engine
//! reports a different pointer or length for the region (or swaps its memory
//! out entirely), so two reads inside one throttle window hand back the very
//! same `Rc`.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::cache::{CacheKey, RegionField};
use crate::context::TunerContext;
use crate::engine::RegionBufferInfo;

/// Flat `f32` memory owned by an engine.
#[derive(Debug, Default)]
pub struct LinearMemory {
    cells: RefCell<Vec<f32>>,
}

impl LinearMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.borrow().is_empty()
    }

    /// Appends `len` zeroed cells and returns the offset of the first one.
    pub fn allocate(&self, len: usize) -> usize {
        let mut cells = self.cells.borrow_mut();
        let offset = cells.len();
        cells.resize(offset + len, 0.0);
        offset
    }

    /// Copies `values` in at `offset`, truncating at the end of memory.
    pub fn write(&self, offset: usize, values: &[f32]) {
        let mut cells = self.cells.borrow_mut();
        if offset >= cells.len() {
            return;
        }
        let end = (offset + values.len()).min(cells.len());
        cells[offset..end].copy_from_slice(&values[..end - offset]);
    }

    /// Borrows `len` cells starting at `offset`, or `None` if out of range.
    pub fn read(&self, offset: usize, len: usize) -> Option<Ref<'_, [f32]>> {
        let end = offset.checked_add(len)?;
        Ref::filter_map(self.cells.borrow(), |cells| cells.get(offset..end)).ok()
    }
}

/// A live window onto one region's bins.
#[derive(Debug)]
pub struct RegionView {
    memory: Option<Rc<LinearMemory>>,
    offset: usize,
    len: usize,
}

impl RegionView {
    pub fn empty() -> Self {
        Self {
            memory: None,
            offset: 0,
            len: 0,
        }
    }

    pub fn over(memory: Rc<LinearMemory>, offset: usize, len: usize) -> Self {
        Self {
            memory: Some(memory),
            offset,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the bins. `None` for an empty view or one the memory no
    /// longer covers.
    pub fn samples(&self) -> Option<Ref<'_, [f32]>> {
        self.memory.as_ref()?.read(self.offset, self.len)
    }

    pub fn with_samples<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        match self.samples() {
            Some(samples) => f(&samples),
            None => f(&[]),
        }
    }

    pub fn get(&self, bin: usize) -> Option<f32> {
        self.samples().and_then(|samples| samples.get(bin).copied())
    }

    fn matches(&self, memory: &Rc<LinearMemory>, info: RegionBufferInfo) -> bool {
        match (info.data_ptr, &self.memory) {
            (Some(ptr), Some(own)) if info.length > 0 => {
                Rc::ptr_eq(own, memory) && ptr == self.offset && info.length == self.len
            }
            (Some(_), None) => info.length == 0,
            (None, None) => true,
            _ => false,
        }
    }
}

impl TunerContext {
    /// A zero-copy view of region `index`'s magnitude bins.
    ///
    /// Empty when no engine is attached or the engine reports a null pointer.
    pub fn region_data(&mut self, index: usize) -> Rc<RegionView> {
        let key = CacheKey::Region(index, RegionField::Data);
        let cached = self.cache.get_value::<Rc<RegionView>>(key);
        if !self.cache.should_update(key) {
            if let Some(view) = cached {
                return view;
            }
        }

        let Some(engine) = self.engine.as_deref() else {
            let view = cached
                .filter(|view| view.memory.is_none())
                .unwrap_or_else(|| Rc::new(RegionView::empty()));
            self.cache.set_value(key, Rc::clone(&view));
            return view;
        };

        let info = engine.region_data_view(index);
        let memory = engine.memory();
        if let Some(view) = cached {
            if view.matches(&memory, info) {
                return view;
            }
        }

        let view = Rc::new(match info.data_ptr {
            Some(ptr) if info.length > 0 => RegionView::over(memory, ptr, info.length),
            _ => RegionView::empty(),
        });
        log::trace!(
            "[BRIDGE] region {} view rebuilt at {:?} ({} bins)",
            index,
            info.data_ptr,
            info.length
        );
        self.cache.set_value(key, Rc::clone(&view));
        view
    }
}
