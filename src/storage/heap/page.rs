use crate::shared::{
    contracts::Page,
    definitions::{PageId, RecordId, TransactionId, PAGE_SIZE},
    error::{DbError, Result},
};
use crate::storage::tuple::{Tuple, TupleDesc};
use std::sync::Arc;

/// In-memory decoding of one heap file page.
///
/// On disk a heap page is `header_size()` bytes of occupancy bitmap (bit `i`
/// of byte `i / 8`, least significant bit first, set iff slot `i` is used)
/// followed by `num_slots()` fixed-width tuple slots. The rest of the page is
/// zero.
#[derive(Debug)]
pub struct HeapPage {
    id: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtied_by: Option<TransactionId>,
    before_image: Vec<u8>,
}

/// Number of tuples of `desc` that fit on a page: each slot costs its tuple
/// width plus one header bit.
pub fn slots_per_page(desc: &TupleDesc) -> usize {
    (PAGE_SIZE * 8) / (desc.byte_size() * 8 + 1)
}

/// Bytes of occupancy bitmap for `num_slots` slots.
pub const fn header_size(num_slots: usize) -> usize {
    (num_slots + 7) / 8
}

impl HeapPage {
    pub fn from_bytes(id: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> Result<Self> {
        let (header, tuples) = Self::decode(id, &desc, data)?;
        Ok(Self {
            id,
            desc,
            header,
            tuples,
            dirtied_by: None,
            before_image: data.to_vec(),
        })
    }

    pub fn empty(id: PageId, desc: Arc<TupleDesc>) -> Self {
        let num_slots = slots_per_page(&desc);
        Self {
            id,
            desc,
            header: vec![0; header_size(num_slots)],
            tuples: vec![None; num_slots],
            dirtied_by: None,
            before_image: Self::create_empty_page_data(),
        }
    }

    pub fn create_empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    fn decode(
        id: PageId,
        desc: &Arc<TupleDesc>,
        data: &[u8],
    ) -> Result<(Vec<u8>, Vec<Option<Tuple>>)> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Corrupted(
                id,
                format!("expected {} bytes, got {}", PAGE_SIZE, data.len()),
            ));
        }

        let num_slots = slots_per_page(desc);
        let header_len = header_size(num_slots);
        let tuple_size = desc.byte_size();
        let header = data[..header_len].to_vec();

        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) == 0 {
                tuples.push(None);
                continue;
            }
            let start = header_len + slot * tuple_size;
            let mut tuple = Tuple::parse(desc, &data[start..start + tuple_size])
                .map_err(|reason| DbError::Corrupted(id, format!("slot {}: {}", slot, reason)))?;
            tuple.set_record_id(Some(RecordId::new(id, slot)));
            tuples.push(Some(tuple));
        }

        Ok((header, tuples))
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot)?.as_ref()
    }

    /// Live tuples in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Stores a copy of `tuple` in the first free slot and returns its location.
    pub fn insert_tuple(&mut self, tuple: &Tuple) -> Result<RecordId> {
        if **tuple.desc() != *self.desc {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match page schema ({})",
                tuple.desc(),
                self.desc
            )));
        }
        if !tuple.is_complete() {
            return Err(DbError::SchemaMismatch("tuple has unset fields".into()));
        }

        let slot = (0..self.num_slots())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(DbError::PageFull(self.id))?;

        let record_id = RecordId::new(self.id, slot);
        let mut stored = tuple.clone();
        stored.set_record_id(Some(record_id));
        self.tuples[slot] = Some(stored);
        self.set_slot_used(slot, true);
        Ok(record_id)
    }

    pub fn delete_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let record_id = tuple.record_id().ok_or(DbError::NoRecordId)?;
        if record_id.page_id != self.id || !self.is_slot_used(record_id.slot) {
            return Err(DbError::TupleNotFound(record_id));
        }
        self.tuples[record_id.slot] = None;
        self.set_slot_used(record_id.slot, false);
        Ok(())
    }
}

impl Page for HeapPage {
    fn id(&self) -> PageId {
        self.id
    }

    fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtied_by = tid;
    }

    fn page_data(&self) -> Vec<u8> {
        let tuple_size = self.desc.byte_size();
        let mut data = Vec::with_capacity(PAGE_SIZE);
        data.extend_from_slice(&self.header);
        for tuple in &self.tuples {
            match tuple {
                Some(tuple) => tuple.serialize_into(&mut data),
                None => data.resize(data.len() + tuple_size, 0),
            }
        }
        data.resize(PAGE_SIZE, 0);
        data
    }

    fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    fn set_before_image(&mut self) {
        self.before_image = self.page_data();
    }

    fn restore_before_image(&mut self) -> Result<()> {
        let (header, tuples) = Self::decode(self.id, &self.desc, &self.before_image)?;
        self.header = header;
        self.tuples = tuples;
        self.dirtied_by = None;
        Ok(())
    }
}
