use crate::net::{
    error::ProtocolError,
    wire::{self, Record},
};

/// Records kept in ascending line-number order, whatever order they arrive in.
///
/// Equal line numbers are not expected in well-formed input but are handled
/// deterministically: a record is inserted before every record already
/// holding its key, so the last one inserted sorts first within its key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeList {
    records: Vec<Record>,
}

impl MergeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) {
        let at = self
            .records
            .partition_point(|r| r.line_number < record.line_number);
        self.records.insert(at, record);
    }

    /// Ascending traversal. Can be called any number of times.
    pub fn produce(&self) -> impl Iterator<Item = &Record> + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The whole list as one terminated message, in ascending order.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        wire::encode_message(self.produce())
    }
}

impl Extend<Record> for MergeList {
    fn extend<T: IntoIterator<Item = Record>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl FromIterator<Record> for MergeList {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}
