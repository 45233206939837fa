use std::{
    fmt,
    fs::File,
    io::{self, Cursor, Read},
    path::Path,
};

use super::{
    error::Error,
    wire::{self, END_OF_MESSAGE},
};

/// One participant's share of the original file: a readable stream of
/// `"<line_number> <text>"` lines.
pub struct Fragment {
    pub index: usize,
    pub label: String,
    source: Box<dyn Read + Send>,
}

impl Fragment {
    pub fn new(
        index: usize,
        label: impl Into<String>,
        source: impl Read + Send + 'static,
    ) -> Self {
        Self {
            index,
            label: label.into(),
            source: Box::new(source),
        }
    }

    /// An in-memory fragment.
    pub fn from_bytes(
        index: usize,
        label: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(index, label, Cursor::new(bytes.into()))
    }

    pub fn open(index: usize, path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|source| Error::Fragment {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self::new(index, path.display().to_string(), file))
    }

    pub(crate) fn into_feed(self, chunk_size: usize) -> FragmentFeed {
        FragmentFeed::new(self.source, chunk_size)
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("index", &self.index)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Pulls a fragment source one chunk at a time and re-encodes every complete
/// line through the codec. A line cut by the chunk boundary is carried over.
pub(crate) struct FragmentFeed {
    source: Box<dyn Read + Send>,
    carry: Vec<u8>,
    scratch: Box<[u8]>,
    exhausted: bool,
}

impl FragmentFeed {
    fn new(source: Box<dyn Read + Send>, chunk_size: usize) -> Self {
        Self {
            source,
            carry: Vec::new(),
            scratch: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
            exhausted: false,
        }
    }

    /// Reads at most one chunk and appends the encoded lines to `out`.
    /// Returns `true` once the source is drained and the end marker has been
    /// appended.
    pub fn fill(&mut self, out: &mut Vec<u8>) -> Result<bool, Error> {
        if self.exhausted {
            return Ok(true);
        }
        let n = loop {
            match self.source.read(&mut self.scratch[..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n == 0 {
            // last line may lack its newline
            let rest = std::mem::take(&mut self.carry);
            encode_lines(&rest, out)?;
            out.push(END_OF_MESSAGE);
            self.exhausted = true;
            return Ok(true);
        }

        self.carry.extend_from_slice(&self.scratch[..n]);
        if let Some(last_newline) = self.carry.iter().rposition(|b| *b == b'\n')
        {
            let rest = self.carry.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.carry, rest);
            encode_lines(&complete, out)?;
        }
        Ok(false)
    }
}

// `encode` refuses a marker byte inside text, so a fragment can never end its
// own message early.
fn encode_lines(bytes: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
    for record in wire::decode(bytes)? {
        wire::encode(&record, out)?;
    }
    Ok(())
}
