use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{merge::MergeList, net::error::Error};

/// Where the reassembled file goes.
#[derive(Clone, Debug)]
pub struct Output {
    path: PathBuf,
}

impl Output {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the destination and writes every record's text in ascending
    /// order, one per line. Running it again over the same list rewrites the
    /// same bytes.
    pub fn materialize(&self, list: &MergeList) -> Result<(), Error> {
        let to_error = |source: io::Error| Error::Output {
            path: self.path.clone(),
            source,
        };
        let file = File::create(&self.path).map_err(to_error)?;
        let mut writer = BufWriter::new(file);
        write_to(list, &mut writer)
            .and_then(|()| writer.flush())
            .map_err(to_error)?;
        info!(
            path = %self.path.display(),
            lines = list.len(),
            "output written"
        );
        Ok(())
    }
}

/// Line numbers are dropped; only the text of each record is written.
pub fn write_to<W: Write>(list: &MergeList, writer: &mut W) -> io::Result<()> {
    for record in list.produce() {
        writer.write_all(record.text.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
