use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::net::{error::Error, fragment::Fragment};

/// Names the output file and the fragment handed to each participant.
///
/// The first non-empty line is the output path; every following non-empty
/// line is one fragment, in assignment order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub output: PathBuf,
    pub fragments: Vec<PathBuf>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents =
            fs::read_to_string(path).map_err(|source| Error::Manifest {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(path, &contents)
    }

    /// `path` is only used to name the manifest in errors.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, Error> {
        let mut lines = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());
        let output = lines.next().ok_or_else(|| Error::EmptyManifest {
            path: path.to_owned(),
        })?;
        Ok(Self {
            output: output.into(),
            fragments: lines.map(PathBuf::from).collect(),
        })
    }

    /// Opens every fragment up front so a missing file fails the run before
    /// anything is bound.
    pub fn open_fragments(&self) -> Result<Vec<Fragment>, Error> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(index, path)| {
                debug!(index, path = %path.display(), "opening fragment");
                Fragment::open(index, path)
            })
            .collect()
    }
}
