#![forbid(unsafe_code)]

use fsmeta_types::{ByteOrder, NTFS_RUN_LIST_END, ParseError, read_int, read_uint};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// One decoded NTFS data run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRun {
    /// Header byte: low nibble = length byte count, high nibble = offset byte count.
    pub header: u8,
    /// Run length in clusters.
    pub length: u64,
    /// Signed offset from the previous run's start; `None` for a sparse run.
    pub relative_offset: Option<i64>,
    /// Absolute starting cluster. Sparse runs carry the previous start forward.
    pub start_cluster: i64,
}

impl DataRun {
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.relative_offset.is_none()
    }

    /// Logical cluster number of the run's first cluster, if it is allocated.
    #[must_use]
    pub fn lcn(&self) -> Option<i64> {
        self.relative_offset.map(|_| self.start_cluster)
    }

    /// Number of bytes the run occupies in the encoded list, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + usize::from(self.header & 0x0F) + usize::from(self.header >> 4)
    }
}

/// An ordered, fully decoded run list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunList {
    /// Cluster the first relative offset is applied to.
    pub base: i64,
    pub runs: Vec<DataRun>,
}

impl RunList {
    #[must_use]
    pub fn total_clusters(&self) -> u64 {
        self.runs
            .iter()
            .fold(0_u64, |acc, run| acc.saturating_add(run.length))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// `(length, absolute_start)` pairs in run order.
    #[must_use]
    pub fn extents(&self) -> Vec<(u64, i64)> {
        self.runs
            .iter()
            .map(|run| (run.length, run.start_cluster))
            .collect()
    }
}

/// Cursor over an encoded run list.
///
/// Ends at a zero header byte or at the end of input. A run whose declared
/// field widths exceed the remaining bytes yields one `TruncatedRunList`
/// error and then ends.
pub struct RunListIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    previous: i64,
    done: bool,
}

impl<'a> RunListIter<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8], base: i64) -> Self {
        Self {
            bytes,
            pos: 0,
            previous: base,
            done: false,
        }
    }

    /// Byte offset of the next header.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn fail(&mut self, err: ParseError) -> Option<Result<DataRun, ParseError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for RunListIter<'_> {
    type Item = Result<DataRun, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(&header) = self.bytes.get(self.pos) else {
            self.done = true;
            return None;
        };
        if header == NTFS_RUN_LIST_END {
            self.done = true;
            return None;
        }

        let length_width = usize::from(header & 0x0F);
        let offset_width = usize::from(header >> 4);
        let needed = length_width + offset_width;
        let remaining = self.bytes.len() - self.pos - 1;
        if needed > remaining {
            return self.fail(ParseError::TruncatedRunList {
                offset: self.pos,
                needed,
                remaining,
            });
        }

        let length_at = self.pos + 1;
        let offset_at = length_at + length_width;
        let length = match read_uint(self.bytes, length_at, length_width, ByteOrder::Little) {
            Ok(length) => length,
            Err(err) => return self.fail(err),
        };

        let relative_offset = if offset_width == 0 {
            None
        } else {
            match read_int(self.bytes, offset_at, offset_width, ByteOrder::Little) {
                Ok(offset) => Some(offset),
                Err(err) => return self.fail(err),
            }
        };

        let start_cluster = match self
            .previous
            .checked_add(relative_offset.unwrap_or(0))
        {
            Some(start) => start,
            None => {
                return self.fail(ParseError::InvalidField {
                    field: "run_offset",
                    reason: "absolute cluster overflows i64",
                });
            }
        };

        trace!(
            at = self.pos,
            header,
            length,
            ?relative_offset,
            start_cluster,
            "decoded data run"
        );
        self.pos = offset_at + offset_width;
        self.previous = start_cluster;
        Some(Ok(DataRun {
            header,
            length,
            relative_offset,
            start_cluster,
        }))
    }
}

/// Decode a whole run list starting from `base`.
///
/// Empty input and a leading zero header both decode to an empty list.
pub fn decode_run_list(bytes: &[u8], base: i64) -> Result<RunList, ParseError> {
    let runs = RunListIter::new(bytes, base).collect::<Result<Vec<_>, _>>()?;
    debug!(base, runs = runs.len(), "decoded run list");
    Ok(RunList { base, runs })
}
