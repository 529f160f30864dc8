//! Sequential access to a track's compressed samples.

use super::{SampleEntry, TrackInfo};
use crate::{Error, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// One compressed sample read from the file.
#[derive(Debug, Clone)]
pub struct Mp4Sample {
    pub data: Bytes,
    /// Decode time in `timescale` units.
    pub dts: u64,
    /// Presentation time in `timescale` units.
    pub pts: u64,
    pub duration: u32,
    pub timescale: u32,
    pub is_keyframe: bool,
}

/// Reads the samples of one track in decode order.
pub struct Mp4SampleReader<R> {
    reader: R,
    samples: Vec<SampleEntry>,
    timescale: u32,
    next: usize,
    stream_len: Option<u64>,
}

impl Mp4SampleReader<BufReader<File>> {
    /// Open `path` and read the samples described by `track`.
    pub fn open<P: AsRef<Path>>(path: P, track: &TrackInfo) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), track))
    }
}

impl<R: Read + Seek> Mp4SampleReader<R> {
    pub fn new(reader: R, track: &TrackInfo) -> Self {
        Self {
            reader,
            samples: track.sample_table.samples.clone(),
            timescale: track.timescale,
            next: 0,
            stream_len: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Index of the sample the next call to [`Self::next_sample`] returns.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Read the sample at `index` without moving the cursor.
    pub fn read_sample(&mut self, index: u32) -> Result<Mp4Sample> {
        let entry = *self
            .samples
            .get(index as usize)
            .ok_or(Error::SampleOutOfRange {
                index,
                count: self.samples.len() as u32,
            })?;

        let len = match self.stream_len {
            Some(len) => len,
            None => {
                let len = self.reader.seek(SeekFrom::End(0))?;
                self.stream_len = Some(len);
                len
            }
        };
        let end = entry.offset.saturating_add(u64::from(entry.size));
        if end > len {
            return Err(Error::SampleBeyondEof { index, end, len });
        }

        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0u8; entry.size as usize];
        self.reader.read_exact(&mut data)?;

        Ok(Mp4Sample {
            data: Bytes::from(data),
            dts: entry.dts,
            pts: entry.pts(),
            duration: entry.duration,
            timescale: self.timescale,
            is_keyframe: entry.is_keyframe,
        })
    }

    /// Read the next sample, or `None` once the track is exhausted.
    pub fn next_sample(&mut self) -> Result<Option<Mp4Sample>> {
        if self.next >= self.samples.len() {
            return Ok(None);
        }
        let sample = self.read_sample(self.next as u32)?;
        self.next += 1;
        Ok(Some(sample))
    }
}
