//! MP4 sample table resolution.
//!
//! Sample tables describe how samples (frames) are organized in the file:
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets (for B-frames)

/// A resolved sample: where it lives in the file and when it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Sample index (0-based).
    pub index: u32,
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Sample duration in media timescale.
    pub duration: u32,
    /// Composition time offset (for PTS calculation).
    pub cts_offset: i32,
    /// Whether this sample is a sync sample.
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Presentation timestamp, clamped at zero.
    pub fn pts(&self) -> u64 {
        (self.dts as i64 + self.cts_offset as i64).max(0) as u64
    }
}

/// Resolved per-sample information for one track.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub sample_count: u32,
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    pub fn get(&self, index: u32) -> Option<&SampleEntry> {
        self.samples.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of all sample sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.samples.iter().map(|s| s.size as u64).sum()
    }
}

/// Collects the raw stbl tables and resolves them into a [`SampleTable`].
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    /// (count, delta)
    stts_entries: Vec<(u32, u32)>,
    /// 1-based sample numbers; empty means every sample is sync
    sync_samples: Vec<u32>,
    /// (first_chunk, samples_per_chunk), first_chunk is 1-based
    stsc_entries: Vec<(u32, u32)>,
    uniform_size: u32,
    declared_count: u32,
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    /// (count, offset)
    ctts_entries: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = samples;
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32)>) {
        self.stsc_entries = entries;
    }

    /// Sample sizes; when `uniform_size` is non-zero `sizes` is ignored and
    /// `count` samples share that size.
    pub fn set_stsz(&mut self, uniform_size: u32, count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.declared_count = count;
        self.sample_sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    fn size_of(&self, index: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(index).copied().unwrap_or(0)
        }
    }

    /// Resolve every sample's offset, size, timing and sync flag.
    pub fn build(self) -> SampleTable {
        let sample_count = if self.uniform_size > 0 {
            self.declared_count
        } else {
            self.sample_sizes.len() as u32
        };
        if sample_count == 0 {
            return SampleTable::default();
        }

        let n = sample_count as usize;
        let offsets = self.resolve_offsets(n);
        let timing = self.resolve_timing(n);
        let cts = self.resolve_cts_offsets(n);
        let sync: std::collections::HashSet<u32> = self.sync_samples.iter().copied().collect();

        let samples = (0..n)
            .map(|i| SampleEntry {
                index: i as u32,
                offset: offsets[i],
                size: self.size_of(i),
                dts: timing[i].0,
                duration: timing[i].1,
                cts_offset: cts[i],
                is_keyframe: sync.is_empty() || sync.contains(&(i as u32 + 1)),
            })
            .collect();

        SampleTable {
            sample_count,
            samples,
        }
    }

    /// Walk chunks in order, laying samples back to back inside each chunk.
    fn resolve_offsets(&self, n: usize) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(n);
        let chunk_count = self.chunk_offsets.len() as u32;

        'entries: for (i, &(first_chunk, per_chunk)) in self.stsc_entries.iter().enumerate() {
            let next_first = self
                .stsc_entries
                .get(i + 1)
                .map_or(chunk_count + 1, |e| e.0);
            for chunk in first_chunk.max(1)..next_first.min(chunk_count + 1) {
                let mut pos = self.chunk_offsets[(chunk - 1) as usize];
                for _ in 0..per_chunk {
                    if offsets.len() == n {
                        break 'entries;
                    }
                    offsets.push(pos);
                    pos += self.size_of(offsets.len() - 1) as u64;
                }
            }
        }

        // Samples not covered by stsc continue after the last resolved one.
        while offsets.len() < n {
            let next = offsets
                .last()
                .map_or(0, |&last| last + self.size_of(offsets.len() - 1) as u64);
            offsets.push(next);
        }
        offsets
    }

    /// (dts, duration) per sample.
    fn resolve_timing(&self, n: usize) -> Vec<(u64, u32)> {
        let mut timing = Vec::with_capacity(n);
        let mut dts = 0u64;

        for &(count, delta) in &self.stts_entries {
            for _ in 0..count {
                if timing.len() == n {
                    return timing;
                }
                timing.push((dts, delta));
                dts += delta as u64;
            }
        }

        let last = timing.last().map_or(1, |t| t.1);
        while timing.len() < n {
            timing.push((dts, last));
            dts += last as u64;
        }
        timing
    }

    fn resolve_cts_offsets(&self, n: usize) -> Vec<i32> {
        let mut offsets: Vec<i32> = self
            .ctts_entries
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize))
            .take(n)
            .collect();
        offsets.resize(n, 0);
        offsets
    }
}
