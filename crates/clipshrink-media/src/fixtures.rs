//! Progressive MP4 writer for tests.
//!
//! Produces small but structurally complete files (`ftyp`, `moov`, `mdat`)
//! with a constant-rate video track and/or an AAC-style audio track. Sample
//! payloads are filled with [`Mp4FixtureBuilder::fill_byte`] so readers can
//! verify they fetched the right bytes.

use crate::mp4::{Rotation, TransformMatrix};
use bytes::{BufMut, BytesMut};
use std::path::Path;

const MOVIE_TIMESCALE: u32 = 1000;
const AUDIO_FRAME: u32 = 1024;

#[derive(Debug, Clone)]
struct VideoSpec {
    width: u16,
    height: u16,
    fps: u32,
    frames: u32,
    sample_size: u32,
    keyframe_interval: Option<u32>,
}

#[derive(Debug, Clone)]
struct AudioSpec {
    sample_rate: u32,
    channels: u16,
    samples: u32,
    sample_size: u32,
}

/// Builder for synthetic MP4 files.
#[derive(Debug, Clone, Default)]
pub struct Mp4FixtureBuilder {
    video: Option<VideoSpec>,
    audio: Option<AudioSpec>,
    matrix: TransformMatrix,
    large_headers: bool,
}

impl Mp4FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload byte used for sample `index`.
    pub fn fill_byte(index: u32) -> u8 {
        (index % 250) as u8 + 1
    }

    /// Add a video track of `frames` frames at `fps`.
    pub fn video(mut self, width: u16, height: u16, fps: u32, frames: u32) -> Self {
        self.video = Some(VideoSpec {
            width,
            height,
            fps: fps.max(1),
            frames,
            sample_size: 64,
            keyframe_interval: None,
        });
        self
    }

    pub fn video_sample_size(mut self, size: u32) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.sample_size = size;
        }
        self
    }

    /// Emit an `stss` with a sync sample every `interval` frames.
    pub fn keyframe_interval(mut self, interval: u32) -> Self {
        if let Some(video) = self.video.as_mut() {
            video.keyframe_interval = Some(interval.max(1));
        }
        self
    }

    /// Add an audio track of `samples` 1024-frame packets.
    pub fn audio(mut self, sample_rate: u32, channels: u16, samples: u32) -> Self {
        self.audio = Some(AudioSpec {
            sample_rate,
            channels,
            samples,
            sample_size: 32,
        });
        self
    }

    pub fn audio_sample_size(mut self, size: u32) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.sample_size = size;
        }
        self
    }

    /// Display rotation written into the video `tkhd`.
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.matrix = TransformMatrix::for_rotation(rotation);
        self
    }

    /// Write version 1 (64-bit) `tkhd`/`mdhd` boxes.
    pub fn large_headers(mut self) -> Self {
        self.large_headers = true;
        self
    }

    /// Serialize the file.
    pub fn build(&self) -> Vec<u8> {
        let ftyp = self.ftyp();
        // moov size does not depend on the chunk offsets, so lay it out once
        // to learn where mdat payload starts.
        let probe = self.moov(0);
        let mdat_payload = (ftyp.len() + probe.len() + 8) as u64;
        let moov = self.moov(mdat_payload);

        let mut buf = BytesMut::with_capacity(ftyp.len() + moov.len() + 8);
        buf.put_slice(&ftyp);
        buf.put_slice(&moov);

        let start = open_box(&mut buf, b"mdat");
        if let Some(video) = &self.video {
            for i in 0..video.frames {
                buf.put_bytes(Self::fill_byte(i), video.sample_size as usize);
            }
        }
        if let Some(audio) = &self.audio {
            for i in 0..audio.samples {
                buf.put_bytes(Self::fill_byte(i), audio.sample_size as usize);
            }
        }
        close_box(&mut buf, start);

        buf.to_vec()
    }

    /// Serialize the file to `path`.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.build())
    }

    fn ftyp(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        let start = open_box(&mut buf, b"ftyp");
        buf.put_slice(b"isom");
        buf.put_u32(0x200);
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            buf.put_slice(brand);
        }
        close_box(&mut buf, start);
        buf
    }

    fn video_duration_ms(&self) -> u64 {
        self.video
            .as_ref()
            .map_or(0, |v| v.frames as u64 * 1000 / v.fps as u64)
    }

    fn audio_duration_ms(&self) -> u64 {
        self.audio.as_ref().map_or(0, |a| {
            (a.samples as u64 * AUDIO_FRAME as u64 * 1000) / a.sample_rate.max(1) as u64
        })
    }

    fn moov(&self, mdat_payload: u64) -> BytesMut {
        let mut buf = BytesMut::new();
        let moov = open_box(&mut buf, b"moov");

        let duration = self.video_duration_ms().max(self.audio_duration_ms());
        self.mvhd(&mut buf, duration);

        let mut next_offset = mdat_payload;
        let mut track_id = 1;
        if let Some(video) = &self.video {
            self.video_trak(&mut buf, track_id, video, next_offset as u32);
            next_offset += video.frames as u64 * video.sample_size as u64;
            track_id += 1;
        }
        if let Some(audio) = &self.audio {
            self.audio_trak(&mut buf, track_id, audio, next_offset as u32);
        }

        close_box(&mut buf, moov);
        buf
    }

    fn mvhd(&self, buf: &mut BytesMut, duration: u64) {
        let start = open_box(buf, b"mvhd");
        buf.put_u32(0); // version 0, flags
        buf.put_u32(0); // creation
        buf.put_u32(0); // modification
        buf.put_u32(MOVIE_TIMESCALE);
        buf.put_u32(duration as u32);
        buf.put_u32(0x0001_0000); // rate 1.0
        buf.put_u16(0x0100); // volume 1.0
        buf.put_bytes(0, 10);
        buf.put_slice(&TransformMatrix::IDENTITY.to_be_bytes());
        buf.put_bytes(0, 24);
        buf.put_u32(3); // next track id
        close_box(buf, start);
    }

    fn tkhd(
        &self,
        buf: &mut BytesMut,
        track_id: u32,
        duration_ms: u64,
        matrix: TransformMatrix,
        size: (u16, u16),
        is_audio: bool,
    ) {
        let start = open_box(buf, b"tkhd");
        if self.large_headers {
            buf.put_u32(0x0100_0003);
            buf.put_u64(0);
            buf.put_u64(0);
            buf.put_u32(track_id);
            buf.put_u32(0);
            buf.put_u64(duration_ms);
        } else {
            buf.put_u32(0x0000_0003);
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(track_id);
            buf.put_u32(0);
            buf.put_u32(duration_ms as u32);
        }
        buf.put_bytes(0, 8);
        buf.put_u16(0); // layer
        buf.put_u16(if is_audio { 1 } else { 0 }); // alternate group
        buf.put_u16(if is_audio { 0x0100 } else { 0 });
        buf.put_u16(0);
        buf.put_slice(&matrix.to_be_bytes());
        buf.put_u32((size.0 as u32) << 16);
        buf.put_u32((size.1 as u32) << 16);
        close_box(buf, start);
    }

    fn mdhd(&self, buf: &mut BytesMut, timescale: u32, duration: u64) {
        let start = open_box(buf, b"mdhd");
        if self.large_headers {
            buf.put_u32(0x0100_0000);
            buf.put_u64(0);
            buf.put_u64(0);
            buf.put_u32(timescale);
            buf.put_u64(duration);
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(0);
            buf.put_u32(timescale);
            buf.put_u32(duration as u32);
        }
        buf.put_u16(0x55C4); // "und"
        buf.put_u16(0);
        close_box(buf, start);
    }

    fn hdlr(buf: &mut BytesMut, handler: &[u8; 4]) {
        let start = open_box(buf, b"hdlr");
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_slice(handler);
        buf.put_bytes(0, 12);
        buf.put_u8(0); // empty name
        close_box(buf, start);
    }

    fn video_trak(&self, buf: &mut BytesMut, track_id: u32, video: &VideoSpec, chunk_offset: u32) {
        let timescale = video.fps * 1000;
        let trak = open_box(buf, b"trak");
        self.tkhd(
            buf,
            track_id,
            self.video_duration_ms(),
            self.matrix,
            (video.width, video.height),
            false,
        );

        let mdia = open_box(buf, b"mdia");
        self.mdhd(buf, timescale, video.frames as u64 * 1000);
        Self::hdlr(buf, b"vide");
        let minf = open_box(buf, b"minf");
        let stbl = open_box(buf, b"stbl");

        let stsd = open_box(buf, b"stsd");
        buf.put_u32(0);
        buf.put_u32(1);
        let entry = open_box(buf, b"avc1");
        buf.put_bytes(0, 6);
        buf.put_u16(1); // data reference index
        buf.put_bytes(0, 16);
        buf.put_u16(video.width);
        buf.put_u16(video.height);
        buf.put_u32(0x0048_0000);
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame count
        buf.put_bytes(0, 32); // compressor name
        buf.put_u16(0x0018);
        buf.put_i16(-1);
        let avcc = open_box(buf, b"avcC");
        buf.put_slice(&[0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE0, 0x00]);
        close_box(buf, avcc);
        close_box(buf, entry);
        close_box(buf, stsd);

        stts(buf, video.frames, 1000);
        if let Some(interval) = video.keyframe_interval {
            let start = open_box(buf, b"stss");
            let sync: Vec<u32> = (0..video.frames)
                .step_by(interval as usize)
                .map(|i| i + 1)
                .collect();
            buf.put_u32(0);
            buf.put_u32(sync.len() as u32);
            for number in sync {
                buf.put_u32(number);
            }
            close_box(buf, start);
        }
        single_chunk(buf, video.frames, video.sample_size, chunk_offset);

        close_box(buf, stbl);
        close_box(buf, minf);
        close_box(buf, mdia);
        close_box(buf, trak);
    }

    fn audio_trak(&self, buf: &mut BytesMut, track_id: u32, audio: &AudioSpec, chunk_offset: u32) {
        let trak = open_box(buf, b"trak");
        self.tkhd(
            buf,
            track_id,
            self.audio_duration_ms(),
            TransformMatrix::IDENTITY,
            (0, 0),
            true,
        );

        let mdia = open_box(buf, b"mdia");
        self.mdhd(
            buf,
            audio.sample_rate,
            audio.samples as u64 * AUDIO_FRAME as u64,
        );
        Self::hdlr(buf, b"soun");
        let minf = open_box(buf, b"minf");
        let stbl = open_box(buf, b"stbl");

        let stsd = open_box(buf, b"stsd");
        buf.put_u32(0);
        buf.put_u32(1);
        let entry = open_box(buf, b"mp4a");
        buf.put_bytes(0, 6);
        buf.put_u16(1);
        buf.put_u16(0); // version
        buf.put_u16(0); // revision
        buf.put_u32(0); // vendor
        buf.put_u16(audio.channels);
        buf.put_u16(16);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32((audio.sample_rate & 0xFFFF) << 16);
        let esds = open_box(buf, b"esds");
        buf.put_u32(0);
        buf.put_slice(&[0x03, 0x19, 0x00, 0x00, 0x00, 0x04, 0x11, 0x40, 0x15]);
        close_box(buf, esds);
        close_box(buf, entry);
        close_box(buf, stsd);

        stts(buf, audio.samples, AUDIO_FRAME);
        single_chunk(buf, audio.samples, audio.sample_size, chunk_offset);

        close_box(buf, stbl);
        close_box(buf, minf);
        close_box(buf, mdia);
        close_box(buf, trak);
    }
}

fn open_box(buf: &mut BytesMut, kind: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // patched in close_box
    buf.put_slice(kind);
    start
}

fn close_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn stts(buf: &mut BytesMut, count: u32, delta: u32) {
    let start = open_box(buf, b"stts");
    buf.put_u32(0);
    buf.put_u32(1);
    buf.put_u32(count);
    buf.put_u32(delta);
    close_box(buf, start);
}

/// stsc/stsz/stco for a track stored as one contiguous chunk.
fn single_chunk(buf: &mut BytesMut, count: u32, sample_size: u32, offset: u32) {
    let stsc = open_box(buf, b"stsc");
    buf.put_u32(0);
    buf.put_u32(1);
    buf.put_u32(1);
    buf.put_u32(count);
    buf.put_u32(1);
    close_box(buf, stsc);

    let stsz = open_box(buf, b"stsz");
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_u32(count);
    for _ in 0..count {
        buf.put_u32(sample_size);
    }
    close_box(buf, stsz);

    let stco = open_box(buf, b"stco");
    buf.put_u32(0);
    buf.put_u32(1);
    buf.put_u32(offset);
    close_box(buf, stco);
}
