//! Native FFmpeg backend using ffmpeg-the-third bindings.
//!
//! [`FfmpegSource`] decodes video into packed YUV 4:2:0 frames and reads audio
//! packets unchanged. [`FfmpegWriterFactory`] encodes H.264 at the requested
//! bitrate, copies the source audio stream, and muxes by file extension.
//! Requires the `native-ffmpeg` feature.

use super::{
    AudioTrackInfo, MediaSource, MediaTime, MediaWriter, ReaderOutput, ReaderStatus, SampleBuffer,
    SourceTracks, TrackHandle, TrackReader, VideoEncoderSettings, VideoTrackInfo, WriterFactory,
    WriterInput,
};
use crate::track::Transform;
use crate::{Error, Result};
use bytes::Bytes;
use clipshrink_media::TransformMatrix;
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::format::Pixel;
use ffmpeg::media::Type as MediaType;
use ffmpeg::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{Packet, Rational};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Timescale of decoded video frames.
const VIDEO_TIMESCALE: i32 = 90_000;

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() -> Result<()> {
    let mut result = Ok(());
    FFMPEG_INIT.call_once(|| {
        result = ffmpeg::init().map_err(Error::from);
    });
    result
}

fn media_time(ts: i64, time_base: Rational) -> MediaTime {
    MediaTime::new(
        ts * time_base.numerator() as i64,
        time_base.denominator(),
    )
}

/// `time` in units of `time_base`, rounded to nearest.
fn stream_ts(time: MediaTime, time_base: Rational) -> i64 {
    let num = time.value as i128 * time_base.denominator() as i128;
    let den = time.timescale as i128 * time_base.numerator() as i128;
    if den == 0 {
        return 0;
    }
    let half = den.abs() / 2;
    if num >= 0 {
        ((num + half) / den) as i64
    } else {
        ((num - half) / den) as i64
    }
}

fn display_matrix(stream: &ffmpeg::format::stream::Stream) -> TransformMatrix {
    // SAFETY: codecpar is owned by the open input context borrowed by `stream`.
    unsafe {
        let par = (*stream.as_ptr()).codecpar;
        if par.is_null() {
            return TransformMatrix::IDENTITY;
        }
        let side = ffmpeg::ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side.is_null() || (*side).size < 36 {
            return TransformMatrix::IDENTITY;
        }
        let bytes = std::slice::from_raw_parts((*side).data, 36);
        let mut matrix = [0i32; 9];
        for (i, chunk) in bytes.chunks_exact(4).enumerate() {
            matrix[i] = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        TransformMatrix(matrix)
    }
}

/// A media file opened through libavformat.
#[derive(Debug)]
pub struct FfmpegSource {
    path: PathBuf,
    tracks: SourceTracks,
}

impl FfmpegSource {
    /// Open `path` and probe its streams.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        init_ffmpeg()?;
        let path = path.as_ref().to_path_buf();
        let context = ffmpeg::format::input(&path)?;

        let container_secs = if context.duration() > 0 {
            context.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        let mut tracks = SourceTracks {
            duration_secs: container_secs,
            ..SourceTracks::default()
        };

        for stream in context.streams() {
            let codec_ctx = codec::context::Context::from_parameters(stream.parameters())?;
            let handle = TrackHandle(stream.index() as u32);
            let codec = Some(format!("{:?}", codec_ctx.id()));
            let duration_secs = if stream.duration() > 0 {
                f64::from(stream.time_base()) * stream.duration() as f64
            } else {
                container_secs
            };

            match codec_ctx.medium() {
                MediaType::Video => {
                    let transform = Transform::from_matrix(display_matrix(&stream));
                    if let Ok(video) = codec_ctx.decoder().video() {
                        let rate = stream.avg_frame_rate();
                        let frame_rate = if rate.denominator() != 0 {
                            f64::from(rate)
                        } else {
                            0.0
                        };
                        let estimated_data_rate = match video.bit_rate() {
                            0 => context.bit_rate().max(0) as f64,
                            bps => bps as f64,
                        };
                        tracks.video.push(VideoTrackInfo {
                            handle,
                            duration_secs,
                            frame_rate,
                            width: video.width(),
                            height: video.height(),
                            estimated_data_rate,
                            transform,
                            codec,
                        });
                    }
                }
                MediaType::Audio => {
                    if let Ok(audio) = codec_ctx.decoder().audio() {
                        tracks.audio.push(AudioTrackInfo {
                            handle,
                            duration_secs,
                            sample_rate: audio.rate(),
                            channels: audio.ch_layout().channels() as u16,
                            codec,
                        });
                    }
                }
                _ => {}
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "probed {:?}: {} video, {} audio track(s)",
            path,
            tracks.video.len(),
            tracks.audio.len()
        );

        Ok(Self { path, tracks })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MediaSource for FfmpegSource {
    fn tracks(&self) -> Result<SourceTracks> {
        Ok(self.tracks.clone())
    }

    fn open_reader(&self, track: TrackHandle, output: ReaderOutput) -> Result<Box<dyn TrackReader>> {
        let input = ffmpeg::format::input(&self.path)?;
        let stream = input
            .stream(track.0 as usize)
            .ok_or(Error::TrackNotFound(track.0))?;
        let time_base = stream.time_base();

        match output {
            ReaderOutput::Passthrough => {
                drop(stream);
                Ok(Box::new(PacketReader {
                    input,
                    stream_index: track.0 as usize,
                    time_base,
                    status: ReaderStatus::Unknown,
                }))
            }
            ReaderOutput::DecodedVideo => {
                let decoder = codec::context::Context::from_parameters(stream.parameters())?
                    .decoder()
                    .video()?;
                let rate = stream.avg_frame_rate();
                let frame_duration = if rate.numerator() > 0 {
                    MediaTime::from_seconds(1.0 / f64::from(rate), VIDEO_TIMESCALE)
                } else {
                    MediaTime::new(0, VIDEO_TIMESCALE)
                };
                drop(stream);
                Ok(Box::new(DecodingReader {
                    input,
                    stream_index: track.0 as usize,
                    time_base,
                    frame_duration,
                    decoder,
                    scaler: None,
                    pending: VecDeque::new(),
                    eof_sent: false,
                    status: ReaderStatus::Unknown,
                }))
            }
        }
    }
}

/// Reads compressed packets of one stream.
struct PacketReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: Rational,
    status: ReaderStatus,
}

// SAFETY: the input context is owned exclusively by this reader, which the
// relay moves to one thread at a time.
unsafe impl Send for PacketReader {}

impl TrackReader for PacketReader {
    fn start_reading(&mut self) -> Result<()> {
        if self.status != ReaderStatus::Unknown {
            return Err(Error::invalid_input("reader already started"));
        }
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn copy_next_sample(&mut self) -> Option<SampleBuffer> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        loop {
            let next = self
                .input
                .packets()
                .next()
                .map(|r| r.map(|(stream, packet)| (stream.index(), packet)));
            match next {
                None => {
                    self.status = ReaderStatus::Completed;
                    return None;
                }
                Some(Err(e)) => {
                    self.status = ReaderStatus::Failed(e.to_string());
                    return None;
                }
                Some(Ok((index, packet))) if index == self.stream_index => {
                    let ts = packet.pts().or(packet.dts()).unwrap_or(0);
                    let data = Bytes::copy_from_slice(packet.data().unwrap_or(&[]));
                    return Some(
                        SampleBuffer::new(
                            data,
                            media_time(ts, self.time_base),
                            media_time(packet.duration(), self.time_base),
                        )
                        .with_sync(packet.is_key()),
                    );
                }
                Some(Ok(_)) => {}
            }
        }
    }

    fn status(&self) -> ReaderStatus {
        self.status.clone()
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.status = ReaderStatus::Cancelled;
        }
    }
}

/// Decodes one video stream into packed YUV420P frames.
struct DecodingReader {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: Rational,
    frame_duration: MediaTime,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ScaleCtx>,
    pending: VecDeque<SampleBuffer>,
    eof_sent: bool,
    status: ReaderStatus,
}

// SAFETY: the input, decoder and scaler are owned exclusively by this reader,
// which the relay moves to one thread at a time.
unsafe impl Send for DecodingReader {}

/// Copy the visible area of a YUV420P frame into one contiguous buffer.
fn pack_yuv420p(frame: &VideoFrame) -> Vec<u8> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let mut packed = Vec::with_capacity(width * height * 3 / 2);
    for plane in 0..3 {
        let (w, h) = if plane == 0 {
            (width, height)
        } else {
            (width.div_ceil(2), height.div_ceil(2))
        };
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..h {
            packed.extend_from_slice(&data[row * stride..row * stride + w]);
        }
    }
    packed
}

impl DecodingReader {
    fn receive_frames(&mut self) -> Result<()> {
        let mut decoded = VideoFrame::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let packed = if decoded.format() == Pixel::YUV420P {
                pack_yuv420p(&decoded)
            } else {
                let scaler = match self.scaler.as_mut() {
                    Some(scaler) => scaler,
                    None => self.scaler.insert(ScaleCtx::get(
                        decoded.format(),
                        decoded.width(),
                        decoded.height(),
                        Pixel::YUV420P,
                        decoded.width(),
                        decoded.height(),
                        ScaleFlags::BILINEAR,
                    )?),
                };
                let mut yuv = VideoFrame::empty();
                scaler.run(&decoded, &mut yuv)?;
                pack_yuv420p(&yuv)
            };

            let ts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            let pts = media_time(ts, self.time_base).rescale(VIDEO_TIMESCALE);
            self.pending.push_back(
                SampleBuffer::new(packed, pts, self.frame_duration)
                    .with_sync(decoded.is_key()),
            );
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        while self.pending.is_empty() && !self.eof_sent {
            let next = self
                .input
                .packets()
                .next()
                .map(|r| r.map(|(stream, packet)| (stream.index(), packet)));
            match next {
                None => {
                    self.decoder.send_eof()?;
                    self.eof_sent = true;
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok((index, packet))) if index == self.stream_index => {
                    self.decoder.send_packet(&packet)?;
                }
                Some(Ok(_)) => continue,
            }
            self.receive_frames()?;
        }
        Ok(())
    }
}

impl TrackReader for DecodingReader {
    fn start_reading(&mut self) -> Result<()> {
        if self.status != ReaderStatus::Unknown {
            return Err(Error::invalid_input("reader already started"));
        }
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn copy_next_sample(&mut self) -> Option<SampleBuffer> {
        if self.status != ReaderStatus::Reading {
            return None;
        }
        if let Err(e) = self.fill() {
            self.status = ReaderStatus::Failed(e.to_string());
            return None;
        }
        let sample = self.pending.pop_front();
        if sample.is_none() {
            self.status = ReaderStatus::Completed;
        }
        sample
    }

    fn status(&self) -> ReaderStatus {
        self.status.clone()
    }

    fn cancel_reading(&mut self) {
        if matches!(self.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            self.pending.clear();
            self.status = ReaderStatus::Cancelled;
        }
    }
}

/// Creates H.264 writers.
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    audio_source: Option<PathBuf>,
    preset: String,
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self {
            audio_source: None,
            preset: "medium".to_string(),
        }
    }
}

impl FfmpegWriterFactory {
    /// A factory without audio support.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose writers copy audio stream parameters from `source`.
    pub fn for_source(source: &FfmpegSource) -> Self {
        Self {
            audio_source: Some(source.path().to_path_buf()),
            ..Self::default()
        }
    }

    /// x264 preset name.
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = preset.into();
        self
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create_writer(&self, destination: &Path) -> Result<Box<dyn MediaWriter>> {
        init_ffmpeg()?;
        if destination.exists() {
            return Err(Error::destination_exists(destination));
        }
        let octx = ffmpeg::format::output(destination)?;
        Ok(Box::new(FfmpegWriter {
            destination: destination.to_path_buf(),
            audio_source: self.audio_source.clone(),
            preset: self.preset.clone(),
            state: Arc::new(Mutex::new(Some(OutputState {
                octx,
                video: None,
                audio: None,
                session_start: MediaTime::ZERO,
                header_written: false,
            }))),
        }))
    }
}

struct VideoEncoding {
    encoder: ffmpeg::encoder::Video,
    stream_index: usize,
    time_base: Rational,
    width: u32,
    height: u32,
    finished: bool,
}

struct AudioCopy {
    stream_index: usize,
    sample_rate: u32,
    finished: bool,
}

struct OutputState {
    octx: ffmpeg::format::context::Output,
    video: Option<VideoEncoding>,
    audio: Option<AudioCopy>,
    session_start: MediaTime,
    header_written: bool,
}

// SAFETY: every FFmpeg handle in here is only touched while holding the
// writer's mutex.
unsafe impl Send for OutputState {}

type SharedOutput = Arc<Mutex<Option<OutputState>>>;

fn closed() -> Error {
    Error::backend("writer is closed")
}

impl OutputState {
    /// Drain encoded packets into the muxer.
    fn write_encoded(&mut self) -> Result<()> {
        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };
        let out_tb = self
            .octx
            .stream(video.stream_index)
            .map(|s| s.time_base())
            .unwrap_or(video.time_base);
        let mut packet = Packet::empty();
        loop {
            match video.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(video.stream_index);
                    packet.rescale_ts(video.time_base, out_tb);
                    packet.write_interleaved(&mut self.octx)?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == libc::EAGAIN => return Ok(()),
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn encode(&mut self, sample: &SampleBuffer) -> Result<()> {
        let video = self.video.as_mut().ok_or_else(closed)?;
        let (width, height) = (video.width as usize, video.height as usize);
        let expected = width * height + 2 * (width.div_ceil(2) * height.div_ceil(2));
        if sample.data.len() < expected {
            return Err(Error::invalid_input(format!(
                "frame has {} bytes, expected {}",
                sample.data.len(),
                expected
            )));
        }

        let mut frame = VideoFrame::new(Pixel::YUV420P, video.width, video.height);
        let mut offset = 0;
        for plane in 0..3 {
            let (w, h) = if plane == 0 {
                (width, height)
            } else {
                (width.div_ceil(2), height.div_ceil(2))
            };
            let stride = frame.stride(plane);
            let data = frame.data_mut(plane);
            for row in 0..h {
                data[row * stride..row * stride + w]
                    .copy_from_slice(&sample.data[offset..offset + w]);
                offset += w;
            }
        }
        let pts = MediaTime::new(
            sample.pts.rescale(VIDEO_TIMESCALE).value
                - self.session_start.rescale(VIDEO_TIMESCALE).value,
            VIDEO_TIMESCALE,
        );
        frame.set_pts(Some(stream_ts(pts, video.time_base)));

        video.encoder.send_frame(&frame)?;
        self.write_encoded()
    }

    fn copy_audio(&mut self, sample: &SampleBuffer) -> Result<()> {
        let audio = self.audio.as_ref().ok_or_else(closed)?;
        let stream_index = audio.stream_index;
        let sample_rate = audio.sample_rate;
        let out_tb = self
            .octx
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or(Error::TrackNotFound(stream_index as u32))?;

        let start = self.session_start.rescale(sample.pts.timescale.max(1)).value;
        let pts = MediaTime::new(sample.pts.value - start, sample.pts.timescale);

        let mut packet = Packet::copy(&sample.data);
        packet.set_stream(stream_index);
        packet.set_pts(Some(stream_ts(pts, out_tb)));
        packet.set_dts(Some(stream_ts(pts, out_tb)));
        packet.set_duration(stream_ts(sample.duration, out_tb));
        if sample.is_sync {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }

        if let Some(trim) = sample.trim_at_start {
            let skip = trim.rescale(sample_rate as i32).value.max(0) as u32;
            // SAFETY: the packet owns its side data; FFmpeg allocates the 10
            // bytes of AV_PKT_DATA_SKIP_SAMPLES and we fill all of them.
            unsafe {
                let data = ffmpeg::ffi::av_packet_new_side_data(
                    packet.as_mut_ptr(),
                    ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_SKIP_SAMPLES,
                    10,
                );
                if data.is_null() {
                    return Err(Error::backend("could not allocate skip-samples side data"));
                }
                let side = std::slice::from_raw_parts_mut(data, 10);
                side.fill(0);
                side[..4].copy_from_slice(&skip.to_le_bytes());
            }
        }

        packet.write_interleaved(&mut self.octx)?;
        Ok(())
    }
}

/// An output file written through libavformat.
pub struct FfmpegWriter {
    destination: PathBuf,
    audio_source: Option<PathBuf>,
    preset: String,
    state: SharedOutput,
}

impl FfmpegWriter {
    fn attach_display_matrix(octx: &mut ffmpeg::format::context::Output, index: usize, transform: Transform) -> Result<()> {
        if transform.is_identity() {
            return Ok(());
        }
        let matrix = transform.matrix();
        // SAFETY: the stream at `index` was just added to `octx`; FFmpeg owns the
        // side data array and allocates `data` with room for 36 bytes.
        unsafe {
            let stream = *(*octx.as_mut_ptr()).streams.add(index);
            let par = (*stream).codecpar;
            let side = ffmpeg::ffi::av_packet_side_data_new(
                &mut (*par).coded_side_data,
                &mut (*par).nb_coded_side_data,
                ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
                36,
                0,
            );
            if side.is_null() {
                return Err(Error::backend("could not allocate display matrix"));
            }
            let data = std::slice::from_raw_parts_mut((*side).data, 36);
            for (chunk, value) in data.chunks_exact_mut(4).zip(matrix.0) {
                chunk.copy_from_slice(&value.to_ne_bytes());
            }
        }
        Ok(())
    }
}

impl MediaWriter for FfmpegWriter {
    fn add_video_input(&mut self, settings: &VideoEncoderSettings) -> Result<Box<dyn WriterInput>> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(closed)?;
        if state.header_written || state.video.is_some() {
            return Err(Error::invalid_input("video input must be added once, before writing"));
        }

        let h264 = ffmpeg::encoder::find(CodecId::H264)
            .ok_or_else(|| Error::unsupported("no H.264 encoder available"))?;
        let global_header = state
            .octx
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let time_base = Rational::new(1, VIDEO_TIMESCALE);
        let stream_index = {
            let mut stream = state.octx.add_stream(h264)?;
            stream.set_time_base(time_base);
            stream.index()
        };

        let mut encoder = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(Rational::from(settings.frame_rate)));
        encoder.set_bit_rate(settings.bitrate_bps.max(0.0) as usize);
        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = ffmpeg::Dictionary::new();
        options.set("preset", &self.preset);
        let encoder = encoder.open_as_with(h264, options)?;

        // SAFETY: both pointers are live; the stream was added above.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*state.octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
                encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(Error::FFmpeg(format!(
                    "avcodec_parameters_from_context failed: {}",
                    ret
                )));
            }
        }
        Self::attach_display_matrix(&mut state.octx, stream_index, settings.transform)?;

        state.video = Some(VideoEncoding {
            encoder,
            stream_index,
            time_base,
            width: settings.width,
            height: settings.height,
            finished: false,
        });

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "H.264 input: {}x{} @ {:.0} bps ({})",
            settings.width,
            settings.height,
            settings.bitrate_bps,
            self.preset
        );

        Ok(Box::new(FfmpegInput {
            state: Arc::clone(&self.state),
            kind: InputKind::Video,
        }))
    }

    fn add_audio_input(&mut self, track: &AudioTrackInfo) -> Result<Box<dyn WriterInput>> {
        let source = self
            .audio_source
            .as_ref()
            .ok_or_else(|| Error::unsupported("audio copy needs a writer created for the source"))?;
        let input = ffmpeg::format::input(source)?;
        let source_stream = input
            .stream(track.handle.0 as usize)
            .ok_or(Error::TrackNotFound(track.handle.0))?;

        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(closed)?;
        if state.header_written || state.audio.is_some() {
            return Err(Error::invalid_input("audio input must be added once, before writing"));
        }

        let stream_index = {
            let mut stream = state
                .octx
                .add_stream(ffmpeg::encoder::find(CodecId::None))?;
            stream.set_parameters(source_stream.parameters());
            stream.set_time_base(source_stream.time_base());
            // SAFETY: codecpar belongs to the stream just added.
            unsafe {
                (*(*stream.as_mut_ptr()).codecpar).codec_tag = 0;
            }
            stream.index()
        };

        state.audio = Some(AudioCopy {
            stream_index,
            sample_rate: track.sample_rate,
            finished: false,
        });
        Ok(Box::new(FfmpegInput {
            state: Arc::clone(&self.state),
            kind: InputKind::Audio,
        }))
    }

    fn start_writing(&mut self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(closed)?;
        if state.header_written {
            return Err(Error::invalid_input("writer already started"));
        }
        state.octx.write_header()?;
        state.header_written = true;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        if let Some(state) = self.state.lock().as_mut() {
            state.session_start = at;
        }
    }

    fn finish_writing(&mut self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(closed)?;
        if !state.header_written {
            return Err(Error::invalid_input("writer was never started"));
        }
        if state.video.as_ref().is_some_and(|v| !v.finished)
            || state.audio.as_ref().is_some_and(|a| !a.finished)
        {
            return Err(Error::invalid_input("every input must be marked as finished"));
        }
        if let Some(video) = state.video.as_mut() {
            video.encoder.send_eof()?;
        }
        state.write_encoded()?;
        state.octx.write_trailer()?;
        // closes the file
        guard.take();
        Ok(())
    }

    fn cancel_writing(&mut self) {
        if self.state.lock().take().is_none() {
            return;
        }
        if let Err(_e) = std::fs::remove_file(&self.destination) {
            #[cfg(feature = "tracing")]
            tracing::warn!("could not remove {:?}: {}", self.destination, _e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Video,
    Audio,
}

/// Encoding is synchronous, so an input is ready whenever it is open.
struct FfmpegInput {
    state: SharedOutput,
    kind: InputKind,
}

impl FfmpegInput {
    fn is_open(&self) -> bool {
        self.state.lock().as_ref().is_some_and(|state| match self.kind {
            InputKind::Video => state.video.as_ref().is_some_and(|v| !v.finished),
            InputKind::Audio => state.audio.as_ref().is_some_and(|a| !a.finished),
        })
    }
}

impl WriterInput for FfmpegInput {
    fn wait_until_ready(&self, _timeout: Duration) -> bool {
        self.is_open()
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        self.is_open()
    }

    fn append(&mut self, sample: SampleBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(closed)?;
        if !state.header_written {
            return Err(Error::invalid_input("append before start_writing"));
        }
        match self.kind {
            InputKind::Video => state.encode(&sample),
            InputKind::Audio => state.copy_audio(&sample),
        }
    }

    fn mark_as_finished(&mut self) {
        if let Some(state) = self.state.lock().as_mut() {
            match self.kind {
                InputKind::Video => {
                    if let Some(video) = state.video.as_mut() {
                        video.finished = true;
                    }
                }
                InputKind::Audio => {
                    if let Some(audio) = state.audio.as_mut() {
                        audio.finished = true;
                    }
                }
            }
        }
    }
}
