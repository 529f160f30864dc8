//! MP4 file reader with atom parsing.

use super::{Atom, AtomType, HandlerType, Mp4File, SampleTableBuilder, TrackInfo, TransformMatrix};
use crate::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// Offset of the first sample entry inside `stsd` data
/// (version/flags + entry count).
const STSD_ENTRY_OFFSET: usize = 8;

/// Offset of child boxes inside a visual sample entry, relative to `stsd` data.
const VISUAL_ENTRY_CHILDREN: usize = 94;

/// Offset of child boxes inside an audio sample entry, relative to `stsd` data.
const AUDIO_ENTRY_CHILDREN: usize = 44;

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8)
        .map(|b| u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Entry count of a full-box table, bounded by what the data can hold.
fn table_len(data: &[u8], entry_size: usize) -> usize {
    let declared = be_u32(data, 4).unwrap_or(0) as usize;
    declared.min(data.len().saturating_sub(8) / entry_size)
}

/// Find a child box by type in `data[start..]`, returning its payload.
fn find_child_box<'a>(data: &'a [u8], start: usize, wanted: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut pos = start;
    while pos + 8 <= data.len() {
        let box_size = be_u32(data, pos)? as usize;
        if box_size < 8 || pos + box_size > data.len() {
            return None;
        }
        let box_type = &data[pos + 4..pos + 8];
        if wanted.iter().any(|w| box_type == &w[..]) {
            return Some(&data[pos + 8..pos + box_size]);
        }
        pos += box_size;
    }
    None
}

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    /// Create a new MP4 reader.
    pub fn new(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, file_size })
    }

    /// Parse the MP4 file.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let mut mp4 = Mp4File {
            duration: 0,
            timescale: 1000,
            video_track: None,
            audio_track: None,
            has_faststart: false,
        };

        let mut moov_offset = None;
        let mut mdat_offset = None;

        for atom in self.read_atoms(0, self.file_size)? {
            match atom.atom_type {
                AtomType::MOOV => {
                    moov_offset = Some(atom.data_offset - atom.header_size as u64);
                    self.parse_moov(&atom, &mut mp4)?;
                }
                AtomType::MDAT => {
                    mdat_offset = Some(atom.data_offset - atom.header_size as u64);
                }
                _ => {}
            }
        }

        let moov_offset = moov_offset.ok_or(Error::MissingAtom("moov"))?;
        mp4.has_faststart = mdat_offset.map_or(true, |mdat| moov_offset < mdat);

        Ok(mp4)
    }

    /// Read sibling atoms in `[start, end)`.
    fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos + 8 <= end {
            self.reader.seek(SeekFrom::Start(pos))?;

            let mut header = [0u8; 8];
            if self.reader.read_exact(&mut header).is_err() {
                break;
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

            let (actual_size, header_size) = match size {
                1 => {
                    let mut ext = [0u8; 8];
                    self.reader.read_exact(&mut ext)?;
                    (u64::from_be_bytes(ext), 16u8)
                }
                // extends to the end of the enclosing box
                0 => (end - pos, 8u8),
                _ => (size, 8u8),
            };

            if actual_size < header_size as u64 {
                break;
            }

            atoms.push(Atom {
                atom_type,
                size: actual_size,
                data_offset: pos + header_size as u64,
                header_size,
            });

            pos += actual_size;
        }

        Ok(atoms)
    }

    fn read_children(&mut self, parent: &Atom) -> Result<Vec<Atom>> {
        self.read_atoms(parent.data_offset, parent.data_offset + parent.data_size())
    }

    /// Read and validate atom data, rejecting oversized atoms.
    fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(Error::AtomTooLarge {
                atom: atom.atom_type,
                size,
                limit: MAX_ATOM_DATA_SIZE,
            });
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    fn parse_moov(&mut self, moov: &Atom, mp4: &mut Mp4File) -> Result<()> {
        for child in self.read_children(moov)? {
            match child.atom_type {
                AtomType::MVHD => self.parse_mvhd(&child, mp4)?,
                AtomType::TRAK => {
                    // skip malformed tracks
                    let Ok(track) = self.parse_trak(&child) else {
                        continue;
                    };
                    match track.handler_type {
                        HandlerType::Video if mp4.video_track.is_none() => {
                            mp4.video_track = Some(track);
                        }
                        HandlerType::Audio if mp4.audio_track.is_none() => {
                            mp4.audio_track = Some(track);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_mvhd(&mut self, atom: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let Some(&version) = data.first() else {
            return Ok(());
        };

        let (timescale, duration) = if version == 0 {
            (be_u32(&data, 12), be_u32(&data, 16).map(u64::from))
        } else {
            (be_u32(&data, 20), be_u64(&data, 24))
        };
        if let (Some(timescale), Some(duration)) = (timescale, duration) {
            mp4.timescale = timescale;
            mp4.duration = duration;
        }
        Ok(())
    }

    fn parse_trak(&mut self, trak: &Atom) -> Result<TrackInfo> {
        let mut track = TrackInfo::new(0);

        for child in self.read_children(trak)? {
            match child.atom_type {
                AtomType::TKHD => self.parse_tkhd(&child, &mut track)?,
                AtomType::MDIA => self.parse_mdia(&child, &mut track)?,
                _ => {}
            }
        }

        Ok(track)
    }

    /// Parse tkhd: track id, display matrix and presentation size.
    ///
    /// v0 layout: id @12, matrix @40, width/height @76/80.
    /// v1 layout: id @20, matrix @52, width/height @88/92.
    fn parse_tkhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let Some(&version) = data.first() else {
            return Ok(());
        };

        let (id_at, matrix_at, size_at) = if version == 0 {
            (12, 40, 76)
        } else {
            (20, 52, 88)
        };

        if let Some(id) = be_u32(&data, id_at) {
            track.track_id = id;
        }
        if let Some(matrix) = data
            .get(matrix_at..matrix_at + 36)
            .and_then(TransformMatrix::from_be_bytes)
        {
            track.matrix = matrix;
        }
        if let (Some(w), Some(h)) = (be_u32(&data, size_at), be_u32(&data, size_at + 4)) {
            // 16.16 fixed point
            track.width = Some(w >> 16);
            track.height = Some(h >> 16);
        }

        Ok(())
    }

    fn parse_mdia(&mut self, mdia: &Atom, track: &mut TrackInfo) -> Result<()> {
        // hdlr must be known before stsd is interpreted, so visit it first.
        let children = self.read_children(mdia)?;
        for child in children.iter().filter(|c| c.atom_type != AtomType::MINF) {
            match child.atom_type {
                AtomType::MDHD => self.parse_mdhd(child, track)?,
                AtomType::HDLR => self.parse_hdlr(child, track)?,
                _ => {}
            }
        }
        for child in children.iter().filter(|c| c.atom_type == AtomType::MINF) {
            self.parse_minf(child, track)?;
        }
        Ok(())
    }

    fn parse_mdhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        let Some(&version) = data.first() else {
            return Ok(());
        };

        let (timescale, duration) = if version == 0 {
            (be_u32(&data, 12), be_u32(&data, 16).map(u64::from))
        } else {
            (be_u32(&data, 20), be_u64(&data, 24))
        };
        if let Some(timescale) = timescale {
            track.timescale = timescale;
        }
        if let Some(duration) = duration {
            track.duration = duration;
        }
        Ok(())
    }

    fn parse_hdlr(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;
        if let Some(kind) = data.get(8..12) {
            track.handler_type = HandlerType::from_bytes([kind[0], kind[1], kind[2], kind[3]]);
        }
        Ok(())
    }

    fn parse_minf(&mut self, minf: &Atom, track: &mut TrackInfo) -> Result<()> {
        for child in self.read_children(minf)? {
            if child.atom_type == AtomType::STBL {
                self.parse_stbl(&child, track)?;
            }
        }
        Ok(())
    }

    fn parse_stbl(&mut self, stbl: &Atom, track: &mut TrackInfo) -> Result<()> {
        let mut builder = SampleTableBuilder::new();

        for child in self.read_children(stbl)? {
            let data = self.read_atom_data(&child)?;
            match child.atom_type {
                AtomType::STTS => builder.set_stts(parse_pairs(&data)),
                AtomType::CTTS => {
                    // v0 stores offsets unsigned, v1 signed; both reinterpret as i32.
                    let entries = parse_pairs(&data)
                        .into_iter()
                        .map(|(count, offset)| (count, offset as i32))
                        .collect();
                    builder.set_ctts(entries);
                }
                AtomType::STSS => {
                    let n = table_len(&data, 4);
                    let samples = (0..n).filter_map(|i| be_u32(&data, 8 + i * 4)).collect();
                    builder.set_sync_samples(samples);
                }
                AtomType::STSC => {
                    let n = table_len(&data, 12);
                    let entries = (0..n)
                        .filter_map(|i| {
                            let at = 8 + i * 12;
                            Some((be_u32(&data, at)?, be_u32(&data, at + 4)?))
                        })
                        .collect();
                    builder.set_stsc(entries);
                }
                AtomType::STSZ => {
                    let uniform = be_u32(&data, 4).unwrap_or(0);
                    let count = be_u32(&data, 8).unwrap_or(0) as usize;
                    let sizes = if uniform == 0 {
                        let n = count.min(data.len().saturating_sub(12) / 4);
                        (0..n).filter_map(|i| be_u32(&data, 12 + i * 4)).collect()
                    } else {
                        Vec::new()
                    };
                    builder.set_stsz(uniform, count as u32, sizes);
                }
                AtomType::STCO => {
                    let n = table_len(&data, 4);
                    let offsets = (0..n)
                        .filter_map(|i| be_u32(&data, 8 + i * 4).map(u64::from))
                        .collect();
                    builder.set_chunk_offsets(offsets);
                }
                AtomType::CO64 => {
                    let n = table_len(&data, 8);
                    let offsets = (0..n).filter_map(|i| be_u64(&data, 8 + i * 8)).collect();
                    builder.set_chunk_offsets(offsets);
                }
                AtomType::STSD => parse_stsd(&data, track),
                _ => {}
            }
        }

        track.sample_table = builder.build();
        Ok(())
    }
}

/// `(u32, u32)` entries used by stts and ctts.
fn parse_pairs(data: &[u8]) -> Vec<(u32, u32)> {
    let n = table_len(data, 8);
    (0..n)
        .filter_map(|i| {
            let at = 8 + i * 8;
            Some((be_u32(data, at)?, be_u32(data, at + 4)?))
        })
        .collect()
}

/// First sample entry of stsd: format code, audio layout and codec config.
fn parse_stsd(data: &[u8], track: &mut TrackInfo) {
    let entry = STSD_ENTRY_OFFSET;
    if let Some(format) = data.get(entry + 4..entry + 8) {
        track.sample_format = Some([format[0], format[1], format[2], format[3]]);
    }

    if track.handler_type.is_audio() {
        // AudioSampleEntry: channelCount @32, sampleRate (16.16) @40
        if let (Some(channels), Some(rate)) = (be_u16(data, 32), be_u32(data, 40)) {
            track.channels = Some(channels);
            track.sample_rate = Some(rate >> 16);
        }
        if let Some(esds) = find_child_box(data, AUDIO_ENTRY_CHILDREN, &[b"esds"]) {
            if esds.len() > 4 {
                track.codec_data = Some(esds.to_vec());
            }
        }
    } else if track.handler_type.is_video() {
        if let Some(config) = find_child_box(data, VISUAL_ENTRY_CHILDREN, &[b"avcC", b"hvcC"]) {
            track.codec_data = Some(config.to_vec());
        }
    }
}
