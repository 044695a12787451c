//! moov assembly.
//!
//! All boxes here are written at stop time from the sample tables the
//! muxer accumulated while streaming mdat payload.

use std::io::{Seek, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::atoms::{
    box_size_placeholder, fill_box_size, write_full_box_header, write_unity_matrix, write_zeros,
};
use crate::error::MuxResult;

/// Movie-level timescale (mvhd). Track durations are rescaled into it.
pub const MOVIE_TIMESCALE: u32 = 1_000;

/// One finalized sample in a track's table.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    /// Absolute file offset of the payload.
    pub offset: u64,
    pub size: u32,
    /// Duration in track timescale ticks.
    pub duration: u32,
    pub is_sync: bool,
}

/// Codec-specific track description.
#[derive(Debug, Clone)]
pub enum TrackHandler {
    Video {
        width: u32,
        height: u32,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        /// AudioSpecificConfig carried in the esds decoder config.
        asc: Vec<u8>,
    },
}

/// Everything needed to emit one trak box.
#[derive(Debug)]
pub struct TrackInfo {
    pub track_id: u32,
    pub timescale: u32,
    /// Total duration in track timescale ticks.
    pub duration: u64,
    pub handler: TrackHandler,
    pub samples: Vec<SampleInfo>,
}

impl TrackInfo {
    fn duration_in_movie_timescale(&self) -> u64 {
        if self.timescale == 0 {
            return 0;
        }
        self.duration * MOVIE_TIMESCALE as u64 / self.timescale as u64
    }
}

/// Write the ftyp box (isom brand, 28 bytes).
pub fn write_ftyp<W: Write>(writer: &mut W) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(28)?;
    writer.write_all(b"ftyp")?;
    writer.write_all(b"isom")?; // major brand
    writer.write_u32::<BigEndian>(0x200)?; // minor version
    writer.write_all(b"isom")?;
    writer.write_all(b"iso2")?;
    writer.write_all(b"mp41")?;
    Ok(())
}

/// Write the complete moov box for the given tracks.
pub fn write_moov<W: Write + Seek>(writer: &mut W, tracks: &[TrackInfo]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"moov")?;

    let movie_duration = tracks
        .iter()
        .map(|t| t.duration_in_movie_timescale())
        .max()
        .unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;

    write_mvhd(writer, movie_duration, next_track_id)?;
    for track in tracks {
        write_trak(writer, track)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: u64, next_track_id: u32) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mvhd")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
    writer.write_u32::<BigEndian>(duration as u32)?;
    writer.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
    writer.write_u16::<BigEndian>(0x0100)?; // volume 1.0
    write_zeros(writer, 10)?; // reserved
    write_unity_matrix(writer)?;
    write_zeros(writer, 24)?; // pre_defined
    writer.write_u32::<BigEndian>(next_track_id)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"trak")?;
    write_tkhd(writer, track)?;
    write_mdia(writer, track)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_tkhd<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"tkhd")?;
    writer.write_u32::<BigEndian>(0x0000_0007)?; // flags: enabled | in movie | in preview
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(track.track_id)?;
    writer.write_u32::<BigEndian>(0)?; // reserved
    writer.write_u32::<BigEndian>(track.duration_in_movie_timescale() as u32)?;
    write_zeros(writer, 8)?; // reserved
    writer.write_u16::<BigEndian>(0)?; // layer
    writer.write_u16::<BigEndian>(0)?; // alternate_group
    let volume: u16 = match track.handler {
        TrackHandler::Audio { .. } => 0x0100,
        TrackHandler::Video { .. } => 0,
    };
    writer.write_u16::<BigEndian>(volume)?;
    writer.write_u16::<BigEndian>(0)?; // reserved
    write_unity_matrix(writer)?;
    match &track.handler {
        TrackHandler::Video { width, height, .. } => {
            writer.write_u32::<BigEndian>(width << 16)?; // 16.16 fixed
            writer.write_u32::<BigEndian>(height << 16)?;
        }
        TrackHandler::Audio { .. } => {
            writer.write_u32::<BigEndian>(0)?;
            writer.write_u32::<BigEndian>(0)?;
        }
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_mdia<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mdia")?;

    write_mdhd(writer, track.timescale, track.duration)?;
    let handler_type: &[u8; 4] = match track.handler {
        TrackHandler::Video { .. } => b"vide",
        TrackHandler::Audio { .. } => b"soun",
    };
    write_hdlr(writer, handler_type)?;
    write_minf(writer, track)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_mdhd<W: Write + Seek>(writer: &mut W, timescale: u32, duration: u64) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mdhd")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(0)?; // creation_time
    writer.write_u32::<BigEndian>(0)?; // modification_time
    writer.write_u32::<BigEndian>(timescale)?;
    writer.write_u32::<BigEndian>(duration as u32)?;
    writer.write_u16::<BigEndian>(0x55c4)?; // language: und
    writer.write_u16::<BigEndian>(0)?; // pre_defined
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_hdlr<W: Write + Seek>(writer: &mut W, handler_type: &[u8; 4]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"hdlr")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(0)?; // pre_defined
    writer.write_all(handler_type)?;
    write_zeros(writer, 12)?; // reserved
    let name: &[u8] = match handler_type {
        b"vide" => b"VideoHandler\0",
        b"soun" => b"SoundHandler\0",
        _ => b"Handler\0",
    };
    writer.write_all(name)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"minf")?;

    match track.handler {
        TrackHandler::Video { .. } => {
            // vmhd
            write_full_box_header(writer, b"vmhd", 20, 0, 0x000001)?;
            writer.write_u16::<BigEndian>(0)?; // graphicsmode
            write_zeros(writer, 6)?; // opcolor
        }
        TrackHandler::Audio { .. } => {
            // smhd
            write_full_box_header(writer, b"smhd", 16, 0, 0)?;
            writer.write_i16::<BigEndian>(0)?; // balance
            write_zeros(writer, 2)?;
        }
    }

    write_dinf(writer)?;
    write_stbl(writer, track)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_dinf<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"dinf")?;

    let dref_size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"dref")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(1)?; // entry_count
    write_full_box_header(writer, b"url ", 12, 0, 0x000001)?; // self-contained

    fill_box_size(writer, dref_size_pos)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample description
// ---------------------------------------------------------------------------

fn write_stsd<W: Write + Seek>(writer: &mut W, handler: &TrackHandler) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsd")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(1)?; // entry_count

    match handler {
        TrackHandler::Video {
            width,
            height,
            sps,
            pps,
        } => write_avc1(writer, *width, *height, sps, pps)?,
        TrackHandler::Audio {
            sample_rate,
            channels,
            asc,
        } => write_mp4a(writer, *sample_rate, *channels, asc)?,
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_avc1<W: Write + Seek>(
    writer: &mut W,
    width: u32,
    height: u32,
    sps: &[u8],
    pps: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"avc1")?;
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 16)?; // pre_defined + reserved
    writer.write_u16::<BigEndian>(width as u16)?;
    writer.write_u16::<BigEndian>(height as u16)?;
    writer.write_u32::<BigEndian>(0x0048_0000)?; // horizresolution 72dpi
    writer.write_u32::<BigEndian>(0x0048_0000)?; // vertresolution
    writer.write_u32::<BigEndian>(0)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // frame_count
    write_zeros(writer, 32)?; // compressorname
    writer.write_u16::<BigEndian>(0x0018)?; // depth 24
    writer.write_i16::<BigEndian>(-1)?; // pre_defined

    write_avcc(writer, sps, pps)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// AVCDecoderConfigurationRecord built from one SPS and one PPS.
fn write_avcc<W: Write + Seek>(writer: &mut W, sps: &[u8], pps: &[u8]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"avcC")?;
    writer.write_u8(1)?; // configurationVersion
    // Profile, compatibility and level come straight from the SPS.
    let (profile, compat, level) = if sps.len() >= 4 {
        (sps[1], sps[2], sps[3])
    } else {
        (66, 0, 30) // Baseline 3.0 fallback
    };
    writer.write_u8(profile)?;
    writer.write_u8(compat)?;
    writer.write_u8(level)?;
    writer.write_u8(0xff)?; // lengthSizeMinusOne = 3 (4-byte lengths)
    writer.write_u8(0xe1)?; // numOfSequenceParameterSets = 1
    writer.write_u16::<BigEndian>(sps.len() as u16)?;
    writer.write_all(sps)?;
    writer.write_u8(1)?; // numOfPictureParameterSets
    writer.write_u16::<BigEndian>(pps.len() as u16)?;
    writer.write_all(pps)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_mp4a<W: Write + Seek>(
    writer: &mut W,
    sample_rate: u32,
    channels: u16,
    asc: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mp4a")?;
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 8)?; // reserved
    writer.write_u16::<BigEndian>(channels)?;
    writer.write_u16::<BigEndian>(16)?; // samplesize
    writer.write_u32::<BigEndian>(0)?; // pre_defined + reserved
    writer.write_u32::<BigEndian>(sample_rate << 16)?; // 16.16 fixed

    write_esds(writer, sample_rate, channels, asc)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write an MPEG-4 descriptor length in the expandable encoding.
fn write_descr_length<W: Write>(writer: &mut W, mut length: u32) -> MuxResult<()> {
    let mut bytes = [0u8; 4];
    let mut count = 1;
    bytes[3] = (length & 0x7f) as u8;
    length >>= 7;
    while length > 0 {
        count += 1;
        bytes[4 - count] = 0x80 | (length & 0x7f) as u8;
        length >>= 7;
    }
    writer.write_all(&bytes[4 - count..])?;
    Ok(())
}

fn write_esds<W: Write + Seek>(
    writer: &mut W,
    _sample_rate: u32,
    _channels: u16,
    asc: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"esds")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags

    let asc_len = asc.len() as u32;
    // DecoderConfigDescriptor payload: 13 fixed bytes + DecoderSpecificInfo
    let dcd_len = 13 + 2 + asc_len;
    // ES_Descriptor payload: 3 fixed + DCD + SLConfig
    let esd_len = 3 + 2 + dcd_len + 2 + 1;

    writer.write_u8(0x03)?; // ES_DescrTag
    write_descr_length(writer, esd_len)?;
    writer.write_u16::<BigEndian>(0)?; // ES_ID
    writer.write_u8(0)?; // flags

    writer.write_u8(0x04)?; // DecoderConfigDescrTag
    write_descr_length(writer, dcd_len)?;
    writer.write_u8(0x40)?; // objectTypeIndication: MPEG-4 AAC
    writer.write_u8(0x15)?; // streamType audio, upStream 0, reserved 1
    writer.write_u24::<BigEndian>(0)?; // bufferSizeDB
    writer.write_u32::<BigEndian>(128_000)?; // maxBitrate
    writer.write_u32::<BigEndian>(128_000)?; // avgBitrate

    writer.write_u8(0x05)?; // DecSpecificInfoTag
    write_descr_length(writer, asc_len)?;
    writer.write_all(asc)?;

    writer.write_u8(0x06)?; // SLConfigDescrTag
    write_descr_length(writer, 1)?;
    writer.write_u8(0x02)?; // predefined: MP4

    fill_box_size(writer, size_pos)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sample tables
// ---------------------------------------------------------------------------

fn write_stbl<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stbl")?;

    write_stsd(writer, &track.handler)?;
    write_stts(writer, &track.samples)?;
    write_stsc(writer, &track.samples)?;
    write_stsz(writer, &track.samples)?;

    let needs_co64 = track.samples.iter().any(|s| s.offset > u32::MAX as u64);
    if needs_co64 {
        write_co64(writer, &track.samples)?;
    } else {
        write_stco(writer, &track.samples)?;
    }

    if matches!(track.handler, TrackHandler::Video { .. }) {
        write_stss(writer, &track.samples)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let entries = run_length_encode_durations(samples);

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stts")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (count, duration) in &entries {
        writer.write_u32::<BigEndian>(*count)?;
        writer.write_u32::<BigEndian>(*duration)?;
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn run_length_encode_durations(samples: &[SampleInfo]) -> Vec<(u32, u32)> {
    if samples.is_empty() {
        return vec![];
    }
    let mut entries = Vec::new();
    let mut current = samples[0].duration;
    let mut count = 1u32;
    for sample in &samples[1..] {
        if sample.duration == current {
            count += 1;
        } else {
            entries.push((count, current));
            current = sample.duration;
            count = 1;
        }
    }
    entries.push((count, current));
    entries
}

/// One sample per chunk, so stsc collapses to a single entry.
fn write_stsc<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsc")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    if samples.is_empty() {
        writer.write_u32::<BigEndian>(0)?;
    } else {
        writer.write_u32::<BigEndian>(1)?; // entry_count
        writer.write_u32::<BigEndian>(1)?; // first_chunk
        writer.write_u32::<BigEndian>(1)?; // samples_per_chunk
        writer.write_u32::<BigEndian>(1)?; // sample_description_index
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsz")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags

    let uniform = !samples.is_empty() && samples.iter().all(|s| s.size == samples[0].size);
    if uniform {
        writer.write_u32::<BigEndian>(samples[0].size)?;
        writer.write_u32::<BigEndian>(samples.len() as u32)?;
    } else {
        writer.write_u32::<BigEndian>(0)?; // variable sizes
        writer.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            writer.write_u32::<BigEndian>(sample.size)?;
        }
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_stco<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stco")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(samples.len() as u32)?;
    for sample in samples {
        writer.write_u32::<BigEndian>(sample.offset as u32)?;
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_co64<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"co64")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(samples.len() as u32)?;
    for sample in samples {
        writer.write_u64::<BigEndian>(sample.offset)?;
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}

fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let sync_samples: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| (i + 1) as u32) // 1-based
        .collect();

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stss")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(sync_samples.len() as u32)?;
    for n in &sync_samples {
        writer.write_u32::<BigEndian>(*n)?;
    }
    fill_box_size(writer, size_pos)?;
    Ok(())
}
