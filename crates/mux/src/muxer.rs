//! Lifecycle-checked MP4 muxer.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::{debug, info};

use sr_common::PtsMicros;

use crate::error::{MuxError, MuxResult};
use crate::mp4::{self, SampleInfo, TrackHandler, TrackInfo};

/// Track timescale for video samples, in ticks per second.
const VIDEO_TIMESCALE: u32 = 90_000;

/// Fallback duration for a track's final video sample when no previous
/// delta exists, in video timescale ticks (1/30 s).
const DEFAULT_VIDEO_SAMPLE_TICKS: u32 = VIDEO_TIMESCALE / 30;

/// AAC frames carry 1024 PCM samples, so a lone audio sample gets that
/// duration in its sample-rate timescale.
const DEFAULT_AUDIO_SAMPLE_TICKS: u32 = 1024;

/// Codec parameters registered for a track before the muxer starts.
#[derive(Debug, Clone)]
pub enum TrackFormat {
    Video {
        width: u32,
        height: u32,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        asc: Vec<u8>,
    },
}

impl TrackFormat {
    fn timescale(&self) -> u32 {
        match self {
            TrackFormat::Video { .. } => VIDEO_TIMESCALE,
            TrackFormat::Audio { sample_rate, .. } => *sample_rate,
        }
    }

    fn is_video(&self) -> bool {
        matches!(self, TrackFormat::Video { .. })
    }
}

#[derive(Debug)]
struct PendingSample {
    offset: u64,
    size: u32,
    pts: PtsMicros,
    is_sync: bool,
}

#[derive(Debug)]
struct Track {
    format: TrackFormat,
    samples: Vec<PendingSample>,
}

/// Streaming MP4 writer with an explicit add-tracks / start / write /
/// stop lifecycle. Payload goes straight into one mdat box; the moov
/// is assembled on [`Muxer::stop`] from the accumulated sample tables.
#[derive(Debug)]
pub struct Muxer {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File offset of the mdat box header (16-byte large form).
    mdat_pos: u64,
    tracks: Vec<Track>,
    started: bool,
}

impl Muxer {
    /// Create the output file and write the leading ftyp and mdat
    /// header. The file is not a valid MP4 until [`Muxer::stop`].
    pub fn new<P: AsRef<Path>>(path: P) -> MuxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);

        mp4::write_ftyp(&mut writer)?;

        // Large mdat header: size32=1 marker, type, 64-bit size patched
        // at stop time.
        let mdat_pos = writer.stream_position()?;
        writer.write_u32::<BigEndian>(1)?;
        writer.write_all(b"mdat")?;
        writer.write_u64::<BigEndian>(0)?;

        debug!(path = %path.display(), "muxer opened");
        Ok(Self {
            writer,
            path,
            mdat_pos,
            tracks: Vec::new(),
            started: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a track. Must happen before [`Muxer::start`].
    pub fn add_track(&mut self, format: TrackFormat) -> MuxResult<u32> {
        if self.started {
            return Err(MuxError::InvalidState(
                "cannot add a track after start".into(),
            ));
        }
        let track_id = self.tracks.len() as u32;
        debug!(track_id, video = format.is_video(), "track added");
        self.tracks.push(Track {
            format,
            samples: Vec::new(),
        });
        Ok(track_id)
    }

    /// Transition to the writing state. Requires at least one track.
    pub fn start(&mut self) -> MuxResult<()> {
        if self.started {
            return Err(MuxError::InvalidState("muxer already started".into()));
        }
        if self.tracks.is_empty() {
            return Err(MuxError::InvalidState("cannot start with no tracks".into()));
        }
        self.started = true;
        info!(tracks = self.tracks.len(), "muxer started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Append one encoded sample to the given track.
    pub fn write_sample(
        &mut self,
        track_id: u32,
        data: &[u8],
        pts: PtsMicros,
        key_frame: bool,
    ) -> MuxResult<()> {
        if !self.started {
            return Err(MuxError::InvalidState(
                "write_sample before start".into(),
            ));
        }
        let track = self
            .tracks
            .get_mut(track_id as usize)
            .ok_or_else(|| MuxError::Track(format!("unknown track {track_id}")))?;

        let offset = self.writer.stream_position()?;
        self.writer.write_all(data)?;

        // Audio samples are all sync points.
        let is_sync = key_frame || !track.format.is_video();
        track.samples.push(PendingSample {
            offset,
            size: data.len() as u32,
            pts,
            is_sync,
        });
        Ok(())
    }

    /// Number of samples written to a track so far.
    pub fn sample_count(&self, track_id: u32) -> usize {
        self.tracks
            .get(track_id as usize)
            .map(|t| t.samples.len())
            .unwrap_or(0)
    }

    /// Finalize the file: patch the mdat size, emit the moov and flush.
    ///
    /// Fails with [`MuxError::EmptyTrack`] if any registered track got
    /// no samples, since the resulting file would be unplayable.
    pub fn stop(mut self) -> MuxResult<PathBuf> {
        if !self.started {
            return Err(MuxError::InvalidState("stop before start".into()));
        }
        for (i, track) in self.tracks.iter().enumerate() {
            if track.samples.is_empty() {
                return Err(MuxError::EmptyTrack { track_id: i as u32 });
            }
        }

        // Patch the large mdat size now that payload length is known.
        let mdat_end = self.writer.stream_position()?;
        let mdat_size = mdat_end - self.mdat_pos;
        self.writer.seek(SeekFrom::Start(self.mdat_pos + 8))?;
        self.writer.write_u64::<BigEndian>(mdat_size)?;
        self.writer.seek(SeekFrom::Start(mdat_end))?;

        let track_infos: Vec<TrackInfo> = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, track)| finalize_track(i as u32, track))
            .collect();

        mp4::write_moov(&mut self.writer, &track_infos)?;
        self.writer.flush()?;

        info!(
            path = %self.path.display(),
            tracks = track_infos.len(),
            bytes = mdat_end,
            "muxer stopped"
        );
        Ok(self.path)
    }
}

/// Convert a track's pending samples into a finalized sample table.
///
/// Timestamps are rebased to the track's first sample, so wall-clock
/// stamps become zero-based media time. Each sample's duration is the
/// delta to its successor; the last sample reuses the previous delta,
/// or a codec-default duration for a single-sample track.
fn finalize_track(track_id: u32, track: &Track) -> TrackInfo {
    let timescale = track.format.timescale();

    let ticks = |delta_us: i64| -> u32 {
        let delta = delta_us.max(0) as u64;
        (delta * timescale as u64 / 1_000_000) as u32
    };

    let default_ticks = match track.format {
        TrackFormat::Video { .. } => DEFAULT_VIDEO_SAMPLE_TICKS,
        TrackFormat::Audio { .. } => DEFAULT_AUDIO_SAMPLE_TICKS,
    };

    let mut samples = Vec::with_capacity(track.samples.len());
    let mut prev_duration = default_ticks;
    for (i, sample) in track.samples.iter().enumerate() {
        let duration = match track.samples.get(i + 1) {
            Some(next) => {
                let d = ticks(next.pts.0 - sample.pts.0);
                prev_duration = d;
                d
            }
            None => prev_duration,
        };
        samples.push(SampleInfo {
            offset: sample.offset,
            size: sample.size,
            duration,
            is_sync: sample.is_sync,
        });
    }

    let duration: u64 = samples.iter().map(|s| s.duration as u64).sum();

    let handler = match &track.format {
        TrackFormat::Video {
            width,
            height,
            sps,
            pps,
        } => TrackHandler::Video {
            width: *width,
            height: *height,
            sps: sps.clone(),
            pps: pps.clone(),
        },
        TrackFormat::Audio {
            sample_rate,
            channels,
            asc,
        } => TrackHandler::Audio {
            sample_rate: *sample_rate,
            channels: *channels,
            asc: asc.clone(),
        },
    };

    TrackInfo {
        track_id: track_id + 1, // trak IDs are 1-based
        timescale,
        duration,
        handler,
        samples,
    }
}
