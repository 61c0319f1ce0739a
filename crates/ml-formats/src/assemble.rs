//! Song assembly.
//!
//! Decoders fill a [`SongAssembler`] with whatever the file provided and
//! call [`SongAssembler::finish`], which enforces the canonical
//! invariants: hard caps, order list resolution, channel and row shape,
//! instrument ids and references, default speed and tempo.

use ml_ir::{
    ChannelSettings, Instrument, Pattern, Provenance, Song, MAX_CHANNELS, MAX_INSTRUMENTS,
    MAX_ORDERS, MAX_PATTERNS, MAX_ROWS,
};
use tracing::{debug, warn};

/// Default ticks per row.
pub const DEFAULT_SPEED: u8 = 6;
/// Default tempo in BPM.
pub const DEFAULT_TEMPO: u8 = 125;
/// Row count of patterns the assembler creates.
pub const DEFAULT_ROWS: u16 = 64;

/// Collects decoded parts of a song.
pub struct SongAssembler {
    pub format: &'static str,
    pub filename: String,
    pub title: String,
    /// 0 means "use the default"
    pub speed: u8,
    /// Values below 32 mean "use the default"
    pub tempo: u8,
    pub global_volume: u8,
    pub linear_slides: Option<bool>,
    pub channels: Vec<ChannelSettings>,
    pub patterns: Vec<Pattern>,
    pub instruments: Vec<Instrument>,
    /// Pattern indices; may reference patterns that were never parsed
    pub order: Vec<usize>,
    pub restart: usize,
    /// Counts as declared by the file, for provenance
    pub declared_patterns: usize,
    pub declared_instruments: usize,
}

impl SongAssembler {
    pub fn new(format: &'static str, filename: &str) -> Self {
        Self {
            format,
            filename: filename.to_string(),
            title: String::new(),
            speed: DEFAULT_SPEED,
            tempo: DEFAULT_TEMPO,
            global_volume: 64,
            linear_slides: None,
            channels: Vec::new(),
            patterns: Vec::new(),
            instruments: Vec::new(),
            order: Vec::new(),
            restart: 0,
            declared_patterns: 0,
            declared_instruments: 0,
        }
    }

    /// Use `count` channels with the classic Amiga L R R L panning.
    pub fn amiga_channels(&mut self, count: usize) {
        self.channels = (0..count).map(ChannelSettings::amiga).collect();
    }

    /// Produce the final song.
    pub fn finish(self) -> Song {
        let SongAssembler {
            format,
            filename,
            title,
            speed,
            tempo,
            global_volume,
            linear_slides,
            mut channels,
            mut patterns,
            mut instruments,
            mut order,
            restart,
            declared_patterns,
            declared_instruments,
        } = self;

        let declared_channels = channels.len();
        if channels.len() > MAX_CHANNELS {
            warn!(format, channels = channels.len(), "channel count clamped");
            channels.truncate(MAX_CHANNELS);
        }
        if channels.is_empty() {
            let widest = patterns.iter().map(Pattern::num_channels).max().unwrap_or(0);
            channels = vec![ChannelSettings::default(); widest.clamp(1, MAX_CHANNELS)];
        }

        if instruments.len() > MAX_INSTRUMENTS {
            warn!(format, instruments = instruments.len(), "instrument count clamped");
            instruments.truncate(MAX_INSTRUMENTS);
        }
        for (index, inst) in instruments.iter_mut().enumerate() {
            inst.id = (index + 1) as u8;
        }

        if patterns.len() > MAX_PATTERNS {
            warn!(format, patterns = patterns.len(), "pattern count clamped");
            patterns.truncate(MAX_PATTERNS);
        }

        if order.len() > MAX_ORDERS {
            warn!(format, orders = order.len(), "order list clamped");
            order.truncate(MAX_ORDERS);
        }
        let needed = order.iter().copied().filter(|&p| p < MAX_PATTERNS).max();
        if let Some(needed) = needed {
            if needed >= patterns.len() {
                warn!(format, parsed = patterns.len(), referenced = needed + 1, "padding missing patterns");
                patterns.resize_with(needed + 1, || Pattern::new(DEFAULT_ROWS, 0));
            }
        }
        if patterns.is_empty() {
            patterns.push(Pattern::new(DEFAULT_ROWS, 0));
        }
        let last = patterns.len() - 1;
        let mut order: Vec<u16> = order.into_iter().map(|p| p.min(last) as u16).collect();
        if order.is_empty() {
            order.push(0);
        }

        let provenance = Provenance {
            format,
            filename,
            original_channels: declared_channels,
            original_patterns: declared_patterns,
            original_instruments: declared_instruments,
        };
        let mut dangling = 0usize;
        for (index, pattern) in patterns.iter_mut().enumerate() {
            let rows = pattern.rows.clamp(1, MAX_ROWS);
            pattern.resize(if pattern.rows == 0 { DEFAULT_ROWS } else { rows }, channels.len() as u8);
            for (channel, settings) in pattern.channels.iter_mut().zip(&channels) {
                channel.apply_settings(settings);
                for cell in &mut channel.cells {
                    if cell.instrument as usize > instruments.len() {
                        cell.instrument = 0;
                        dangling += 1;
                    }
                }
            }
            pattern.id = index as u16;
            pattern.provenance = Some(provenance.clone());
        }
        if dangling > 0 {
            warn!(format, cells = dangling, "cleared references to missing instruments");
        }

        let restart = if restart < order.len() { restart as u16 } else { 0 };

        let mut song = Song::new(&title);
        song.format = format;
        song.initial_speed = if speed == 0 { DEFAULT_SPEED } else { speed };
        song.initial_tempo = if tempo < 32 { DEFAULT_TEMPO } else { tempo };
        song.global_volume = global_volume.min(64);
        song.linear_slides = linear_slides;
        song.channels = channels;
        song.patterns = patterns;
        song.instruments = instruments;
        song.order = order;
        song.restart_position = restart;

        debug!(
            format,
            channels = song.channel_count(),
            patterns = song.patterns.len(),
            instruments = song.instruments.len(),
            orders = song.song_length(),
            "song assembled"
        );
        debug_assert_eq!(song.validate(), Ok(()));
        song
    }
}
