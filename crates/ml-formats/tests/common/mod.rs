//! Synthetic module builders shared by the integration tests.
//!
//! Every native builder produces the smallest file its format allows
//! with one pattern, a C-4 on instrument 1 at row 0 of channel 0, and one
//! 16-frame sample when the format stores PCM.

#![allow(dead_code)]

use ml_formats::FormatTag;

/// Frames of every synthetic sample.
pub const SAMPLE_FRAMES: usize = 16;

/// A ramp used as sample data.
pub const PCM: [u8; SAMPLE_FRAMES] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120];

pub struct Fixture {
    pub tag: FormatTag,
    pub filename: &'static str,
    pub data: Vec<u8>,
    /// Channels the decoded song should have
    pub channels: usize,
    /// Whether instrument 1 carries sample data
    pub has_sample: bool,
}

/// One fixture per natively decoded format.
pub fn native_fixtures() -> Vec<Fixture> {
    let fixture = |tag, filename, data, channels, has_sample| Fixture { tag, filename, data, channels, has_sample };
    vec![
        fixture(FormatTag::ProTracker, "fixture.mod", protracker(), 4, true),
        fixture(FormatTag::SoundTracker, "fixture.stk", soundtracker(), 4, true),
        fixture(FormatTag::S3m, "fixture.s3m", scream_tracker3(), 4, true),
        fixture(FormatTag::Xm, "fixture.xm", fasttracker2(0x0104), 4, true),
        fixture(FormatTag::It, "fixture.it", impulse_tracker(), 1, true),
        fixture(FormatTag::Ptm, "fixture.ptm", polytracker(), 4, true),
        fixture(FormatTag::Stm, "fixture.stm", scream_tracker2(), 4, true),
        fixture(FormatTag::Mtm, "fixture.mtm", multitracker(), 4, true),
        fixture(FormatTag::Composer669, "fixture.669", composer669(), 8, true),
        fixture(FormatTag::Ult, "fixture.ult", ultratracker(), 4, true),
        fixture(FormatTag::Far, "fixture.far", farandole(), 16, true),
        fixture(FormatTag::Okt, "fixture.okt", oktalyzer(), 4, true),
        fixture(FormatTag::Dbm, "fixture.dbm", digibooster(), 4, true),
        fixture(FormatTag::Med, "fixture.med", octamed([13, 0x10, 0x00]), 4, true),
        fixture(FormatTag::Ahx, "fixture.ahx", ahx(), 4, false),
    ]
}

/// Buffers only an emulator can play.
pub fn emulated_fixtures() -> Vec<(FormatTag, &'static str, Vec<u8>)> {
    vec![
        (FormatTag::FutureComposer, "fixture.fc", future_composer()),
        (FormatTag::Hively, "fixture.hvl", hively()),
        (FormatTag::JankoMrsicFlogel, "fixture.jmf", janko_mrsic_flogel()),
    ]
}

/// Write `bytes` at `offset`, growing the buffer as needed.
pub fn put(data: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if data.len() < offset + bytes.len() {
        data.resize(offset + bytes.len(), 0);
    }
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Byte deltas that decode to [`PCM`].
fn pcm_deltas() -> Vec<u8> {
    let mut last = 0u8;
    PCM.iter()
        .map(|&b| {
            let delta = b.wrapping_sub(last);
            last = b;
            delta
        })
        .collect()
}

/// 4-channel "M.K." module; sample 1 is 8 words long.
pub fn protracker() -> Vec<u8> {
    let mut d = vec![0u8; 1084 + 1024];
    put(&mut d, 0, b"synthetic mod");
    put(&mut d, 20, b"ramp");
    put(&mut d, 42, &8u16.to_be_bytes());
    d[45] = 64;
    put(&mut d, 48, &1u16.to_be_bytes());
    d[950] = 1;
    d[951] = 0x7F;
    put(&mut d, 1080, b"M.K.");
    // period 428, sample 1
    put(&mut d, 1084, &[0x01, 0xAC, 0x10, 0x00]);
    d.extend_from_slice(&PCM);
    d
}

/// 15-sample module; the first four rows all play C-4 so the content
/// sniffer has enough notes to go on.
pub fn soundtracker() -> Vec<u8> {
    let mut d = vec![0u8; 600 + 1024];
    put(&mut d, 0, b"synthetic stk");
    put(&mut d, 20, b"ramp");
    put(&mut d, 42, &8u16.to_be_bytes());
    d[45] = 64;
    d[470] = 1;
    d[471] = 0x78;
    for row in 0..4 {
        put(&mut d, 600 + row * 16, &[0x01, 0xAC, 0x10, 0x00]);
    }
    d.extend_from_slice(&PCM);
    d
}

/// S3M with four stereo channels and one unsigned sample.
pub fn scream_tracker3() -> Vec<u8> {
    let mut d = vec![0u8; 96];
    put(&mut d, 0, b"synthetic s3m");
    d[28] = 0x1A;
    d[29] = 16;
    put(&mut d, 32, &2u16.to_le_bytes());
    put(&mut d, 34, &1u16.to_le_bytes());
    put(&mut d, 36, &1u16.to_le_bytes());
    put(&mut d, 40, &0x1320u16.to_le_bytes());
    put(&mut d, 42, &2u16.to_le_bytes());
    put(&mut d, 44, b"SCRM");
    d[48] = 64;
    d[49] = 6;
    d[50] = 125;
    d[51] = 0xB0;
    put(&mut d, 64, &[0, 8, 9, 1]);
    d[68..96].fill(0xFF);
    put(&mut d, 96, &[0, 255]);
    // instrument at paragraph 7, pattern at paragraph 13
    put(&mut d, 98, &7u16.to_le_bytes());
    put(&mut d, 100, &13u16.to_le_bytes());

    let inst = 112;
    put(&mut d, inst, &[1]);
    put(&mut d, inst + 14, &12u16.to_le_bytes());
    put(&mut d, inst + 16, &(SAMPLE_FRAMES as u32).to_le_bytes());
    put(&mut d, inst + 28, &[64]);
    put(&mut d, inst + 32, &8363u32.to_le_bytes());
    put(&mut d, inst + 48, b"ramp");
    put(&mut d, inst + 76, b"SCRS");
    put(&mut d, 192, &PCM);

    let mut body = vec![0x20, 0x40, 0x01, 0x00];
    body.extend_from_slice(&[0; 63]);
    put(&mut d, 208, &((body.len() + 2) as u16).to_le_bytes());
    put(&mut d, 210, &body);
    d
}

/// XM with the given version word, one packed pattern and one
/// delta-coded sample.
pub fn fasttracker2(version: u16) -> Vec<u8> {
    let mut d = vec![0u8; 336];
    put(&mut d, 0, b"Extended Module: ");
    put(&mut d, 17, b"synthetic xm");
    d[37] = 0x1A;
    put(&mut d, 38, b"modloom");
    put(&mut d, 58, &version.to_le_bytes());
    put(&mut d, 60, &276u32.to_le_bytes());
    put(&mut d, 64, &1u16.to_le_bytes());
    put(&mut d, 68, &4u16.to_le_bytes());
    put(&mut d, 70, &1u16.to_le_bytes());
    put(&mut d, 72, &1u16.to_le_bytes());
    put(&mut d, 74, &1u16.to_le_bytes());
    put(&mut d, 76, &6u16.to_le_bytes());
    put(&mut d, 78, &125u16.to_le_bytes());

    let mut body = vec![0x83, 49, 1];
    body.extend(std::iter::repeat(0x80).take(64 * 4 - 1));
    d.extend_from_slice(&9u32.to_le_bytes());
    d.push(0);
    d.extend_from_slice(&64u16.to_le_bytes());
    d.extend_from_slice(&(body.len() as u16).to_le_bytes());
    d.extend_from_slice(&body);

    let inst = d.len();
    put(&mut d, inst, &263u32.to_le_bytes());
    put(&mut d, inst + 4, b"ramp");
    put(&mut d, inst + 27, &1u16.to_le_bytes());
    put(&mut d, inst + 29, &40u32.to_le_bytes());
    d.resize(inst + 263, 0);

    let mut sample = [0u8; 40];
    sample[0..4].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[12] = 64;
    sample[15] = 128;
    d.extend_from_slice(&sample);
    d.extend_from_slice(&pcm_deltas());
    d
}

/// IT in sample mode with one signed sample and one pattern.
pub fn impulse_tracker() -> Vec<u8> {
    let mut d = vec![0u8; 192];
    put(&mut d, 0, b"IMPM");
    put(&mut d, 4, b"synthetic it");
    put(&mut d, 32, &2u16.to_le_bytes());
    put(&mut d, 36, &1u16.to_le_bytes());
    put(&mut d, 38, &1u16.to_le_bytes());
    put(&mut d, 40, &0x0214u16.to_le_bytes());
    put(&mut d, 42, &0x0200u16.to_le_bytes());
    put(&mut d, 44, &0x0009u16.to_le_bytes());
    d[48] = 128;
    d[49] = 48;
    d[50] = 6;
    d[51] = 125;
    d[52] = 128;
    d[64..128].fill(32);
    d[128..192].fill(64);
    d.extend_from_slice(&[0, 255]);
    d.extend_from_slice(&202u32.to_le_bytes());
    d.extend_from_slice(&298u32.to_le_bytes());

    let mut sample = [0u8; 80];
    sample[0..4].copy_from_slice(b"IMPS");
    sample[17] = 64;
    sample[18] = 0x01;
    sample[19] = 64;
    sample[20..24].copy_from_slice(b"ramp");
    sample[46] = 0x01;
    sample[47] = 32;
    sample[48..52].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[60..64].copy_from_slice(&8363u32.to_le_bytes());
    sample[72..76].copy_from_slice(&282u32.to_le_bytes());
    d.extend_from_slice(&sample);
    d.extend_from_slice(&PCM);

    // channel 1, mask: note + instrument; C-5 is IT's middle C
    let mut body = vec![0x81, 0x03, 60, 1, 0];
    body.extend_from_slice(&[0; 63]);
    d.extend_from_slice(&(body.len() as u16).to_le_bytes());
    d.extend_from_slice(&64u16.to_le_bytes());
    d.extend_from_slice(&[0; 4]);
    d.extend_from_slice(&body);
    d
}

/// PTM with four channels and one delta-coded sample.
pub fn polytracker() -> Vec<u8> {
    let mut d = vec![0u8; 608];
    put(&mut d, 0, b"synthetic ptm");
    d[28] = 0x1A;
    put(&mut d, 29, &0x0203u16.to_le_bytes());
    put(&mut d, 32, &1u16.to_le_bytes());
    put(&mut d, 34, &1u16.to_le_bytes());
    put(&mut d, 36, &1u16.to_le_bytes());
    put(&mut d, 38, &4u16.to_le_bytes());
    put(&mut d, 44, b"PTMF");
    put(&mut d, 64, &[3, 12, 12, 3]);
    d[97..352].fill(0xFF);
    put(&mut d, 352, &43u16.to_le_bytes());

    let sample = 608;
    let pcm_at = 755u32;
    put(&mut d, sample, &[1]);
    put(&mut d, sample + 13, &[64]);
    put(&mut d, sample + 14, &8363u16.to_le_bytes());
    put(&mut d, sample + 18, &pcm_at.to_le_bytes());
    put(&mut d, sample + 22, &(SAMPLE_FRAMES as u32).to_le_bytes());
    put(&mut d, sample + 48, b"ramp");
    put(&mut d, sample + 76, b"PTMS");

    let mut body = vec![0x20, 49, 1, 0];
    body.extend_from_slice(&[0; 63]);
    put(&mut d, 688, &body);
    put(&mut d, pcm_at as usize, &pcm_deltas());
    d
}

/// STM 2.21 with one pattern.
pub fn scream_tracker2() -> Vec<u8> {
    let mut d = vec![0u8; 1168];
    put(&mut d, 0, b"synthetic stm");
    put(&mut d, 20, b"!Scream!");
    d[28] = 0x1A;
    d[29] = 2;
    d[30] = 2;
    d[31] = 21;
    d[32] = 0x60;
    d[33] = 1;
    d[34] = 64;

    let sample = 48;
    put(&mut d, sample, b"ramp.smp");
    put(&mut d, sample + 14, &137u16.to_le_bytes());
    put(&mut d, sample + 16, &(SAMPLE_FRAMES as u16).to_le_bytes());
    put(&mut d, sample + 20, &0xFFFFu16.to_le_bytes());
    d[sample + 22] = 64;
    put(&mut d, sample + 24, &8363u16.to_le_bytes());

    d[1040] = 0;
    d[1041..1168].fill(99);

    // empty cells carry note 0xFF and an out-of-range volume
    for _ in 0..256 {
        d.extend_from_slice(&[0xFF, 0x01, 0x80, 0x00]);
    }
    put(&mut d, 1168, &[0x20, 0x09, 0x80, 0x00]);
    put(&mut d, 137 * 16, &PCM);
    d
}

/// MTM with one track referenced by channel 0.
pub fn multitracker() -> Vec<u8> {
    let mut d = vec![0u8; 66];
    put(&mut d, 0, b"MTM\x10");
    put(&mut d, 4, b"synthetic mtm");
    put(&mut d, 24, &1u16.to_le_bytes());
    d[30] = 1;
    d[32] = 64;
    d[33] = 4;
    put(&mut d, 34, &[3, 12, 12, 3]);

    let mut sample = [0u8; 37];
    sample[..4].copy_from_slice(b"ramp");
    sample[22..26].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[35] = 64;
    d.extend_from_slice(&sample);
    d.extend_from_slice(&[0; 128]);

    let mut track = vec![0u8; 192];
    track[..3].copy_from_slice(&[24 << 2, 0x10, 0x00]);
    d.extend_from_slice(&track);

    let mut sequence = [0u8; 64];
    sequence[..2].copy_from_slice(&1u16.to_le_bytes());
    d.extend_from_slice(&sequence);
    d.extend(PCM.iter().map(|b| b ^ 0x80));
    d
}

/// 669 with the "if" tag; the pattern speed lands on row 0.
pub fn composer669() -> Vec<u8> {
    let mut d = vec![0u8; 497];
    put(&mut d, 0, b"if");
    put(&mut d, 2, b"synthetic 669");
    d[110] = 1;
    d[111] = 1;
    d[113] = 0;
    d[114..241].fill(0xFF);
    d[241..369].fill(4);
    d[369..497].fill(63);

    let mut sample = [0u8; 25];
    sample[..8].copy_from_slice(b"ramp.sam");
    sample[13..17].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[21..25].copy_from_slice(&0xFFFFFu32.to_le_bytes());
    d.extend_from_slice(&sample);

    let pattern = d.len();
    for _ in 0..64 * 8 {
        d.extend_from_slice(&[0xFF, 0x00, 0xFF]);
    }
    put(&mut d, pattern, &[24 << 2, 0x0F, 0xFF]);
    d.extend(PCM.iter().map(|b| b ^ 0x80));
    d
}

/// ULT version 1 (no panning table) with four run-length packed tracks.
pub fn ultratracker() -> Vec<u8> {
    let mut d = b"MAS_UTrack_V001".to_vec();
    let mut title = [0u8; 32];
    title[..13].copy_from_slice(b"synthetic ult");
    d.extend_from_slice(&title);
    d.push(0);
    d.push(1);

    let mut sample = [0u8; 64];
    sample[..4].copy_from_slice(b"ramp");
    sample[56..60].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[60] = 255;
    d.extend_from_slice(&sample);

    let mut orders = [0xFFu8; 256];
    orders[0] = 0;
    d.extend_from_slice(&orders);
    d.extend_from_slice(&[3, 0]);
    d.extend_from_slice(&[25, 1, 0, 0, 0, 0xFC, 63, 0, 0, 0, 0, 0]);
    for _ in 1..4 {
        d.extend_from_slice(&[0xFC, 64, 0, 0, 0, 0, 0]);
    }
    d.extend_from_slice(&PCM);
    d
}

/// FAR with one 64-row pattern and one 8-bit sample.
pub fn farandole() -> Vec<u8> {
    let mut d = vec![0u8; 98];
    put(&mut d, 0, b"FAR\xFE");
    put(&mut d, 4, b"synthetic far");
    put(&mut d, 44, b"\r\n\x1A");
    put(&mut d, 47, &869u16.to_le_bytes());
    d[50..66].fill(1);
    d[75] = 4;
    d[76..92].fill(8);

    let mut orders = [0xFFu8; 256];
    orders[0] = 0;
    d.extend_from_slice(&orders);
    d.extend_from_slice(&[1, 1, 0]);
    let mut sizes = [0u8; 512];
    sizes[..2].copy_from_slice(&(2 + 64 * 64u16).to_le_bytes());
    d.extend_from_slice(&sizes);

    let mut pattern = vec![0u8; 2 + 64 * 64];
    pattern[2] = 25;
    d.extend_from_slice(&pattern);

    let mut map = [0u8; 8];
    map[0] = 1;
    d.extend_from_slice(&map);
    let mut sample = [0u8; 48];
    sample[..4].copy_from_slice(b"ramp");
    sample[32..36].copy_from_slice(&(SAMPLE_FRAMES as u32).to_le_bytes());
    sample[37] = 15;
    d.extend_from_slice(&sample);
    d.extend_from_slice(&PCM);
    d
}

/// OKT with four unsplit voices.
pub fn oktalyzer() -> Vec<u8> {
    let mut d = b"OKTASONG".to_vec();
    d.extend(chunk(b"CMOD", &[0; 8]));
    let mut sample = [0u8; 32];
    sample[..4].copy_from_slice(b"ramp");
    sample[20..24].copy_from_slice(&(SAMPLE_FRAMES as u32).to_be_bytes());
    sample[29] = 64;
    d.extend(chunk(b"SAMP", &sample));
    d.extend(chunk(b"SPEE", &6u16.to_be_bytes()));
    d.extend(chunk(b"SLEN", &1u16.to_be_bytes()));
    d.extend(chunk(b"PLEN", &1u16.to_be_bytes()));
    d.extend(chunk(b"PATT", &[0; 128]));
    let mut body = 64u16.to_be_bytes().to_vec();
    body.extend_from_slice(&[13, 0, 0, 0]);
    body.resize(2 + 64 * 4 * 4, 0);
    d.extend(chunk(b"PBOD", &body));
    d.extend(chunk(b"SBOD", &PCM));
    d
}

/// DBM version 2 with one song, one instrument and an 8-bit sample.
pub fn digibooster() -> Vec<u8> {
    let mut d = b"DBM0\x02\x00\x00\x00".to_vec();
    d.extend(chunk(b"NAME", b"synthetic dbm"));
    d.extend(chunk(b"INFO", &[0, 1, 0, 1, 0, 1, 0, 1, 0, 4]));
    let mut song = vec![0u8; 44];
    song.extend_from_slice(&1u16.to_be_bytes());
    song.extend_from_slice(&0u16.to_be_bytes());
    d.extend(chunk(b"SONG", &song));

    let mut inst = [0u8; 50];
    inst[..4].copy_from_slice(b"ramp");
    inst[31] = 1;
    inst[33] = 64;
    inst[34..38].copy_from_slice(&8363u32.to_be_bytes());
    d.extend(chunk(b"INST", &inst));

    // channel 1: note C-4 (octave 4, semitone 0) and instrument 1
    let mut body = vec![1, 0x03, 0x40, 1, 0];
    body.extend_from_slice(&[0; 63]);
    let mut patt = 64u16.to_be_bytes().to_vec();
    patt.extend_from_slice(&(body.len() as u32).to_be_bytes());
    patt.extend_from_slice(&body);
    d.extend(chunk(b"PATT", &patt));

    let mut smpl = vec![0, 0, 0, 1];
    smpl.extend_from_slice(&(SAMPLE_FRAMES as u32).to_be_bytes());
    smpl.extend_from_slice(&PCM);
    d.extend(chunk(b"SMPL", &smpl));
    d
}

/// MMD0 with one 4-track block whose first event is `event`, and one
/// 8-bit sample.
pub fn octamed(event: [u8; 3]) -> Vec<u8> {
    const SONG_AT: usize = 52;
    const BLOCKS_AT: usize = SONG_AT + 788;
    const BLOCK_AT: usize = BLOCKS_AT + 4;
    const SAMPLES_AT: usize = BLOCK_AT + 2 + 64 * 4 * 3;
    const SAMPLE_AT: usize = SAMPLES_AT + 4;

    let mut d = vec![0u8; SAMPLE_AT + 6];
    put(&mut d, 0, b"MMD0");
    put(&mut d, 8, &(SONG_AT as u32).to_be_bytes());
    put(&mut d, 16, &(BLOCKS_AT as u32).to_be_bytes());
    put(&mut d, 24, &(SAMPLES_AT as u32).to_be_bytes());

    // first sample slot: full volume
    d[SONG_AT + 6] = 64;
    put(&mut d, SONG_AT + 504, &1u16.to_be_bytes());
    put(&mut d, SONG_AT + 506, &1u16.to_be_bytes());
    put(&mut d, SONG_AT + 764, &33u16.to_be_bytes());
    d[SONG_AT + 769] = 6;
    d[SONG_AT + 787] = 1;

    put(&mut d, BLOCKS_AT, &(BLOCK_AT as u32).to_be_bytes());
    d[BLOCK_AT] = 4;
    d[BLOCK_AT + 1] = 63;
    put(&mut d, BLOCK_AT + 2, &event);

    put(&mut d, SAMPLES_AT, &(SAMPLE_AT as u32).to_be_bytes());
    put(&mut d, SAMPLE_AT, &(SAMPLE_FRAMES as u32).to_be_bytes());
    d.extend_from_slice(&PCM);
    d
}

/// AHX revision 0: one position, one 64-step track and one instrument.
pub fn ahx() -> Vec<u8> {
    let mut d = b"THX\x00".to_vec();
    d.extend_from_slice(&[0, 0]);
    d.extend_from_slice(&1u16.to_be_bytes());
    d.extend_from_slice(&0u16.to_be_bytes());
    d.extend_from_slice(&[64, 0, 1, 0]);
    d.extend_from_slice(&[0; 8]);

    let mut track = vec![0u8; 64 * 3];
    track[..3].copy_from_slice(&[25 << 2, 0x10, 0x00]);
    d.extend_from_slice(&track);
    d.extend_from_slice(&[0; 22]);

    let names_at = d.len() as u16;
    put(&mut d, 4, &names_at.to_be_bytes());
    d.extend_from_slice(b"synthetic ahx\0lead\0");
    d
}

pub fn future_composer() -> Vec<u8> {
    let mut d = b"FC14".to_vec();
    d.resize(180, 0);
    d
}

pub fn hively() -> Vec<u8> {
    let mut d = b"HVL\x01".to_vec();
    d.resize(64, 0);
    d
}

/// Executable hunk file with the player tag and three entry points.
pub fn janko_mrsic_flogel() -> Vec<u8> {
    let mut d = vec![0u8; 256];
    put(&mut d, 0, &0x0000_03F3u32.to_be_bytes());
    d[20] = 1;
    put(&mut d, 36, &0x4A2E_464Cu32.to_be_bytes());
    for offset in [48, 52, 56] {
        put(&mut d, offset, &0x100u32.to_be_bytes());
    }
    d
}
