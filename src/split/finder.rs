//! Silence search over a decoded volume curve.
//!
//! The finder is a pure function: it receives one volume sample per frame of
//! the peeked window and the byte offset of the metadata change inside that
//! window, and returns the byte offsets at which the previous track should
//! end and the next one start.

use crate::config::SplitConfig;

/// Loudness of one frame in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSample {
    /// Byte offset of the frame from the start of the window.
    pub offset: usize,
    /// Frame length in bytes.
    pub len: usize,
    /// Frame duration in milliseconds.
    pub duration_ms: f64,
    /// RMS amplitude; `f64::INFINITY` for frames that couldn't be decoded.
    pub rms: f64,
}

impl VolumeSample {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Where to cut, as byte offsets from the start of the window.
///
/// `next_start <= previous_end` always holds; the bytes in between go into
/// both tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPoint {
    /// First byte not written to the previous track.
    pub previous_end: usize,
    /// First byte written to the next track.
    pub next_start: usize,
}

impl SplitPoint {
    /// A cut exactly at `offset` with no overlap.
    pub fn at(offset: usize) -> Self {
        Self {
            previous_end: offset,
            next_start: offset,
        }
    }
}

/// Finds the quietest run of at least `silence_length_ms` inside the search
/// region around `boundary`.
///
/// Returns `None` when no run fits inside the region or every candidate
/// contains an undecodable frame; the caller then cuts at the boundary.
pub fn find_split(
    samples: &[VolumeSample],
    boundary: usize,
    split: &SplitConfig,
) -> Option<SplitPoint> {
    if samples.is_empty() {
        return None;
    }

    let mut starts = Vec::with_capacity(samples.len() + 1);
    let mut t = 0.0;
    for sample in samples {
        starts.push(t);
        t += sample.duration_ms;
    }
    starts.push(t);
    let total_ms = t;

    let boundary_ms = time_at_byte(samples, &starts, boundary);
    let center = boundary_ms + f64::from(split.offset_ms);
    let region_start = (center - f64::from(split.search_window_1_ms)).max(0.0);
    let region_end = (center + f64::from(split.search_window_2_ms)).min(total_ms);
    let silence_ms = f64::from(split.silence_length_ms).max(f64::MIN_POSITIVE);

    let mut best: Option<(f64, usize, usize)> = None;
    for first in 0..samples.len() {
        if starts[first] < region_start {
            continue;
        }
        let mut weighted = 0.0;
        let mut duration = 0.0;
        for last in first..samples.len() {
            if starts[last + 1] > region_end {
                break;
            }
            weighted += samples[last].rms * samples[last].duration_ms;
            duration += samples[last].duration_ms;
            if duration >= silence_ms {
                let score = weighted / duration;
                if score.is_finite() && best.map_or(true, |(s, _, _)| score < s) {
                    best = Some((score, first, last));
                }
                break;
            }
        }
    }

    let (_, first, last) = best?;
    let mid = (starts[first] + starts[last + 1]) / 2.0;
    let end_frame = frame_at_time(&starts, mid + f64::from(split.padding_1_ms));
    let start_frame = frame_at_time(&starts, mid - f64::from(split.padding_2_ms));

    let previous_end = samples[end_frame].end();
    let next_start = samples[start_frame].offset.min(previous_end);
    Some(SplitPoint {
        previous_end,
        next_start,
    })
}

/// Playback time of byte `offset`, interpolated inside its frame.
fn time_at_byte(samples: &[VolumeSample], starts: &[f64], offset: usize) -> f64 {
    for (i, sample) in samples.iter().enumerate() {
        if offset < sample.end() {
            if offset <= sample.offset || sample.len == 0 {
                return starts[i];
            }
            let fraction = (offset - sample.offset) as f64 / sample.len as f64;
            return starts[i] + fraction * sample.duration_ms;
        }
    }
    starts[samples.len()]
}

/// Index of the frame playing at time `ms`, clamped to the window.
fn frame_at_time(starts: &[f64], ms: f64) -> usize {
    let frames = starts.len() - 1;
    match starts[1..].iter().position(|&end| ms < end) {
        Some(i) => i,
        None => frames - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_LEN: usize = 418;
    const FRAME_MS: f64 = 26.122;

    /// One sample per frame; frames in `quiet` get a low RMS.
    fn curve(frames: usize, quiet: std::ops::Range<usize>) -> Vec<VolumeSample> {
        (0..frames)
            .map(|i| VolumeSample {
                offset: i * FRAME_LEN,
                len: FRAME_LEN,
                duration_ms: FRAME_MS,
                rms: if quiet.contains(&i) { 0.001 } else { 0.5 },
            })
            .collect()
    }

    fn config() -> SplitConfig {
        SplitConfig {
            search_window_1_ms: 3000,
            search_window_2_ms: 3000,
            silence_length_ms: 500,
            padding_1_ms: 100,
            padding_2_ms: 100,
            offset_ms: 0,
        }
    }

    #[test]
    fn test_finds_quiet_run() {
        // ~300 frames = 7.8 s; boundary in the middle, silence a bit later.
        let samples = curve(300, 170..200);
        let boundary = 150 * FRAME_LEN;
        let point = find_split(&samples, boundary, &config()).unwrap();

        assert!(point.next_start <= point.previous_end);
        let quiet_start = 170 * FRAME_LEN;
        let quiet_end = 200 * FRAME_LEN;
        assert!(point.next_start >= quiet_start - 5 * FRAME_LEN);
        assert!(point.previous_end <= quiet_end + 5 * FRAME_LEN);
        assert_eq!(point.previous_end % FRAME_LEN, 0);
        assert_eq!(point.next_start % FRAME_LEN, 0);
    }

    #[test]
    fn test_padding_widens_overlap() {
        let samples = curve(300, 170..200);
        let boundary = 150 * FRAME_LEN;
        let tight = find_split(
            &samples,
            boundary,
            &SplitConfig {
                padding_1_ms: 0,
                padding_2_ms: 0,
                ..config()
            },
        )
        .unwrap();
        let padded = find_split(&samples, boundary, &config()).unwrap();
        assert!(padded.previous_end >= tight.previous_end);
        assert!(padded.next_start <= tight.next_start);
    }

    #[test]
    fn test_silence_outside_region_is_ignored() {
        // Silence only at the very start, far before the search region.
        let samples = curve(400, 0..30);
        let boundary = 300 * FRAME_LEN;
        let point = find_split(&samples, boundary, &config()).unwrap();
        assert!(point.next_start > 30 * FRAME_LEN);
    }

    #[test]
    fn test_undecodable_frames_never_win() {
        let mut samples = curve(300, 170..200);
        for sample in &mut samples[175..185] {
            sample.rms = f64::INFINITY;
        }
        let point = find_split(&samples, 150 * FRAME_LEN, &config()).unwrap();
        let mid = (point.next_start + point.previous_end) / 2;
        assert!(!(175 * FRAME_LEN..185 * FRAME_LEN).contains(&mid));
    }

    #[test]
    fn test_no_candidate_returns_none() {
        let samples = curve(10, 0..0);
        let point = find_split(&samples, 5 * FRAME_LEN, &config());
        assert!(point.is_none());
        assert!(find_split(&[], 0, &config()).is_none());

        let mut undecodable = curve(300, 0..0);
        for sample in &mut undecodable {
            sample.rms = f64::INFINITY;
        }
        assert!(find_split(&undecodable, 150 * FRAME_LEN, &config()).is_none());
    }

    #[test]
    fn test_start_never_after_end() {
        for quiet_at in (0..280).step_by(13) {
            for boundary in (0..300).step_by(37) {
                let samples = curve(300, quiet_at..quiet_at + 20);
                let split = SplitConfig {
                    padding_1_ms: 0,
                    padding_2_ms: 0,
                    ..config()
                };
                if let Some(point) = find_split(&samples, boundary * FRAME_LEN, &split) {
                    assert!(point.next_start <= point.previous_end);
                    assert!(point.previous_end <= 300 * FRAME_LEN);
                }
            }
        }
    }

    #[test]
    fn test_split_point_at() {
        let point = SplitPoint::at(42);
        assert_eq!(point.previous_end, 42);
        assert_eq!(point.next_start, 42);
    }
}
